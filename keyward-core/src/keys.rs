//! P-256 key material
//!
//! Public keys travel as SEC1 compressed points (33 bytes) and private keys as
//! raw 32-byte scalars. Decoding failures surface as [`KeywardError::InvalidKey`]
//! so callers can reject the request before any state changes.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::{KeywardError, Result};

/// Length of a SEC1 compressed P-256 public key.
pub const PUBLIC_KEY_LEN: usize = 33;

/// Length of a raw P-256 private scalar.
pub const PRIVATE_KEY_LEN: usize = 32;

/// An encoded P-256 keypair. The private half is wiped on drop.
#[derive(Clone)]
pub struct KeyPair {
    public_key: Vec<u8>,
    private_key: Zeroizing<Vec<u8>>,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS random source.
    pub fn generate() -> Self {
        Self::from_secret(&SecretKey::random(&mut OsRng))
    }

    /// Rebuild a keypair from a stored private scalar.
    pub fn from_private_key(private_key: &[u8]) -> Result<Self> {
        Ok(Self::from_secret(&decode_private_key(private_key)?))
    }

    fn from_secret(secret: &SecretKey) -> Self {
        Self {
            public_key: encode_public_key(&secret.public_key()),
            private_key: Zeroizing::new(secret.to_bytes().to_vec()),
        }
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(&self.public_key))
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

pub fn encode_public_key(key: &PublicKey) -> Vec<u8> {
    key.to_encoded_point(true).as_bytes().to_vec()
}

/// Parse a SEC1 encoded point (compressed or uncompressed).
pub fn decode_public_key(bytes: &[u8]) -> Result<PublicKey> {
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|_| KeywardError::InvalidKey("malformed P-256 public key".into()))
}

pub fn decode_private_key(bytes: &[u8]) -> Result<SecretKey> {
    if bytes.len() != PRIVATE_KEY_LEN {
        return Err(KeywardError::InvalidKey(format!(
            "private key must be {} bytes, got {}",
            PRIVATE_KEY_LEN,
            bytes.len()
        )));
    }
    SecretKey::from_slice(bytes)
        .map_err(|_| KeywardError::InvalidKey("private key is not a valid P-256 scalar".into()))
}

/// ECDSA-P256 (SHA-256) signature in DER form.
pub fn sign_ecdsa(private_key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let signing_key = SigningKey::from(decode_private_key(private_key)?);
    let signature: Signature = signing_key.sign(message);
    Ok(signature.to_der().as_bytes().to_vec())
}

/// Check a DER encoded ECDSA-P256 signature. Malformed signatures verify as `false`.
pub fn verify_ecdsa(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<bool> {
    let verifying_key = VerifyingKey::from(decode_public_key(public_key)?);
    let Ok(signature) = Signature::from_der(signature) else {
        return Ok(false);
    };
    Ok(verifying_key.verify(message, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keypair_encoding() {
        let pair = KeyPair::generate();
        assert_eq!(pair.public_key().len(), PUBLIC_KEY_LEN);
        assert_eq!(pair.private_key().len(), PRIVATE_KEY_LEN);

        let restored = KeyPair::from_private_key(pair.private_key()).unwrap();
        assert_eq!(restored.public_key(), pair.public_key());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let pair = KeyPair::generate();
        let rendered = format!("{:?}", pair);
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains(&hex::encode(pair.private_key())));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_public_key(&[0x02; 10]),
            Err(KeywardError::InvalidKey(_))
        ));
        assert!(decode_private_key(&[0u8; 32]).is_err(), "zero scalar");
        assert!(decode_private_key(&[1u8; 31]).is_err());
    }

    #[test]
    fn test_ecdsa_sign_and_verify() {
        let pair = KeyPair::generate();
        let signature = sign_ecdsa(pair.private_key(), b"offline payload").unwrap();

        assert!(verify_ecdsa(pair.public_key(), b"offline payload", &signature).unwrap());
        assert!(!verify_ecdsa(pair.public_key(), b"tampered payload", &signature).unwrap());
        assert!(!verify_ecdsa(pair.public_key(), b"offline payload", b"not der").unwrap());
    }
}
