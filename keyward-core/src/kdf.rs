//! Key derivation
//!
//! One ECDH exchange between the server private key and the device public key
//! yields the master secret. Every purpose key (signature factors, transport,
//! vault, end-to-end encryption) is expanded from it with HKDF-SHA256 under a
//! distinct textual tag, so the keys are independent even though they share a
//! root. The master secret is never persisted; it is re-derived per request.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{KeywardError, Result};
use crate::keys::{decode_private_key, decode_public_key};
use crate::signature::{SignatureFactor, SignatureType};

type HmacSha256 = Hmac<Sha256>;

/// Length of the master secret and all derived keys.
pub const KEY_LEN: usize = 32;

const MASTER_SECRET_INFO: &[u8] = b"keyward/master-secret";

/// ECDH-derived root secret shared by server and device.
pub struct MasterSecret(Zeroizing<[u8; KEY_LEN]>);

impl MasterSecret {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSecret([REDACTED])")
    }
}

/// Symmetric key expanded from the master secret.
#[derive(Clone)]
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Non-signature uses of the master secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPurpose {
    /// Per-counter transport keys (vault key release).
    Transport,
    /// The vault encryption key guarded by vault unlock.
    Vault,
    /// End-to-end payload encryption.
    EndToEnd,
}

impl TransportPurpose {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Vault => "vault",
            Self::EndToEnd => "e2ee",
        }
    }
}

impl SignatureFactor {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Possession => "signature/possession",
            Self::Knowledge => "signature/knowledge",
            Self::Biometry => "signature/biometry",
        }
    }
}

/// Derivation of protocol keys from exchanged key material.
pub trait KeyDerivation: Send + Sync {
    /// One ECDH exchange. Pure, no side effects.
    fn derive_master_secret(
        &self,
        server_private_key: &[u8],
        device_public_key: &[u8],
    ) -> Result<MasterSecret>;

    /// Keys for every factor of `signature_type`, in canonical factor order.
    fn derive_signature_keys(
        &self,
        master: &MasterSecret,
        signature_type: SignatureType,
    ) -> Result<Vec<DerivedKey>>;

    fn derive_transport_key(
        &self,
        master: &MasterSecret,
        purpose: TransportPurpose,
    ) -> Result<DerivedKey>;
}

/// HKDF-SHA256 implementation of [`KeyDerivation`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HkdfKeyDerivation;

impl KeyDerivation for HkdfKeyDerivation {
    fn derive_master_secret(
        &self,
        server_private_key: &[u8],
        device_public_key: &[u8],
    ) -> Result<MasterSecret> {
        let secret = decode_private_key(server_private_key)?;
        let public = decode_public_key(device_public_key)?;

        let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
        let okm = hkdf_expand(shared.raw_secret_bytes().as_slice(), MASTER_SECRET_INFO)?;
        Ok(MasterSecret(okm))
    }

    fn derive_signature_keys(
        &self,
        master: &MasterSecret,
        signature_type: SignatureType,
    ) -> Result<Vec<DerivedKey>> {
        signature_type
            .factors()
            .iter()
            .map(|factor| hkdf_expand(master.as_bytes(), factor.tag().as_bytes()).map(DerivedKey))
            .collect()
    }

    fn derive_transport_key(
        &self,
        master: &MasterSecret,
        purpose: TransportPurpose,
    ) -> Result<DerivedKey> {
        hkdf_expand(master.as_bytes(), purpose.tag().as_bytes()).map(DerivedKey)
    }
}

fn hkdf_expand(ikm: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(info, okm.as_mut_slice())
        .map_err(|e| KeywardError::Crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}

/// HMAC-SHA256 over `data`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; KEY_LEN]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| KeywardError::Crypto(format!("HMAC key rejected: {}", e)))?;
    mac.update(data);
    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Counter encoding mixed into per-request keys: 16 bytes, big-endian counter in the low half.
pub fn counter_data(counter: u64) -> [u8; 16] {
    let mut data = [0u8; 16];
    data[8..].copy_from_slice(&counter.to_be_bytes());
    data
}

/// Per-counter key: `HMAC(key, counter_data(counter))`.
pub fn counter_key(key: &DerivedKey, counter: u64) -> Result<DerivedKey> {
    hmac_sha256(key.as_bytes(), &counter_data(counter)).map(DerivedKey::from_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    fn exchange() -> (KeyPair, KeyPair) {
        (KeyPair::generate(), KeyPair::generate())
    }

    #[test]
    fn test_master_secret_agrees_on_both_sides() {
        let (server, device) = exchange();
        let kdf = HkdfKeyDerivation;

        let server_side = kdf
            .derive_master_secret(server.private_key(), device.public_key())
            .unwrap();
        let device_side = kdf
            .derive_master_secret(device.private_key(), server.public_key())
            .unwrap();

        assert_eq!(server_side.as_bytes(), device_side.as_bytes());
    }

    #[test]
    fn test_purpose_keys_are_independent() {
        let (server, device) = exchange();
        let kdf = HkdfKeyDerivation;
        let master = kdf
            .derive_master_secret(server.private_key(), device.public_key())
            .unwrap();

        let transport = kdf.derive_transport_key(&master, TransportPurpose::Transport).unwrap();
        let vault = kdf.derive_transport_key(&master, TransportPurpose::Vault).unwrap();
        let e2ee = kdf.derive_transport_key(&master, TransportPurpose::EndToEnd).unwrap();
        let signing = kdf
            .derive_signature_keys(&master, SignatureType::PossessionKnowledgeBiometry)
            .unwrap();

        let mut all: Vec<&[u8]> = vec![transport.as_bytes(), vault.as_bytes(), e2ee.as_bytes()];
        all.extend(signing.iter().map(|k| k.as_bytes()));
        all.push(master.as_bytes());
        for (i, a) in all.iter().enumerate() {
            for b in all.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_signature_key_count_matches_factors() {
        let (server, device) = exchange();
        let kdf = HkdfKeyDerivation;
        let master = kdf
            .derive_master_secret(server.private_key(), device.public_key())
            .unwrap();

        for signature_type in SignatureType::ALL {
            let keys = kdf.derive_signature_keys(&master, signature_type).unwrap();
            assert_eq!(keys.len(), signature_type.factors().len());
        }

        let possession = kdf
            .derive_signature_keys(&master, SignatureType::Possession)
            .unwrap();
        let combined = kdf
            .derive_signature_keys(&master, SignatureType::PossessionKnowledge)
            .unwrap();
        assert_eq!(possession[0].as_bytes(), combined[0].as_bytes());
    }

    #[test]
    fn test_invalid_device_key_is_rejected() {
        let server = KeyPair::generate();
        let result = HkdfKeyDerivation.derive_master_secret(server.private_key(), &[0x04; 65]);
        assert!(matches!(result, Err(KeywardError::InvalidKey(_))));
    }

    #[test]
    fn test_counter_data_layout() {
        let data = counter_data(0x0102);
        assert_eq!(&data[..8], &[0u8; 8]);
        assert_eq!(&data[8..], &[0, 0, 0, 0, 0, 0, 0x01, 0x02]);
    }

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}
