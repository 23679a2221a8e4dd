//! At-rest field encryption
//!
//! Sensitive columns (server private keys, application master keys) are stored
//! as [`EncryptableField`]s. With a master DB key configured, each field is
//! sealed with AES-256-GCM under `HMAC(master_key, join("&", context))`, where
//! the context lists identifiers of the owning record. Decrypting with another
//! record's context derives another key and fails authentication.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{KeywardError, Result};
use crate::kdf::hmac_sha256;

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// Shortest accepted master DB key.
pub const MIN_MASTER_KEY_LEN: usize = 16;

/// How a stored field was protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EncryptionMode {
    NoEncryption,
    AesHmac,
}

impl From<EncryptionMode> for i16 {
    fn from(value: EncryptionMode) -> Self {
        match value {
            EncryptionMode::NoEncryption => 0,
            EncryptionMode::AesHmac => 1,
        }
    }
}

impl TryFrom<i16> for EncryptionMode {
    type Error = KeywardError;

    fn try_from(value: i16) -> Result<Self> {
        match value {
            0 => Ok(Self::NoEncryption),
            1 => Ok(Self::AesHmac),
            other => Err(KeywardError::UnmappedValue {
                kind: "encryption mode",
                value: other.into(),
            }),
        }
    }
}

/// A stored value tagged with its protection mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptableField {
    pub mode: EncryptionMode,
    pub data: Vec<u8>,
}

/// Master key for at-rest encryption.
#[derive(Clone)]
pub struct MasterDbKey(Zeroizing<Vec<u8>>);

impl MasterDbKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < MIN_MASTER_KEY_LEN {
            return Err(KeywardError::InvalidKey(format!(
                "master DB encryption key must be at least {} bytes",
                MIN_MASTER_KEY_LEN
            )));
        }
        Ok(Self(Zeroizing::new(bytes)))
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64.decode(encoded.trim()).map_err(|e| {
            KeywardError::InvalidKey(format!("master DB encryption key is not base64: {}", e))
        })?;
        Self::new(bytes)
    }

    /// Fresh random 32-byte key.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(Zeroizing::new(bytes))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0.as_slice())
    }
}

impl std::fmt::Debug for MasterDbKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterDbKey([REDACTED])")
    }
}

/// Context-bound encryption of stored fields.
#[derive(Debug, Clone, Default)]
pub struct AtRestEncryption {
    master_key: Option<MasterDbKey>,
}

impl AtRestEncryption {
    pub fn new(master_key: Option<MasterDbKey>) -> Self {
        if master_key.is_none() {
            tracing::warn!(
                "No master DB encryption key configured, sensitive fields are stored unencrypted"
            );
        }
        Self { master_key }
    }

    pub fn is_enabled(&self) -> bool {
        self.master_key.is_some()
    }

    /// Seal `plaintext` for the record identified by `context`.
    ///
    /// Returns a [`EncryptionMode::NoEncryption`] field when no master key is configured.
    pub fn encrypt(&self, plaintext: &[u8], context: &[&str]) -> Result<EncryptableField> {
        let Some(master_key) = &self.master_key else {
            return Ok(EncryptableField {
                mode: EncryptionMode::NoEncryption,
                data: plaintext.to_vec(),
            });
        };

        let data = seal(&record_cipher(master_key, context)?, plaintext)?;

        Ok(EncryptableField {
            mode: EncryptionMode::AesHmac,
            data,
        })
    }

    /// Open a stored field using the caller's view of the record context.
    pub fn decrypt(
        &self,
        field: &EncryptableField,
        context: &[&str],
    ) -> Result<Zeroizing<Vec<u8>>> {
        match field.mode {
            EncryptionMode::NoEncryption => Ok(Zeroizing::new(field.data.clone())),
            EncryptionMode::AesHmac => {
                let master_key = self
                    .master_key
                    .as_ref()
                    .ok_or(KeywardError::MissingMasterDbKey)?;

                open(&record_cipher(master_key, context)?, &field.data).map_err(|_| {
                    KeywardError::Decryption("authentication failed for record context".into())
                })
            }
        }
    }
}

/// AES-256-GCM under a raw 32-byte key; output is `nonce || ciphertext`.
pub fn seal_with_key(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    seal(&cipher(key)?, plaintext)
}

/// Inverse of [`seal_with_key`].
pub fn open_with_key(key: &[u8], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    open(&cipher(key)?, sealed)
}

fn seal(cipher: &Aes256Gcm, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| KeywardError::Crypto("AES-GCM encryption failed".into()))?;

    let mut data = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    data.extend_from_slice(&nonce);
    data.extend_from_slice(&ciphertext);
    Ok(data)
}

fn open(cipher: &Aes256Gcm, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() < NONCE_LEN {
        return Err(KeywardError::Decryption(
            "encrypted field is shorter than its nonce".into(),
        ));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| KeywardError::Decryption("AES-GCM authentication failed".into()))
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key)
        .map_err(|_| KeywardError::Crypto("invalid AES key length".into()))
}

fn record_cipher(master_key: &MasterDbKey, context: &[&str]) -> Result<Aes256Gcm> {
    let record_key = Zeroizing::new(hmac_sha256(&master_key.0, context.join("&").as_bytes())?);
    cipher(record_key.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AtRestEncryption {
        AtRestEncryption::new(Some(MasterDbKey::generate()))
    }

    #[test]
    fn test_round_trip_with_matching_context() {
        let service = service();
        let field = service.encrypt(b"server private key", &["app1", "user1"]).unwrap();
        assert_eq!(field.mode, EncryptionMode::AesHmac);
        assert_ne!(field.data, b"server private key".to_vec());

        let plaintext = service.decrypt(&field, &["app1", "user1"]).unwrap();
        assert_eq!(plaintext.as_slice(), b"server private key");
    }

    #[test]
    fn test_wrong_context_fails() {
        let service = service();
        let field = service.encrypt(b"server private key", &["app1", "user1"]).unwrap();
        let result = service.decrypt(&field, &["app1", "user2"]);
        assert!(matches!(result, Err(KeywardError::Decryption(_))));
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let service = service();
        let a = service.encrypt(b"same", &["ctx"]).unwrap();
        let b = service.encrypt(b"same", &["ctx"]).unwrap();
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn test_no_master_key_passthrough() {
        let service = AtRestEncryption::new(None);
        assert!(!service.is_enabled());
        let field = service.encrypt(b"plain", &["ctx"]).unwrap();
        assert_eq!(field.mode, EncryptionMode::NoEncryption);
        assert_eq!(field.data, b"plain".to_vec());
        assert_eq!(service.decrypt(&field, &["other"]).unwrap().as_slice(), b"plain");
    }

    #[test]
    fn test_encrypted_field_without_master_key_is_an_error() {
        let field = service().encrypt(b"secret", &["ctx"]).unwrap();
        let result = AtRestEncryption::new(None).decrypt(&field, &["ctx"]);
        assert!(matches!(result, Err(KeywardError::MissingMasterDbKey)));
    }

    #[test]
    fn test_truncated_ciphertext() {
        let field = EncryptableField {
            mode: EncryptionMode::AesHmac,
            data: vec![0u8; 4],
        };
        assert!(matches!(
            service().decrypt(&field, &["ctx"]),
            Err(KeywardError::Decryption(_))
        ));
    }

    #[test]
    fn test_master_key_parsing() {
        assert!(MasterDbKey::from_base64("not base64!").is_err());
        assert!(MasterDbKey::from_base64("c2hvcnQ=").is_err(), "too short");
        let key = MasterDbKey::generate();
        assert!(MasterDbKey::from_base64(&key.to_base64()).is_ok());
    }

    #[test]
    fn test_mode_mapping() {
        assert_eq!(i16::from(EncryptionMode::AesHmac), 1);
        assert_eq!(EncryptionMode::try_from(0).unwrap(), EncryptionMode::NoEncryption);
        assert!(EncryptionMode::try_from(2).is_err());
    }
}
