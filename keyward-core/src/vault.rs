//! Vault key release
//!
//! After a vault unlock the server hands the client its vault encryption key,
//! sealed under a one-time key bound to the activation counter:
//! `HMAC(transport_key, counter_data(counter))`. The client derives the same key
//! from its own transport key and counter, so the released blob is useless on
//! any other activation or at any other counter position.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::encryption::{open_with_key, seal_with_key};
use crate::error::{KeywardError, Result};
use crate::kdf::{counter_key, DerivedKey, KEY_LEN};

/// Seal `vault_key` for release at `counter`; returns base64.
pub fn seal_vault_key(
    transport_key: &DerivedKey,
    vault_key: &DerivedKey,
    counter: u64,
) -> Result<String> {
    let release_key = counter_key(transport_key, counter)?;
    let sealed = seal_with_key(release_key.as_bytes(), vault_key.as_bytes())?;
    Ok(BASE64.encode(sealed))
}

/// Client-side inverse of [`seal_vault_key`].
pub fn open_vault_key(
    transport_key: &DerivedKey,
    sealed: &str,
    counter: u64,
) -> Result<DerivedKey> {
    let sealed = BASE64
        .decode(sealed)
        .map_err(|e| KeywardError::Encoding(format!("invalid vault key encoding: {}", e)))?;
    let release_key = counter_key(transport_key, counter)?;
    let plaintext = open_with_key(release_key.as_bytes(), &sealed)?;

    let bytes: [u8; KEY_LEN] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| KeywardError::Decryption("vault key has unexpected length".into()))?;
    Ok(DerivedKey::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_is_bound_to_counter() {
        let transport = DerivedKey::from_bytes([3; KEY_LEN]);
        let vault = DerivedKey::from_bytes([9; KEY_LEN]);

        let sealed = seal_vault_key(&transport, &vault, 42).unwrap();
        let opened = open_vault_key(&transport, &sealed, 42).unwrap();
        assert_eq!(opened.as_bytes(), vault.as_bytes());

        assert!(matches!(
            open_vault_key(&transport, &sealed, 43),
            Err(KeywardError::Decryption(_))
        ));
    }

    #[test]
    fn test_release_is_bound_to_transport_key() {
        let vault = DerivedKey::from_bytes([9; KEY_LEN]);
        let sealed = seal_vault_key(&DerivedKey::from_bytes([1; KEY_LEN]), &vault, 0).unwrap();
        assert!(open_vault_key(&DerivedKey::from_bytes([2; KEY_LEN]), &sealed, 0).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        let transport = DerivedKey::from_bytes([3; KEY_LEN]);
        assert!(matches!(
            open_vault_key(&transport, "***", 0),
            Err(KeywardError::Encoding(_))
        ));
    }
}
