//! Offline signature payloads
//!
//! The server signs `data \n nonce` with ECDSA and the client displays the
//! resulting payload (usually as a QR code). The last line carries a one-byte key
//! indicator followed by the base64 DER signature, so the client knows which
//! public key to check it against.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};

use crate::error::{KeywardError, Result};
use crate::keys::{sign_ecdsa, verify_ecdsa};

/// Length of the random payload nonce.
pub const OFFLINE_NONCE_LEN: usize = 16;

/// Which server key signed an offline payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineKeyIndicator {
    /// Application master key (non-personalized payloads).
    ApplicationMaster,
    /// Activation server key (personalized payloads).
    ActivationServer,
}

impl OfflineKeyIndicator {
    pub fn as_char(self) -> char {
        match self {
            Self::ApplicationMaster => '0',
            Self::ActivationServer => '1',
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::ApplicationMaster),
            '1' => Some(Self::ActivationServer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflinePayload {
    /// `data \n nonce \n indicator || signature`
    pub offline_data: String,
    /// Base64 nonce; also the input the client signs over in the offline signature.
    pub nonce: String,
}

/// Sign `data` with a fresh nonce.
pub fn create_offline_payload(
    data: &str,
    private_key: &[u8],
    indicator: OfflineKeyIndicator,
) -> Result<OfflinePayload> {
    let mut nonce = [0u8; OFFLINE_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let nonce = BASE64.encode(nonce);

    let signed = format!("{}\n{}", data, nonce);
    let signature = sign_ecdsa(private_key, signed.as_bytes())?;

    Ok(OfflinePayload {
        offline_data: format!("{}\n{}{}", signed, indicator.as_char(), BASE64.encode(signature)),
        nonce,
    })
}

/// Client-side check of a payload; returns which key signed it when valid.
pub fn verify_offline_payload(
    offline_data: &str,
    public_key: &[u8],
) -> Result<Option<OfflineKeyIndicator>> {
    let (signed, trailer) = offline_data
        .rsplit_once('\n')
        .ok_or_else(|| KeywardError::Encoding("offline payload has no signature line".into()))?;

    let mut chars = trailer.chars();
    let indicator = chars
        .next()
        .and_then(OfflineKeyIndicator::from_char)
        .ok_or_else(|| KeywardError::Encoding("unknown offline key indicator".into()))?;
    let signature = BASE64
        .decode(chars.as_str())
        .map_err(|e| KeywardError::Encoding(format!("invalid offline signature: {}", e)))?;

    Ok(verify_ecdsa(public_key, signed.as_bytes(), &signature)?.then_some(indicator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    #[test]
    fn test_payload_layout_and_verification() {
        let pair = KeyPair::generate();
        let payload = create_offline_payload(
            "A1*ZPAY*100.00",
            pair.private_key(),
            OfflineKeyIndicator::ActivationServer,
        )
        .unwrap();

        let lines: Vec<&str> = payload.offline_data.split('\n').collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "A1*ZPAY*100.00");
        assert_eq!(lines[1], payload.nonce);
        assert!(lines[2].starts_with('1'));

        assert_eq!(
            verify_offline_payload(&payload.offline_data, pair.public_key()).unwrap(),
            Some(OfflineKeyIndicator::ActivationServer)
        );
    }

    #[test]
    fn test_payload_from_other_key_is_rejected() {
        let pair = KeyPair::generate();
        let other = KeyPair::generate();
        let indicator = OfflineKeyIndicator::ApplicationMaster;
        let payload = create_offline_payload("data", pair.private_key(), indicator).unwrap();
        assert_eq!(
            verify_offline_payload(&payload.offline_data, other.public_key()).unwrap(),
            None
        );
    }

    #[test]
    fn test_malformed_payload() {
        let pair = KeyPair::generate();
        assert!(verify_offline_payload("no newline", pair.public_key()).is_err());
        assert!(verify_offline_payload("data\n9abc", pair.public_key()).is_err());
    }
}
