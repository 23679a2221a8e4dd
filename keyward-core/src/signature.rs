//! Multi-factor request signatures
//!
//! A signature is one component per factor. Each component is
//! `HMAC(HMAC(factor_key, counter_data(ctr)), data)`, rendered either as an
//! 8-digit decimal (dynamic truncation) or as the trailing 16 bytes in base64.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::error::{KeywardError, Result};
use crate::kdf::{counter_key, hmac_sha256, DerivedKey};

/// Digits in a decimal signature component.
pub const DECIMAL_COMPONENT_LEN: usize = 8;

/// Bytes kept from each component in the base64 format.
pub const BASE64_COMPONENT_LEN: usize = 16;

const DECIMAL_MODULUS: u32 = 100_000_000;

/// Secret mixed into offline signature data in place of the application secret.
pub const OFFLINE_APPLICATION_SECRET: &str = "offline";

/// A single authentication factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureFactor {
    Possession,
    Knowledge,
    Biometry,
}

/// Combination of factors a client signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureType {
    Possession,
    Knowledge,
    Biometry,
    PossessionKnowledge,
    PossessionBiometry,
    PossessionKnowledgeBiometry,
}

impl SignatureType {
    pub const ALL: [SignatureType; 6] = [
        Self::Possession,
        Self::Knowledge,
        Self::Biometry,
        Self::PossessionKnowledge,
        Self::PossessionBiometry,
        Self::PossessionKnowledgeBiometry,
    ];

    pub fn factors(self) -> &'static [SignatureFactor] {
        use SignatureFactor::*;
        match self {
            Self::Possession => &[Possession],
            Self::Knowledge => &[Knowledge],
            Self::Biometry => &[Biometry],
            Self::PossessionKnowledge => &[Possession, Knowledge],
            Self::PossessionBiometry => &[Possession, Biometry],
            Self::PossessionKnowledgeBiometry => &[Possession, Knowledge, Biometry],
        }
    }

    /// Possession-only signatures never touch the failed-attempt counter.
    pub fn is_possession_only(self) -> bool {
        self == Self::Possession
    }

    /// Device possession combined with at least one user factor.
    pub fn is_combined(self) -> bool {
        let factors = self.factors();
        factors.len() > 1 && factors.contains(&SignatureFactor::Possession)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Possession => "POSSESSION",
            Self::Knowledge => "KNOWLEDGE",
            Self::Biometry => "BIOMETRY",
            Self::PossessionKnowledge => "POSSESSION_KNOWLEDGE",
            Self::PossessionBiometry => "POSSESSION_BIOMETRY",
            Self::PossessionKnowledgeBiometry => "POSSESSION_KNOWLEDGE_BIOMETRY",
        }
    }
}

impl std::fmt::Display for SignatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SignatureType {
    type Err = KeywardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| KeywardError::Encoding(format!("unknown signature type '{}'", s)))
    }
}

impl From<SignatureType> for i16 {
    fn from(value: SignatureType) -> Self {
        match value {
            SignatureType::Possession => 1,
            SignatureType::Knowledge => 2,
            SignatureType::Biometry => 3,
            SignatureType::PossessionKnowledge => 4,
            SignatureType::PossessionBiometry => 5,
            SignatureType::PossessionKnowledgeBiometry => 6,
        }
    }
}

impl TryFrom<i16> for SignatureType {
    type Error = KeywardError;

    fn try_from(value: i16) -> Result<Self> {
        match value {
            1 => Ok(Self::Possession),
            2 => Ok(Self::Knowledge),
            3 => Ok(Self::Biometry),
            4 => Ok(Self::PossessionKnowledge),
            5 => Ok(Self::PossessionBiometry),
            6 => Ok(Self::PossessionKnowledgeBiometry),
            other => Err(KeywardError::UnmappedValue {
                kind: "signature type",
                value: other.into(),
            }),
        }
    }
}

/// How signature components are rendered on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureFormat {
    /// Dash-separated 8-digit groups. Used offline, where the user retypes the code.
    #[default]
    Decimal,
    Base64,
}

/// Request data salted with the application secret: `data || "&" || secret`.
pub fn salted_data(data: &[u8], application_secret: &str) -> Vec<u8> {
    let mut salted = Vec::with_capacity(data.len() + 1 + application_secret.len());
    salted.extend_from_slice(data);
    salted.push(b'&');
    salted.extend_from_slice(application_secret.as_bytes());
    salted
}

/// Compute the expected signature over `data` at `counter`.
pub fn compute_signature(
    keys: &[DerivedKey],
    data: &[u8],
    counter: u64,
    format: SignatureFormat,
) -> Result<String> {
    if keys.is_empty() {
        return Err(KeywardError::Crypto("no signature keys supplied".into()));
    }

    let mut components = Vec::with_capacity(keys.len());
    for key in keys {
        let request_key = counter_key(key, counter)?;
        components.push(hmac_sha256(request_key.as_bytes(), data)?);
    }

    Ok(match format {
        SignatureFormat::Decimal => components
            .iter()
            .map(|c| format!("{:0width$}", truncate_decimal(c), width = DECIMAL_COMPONENT_LEN))
            .collect::<Vec<_>>()
            .join("-"),
        SignatureFormat::Base64 => {
            let mut bytes = Vec::with_capacity(components.len() * BASE64_COMPONENT_LEN);
            for c in &components {
                bytes.extend_from_slice(&c[c.len() - BASE64_COMPONENT_LEN..]);
            }
            BASE64.encode(bytes)
        }
    })
}

/// Constant-time comparison of a claimed signature against the expected one.
pub fn verify_signature(
    keys: &[DerivedKey],
    data: &[u8],
    signature: &str,
    counter: u64,
    format: SignatureFormat,
) -> Result<bool> {
    let expected = compute_signature(keys, data, counter, format)?;
    Ok(expected.as_bytes().ct_eq(signature.as_bytes()).into())
}

// RFC 4226 dynamic truncation
fn truncate_decimal(component: &[u8; 32]) -> u32 {
    let offset = (component[component.len() - 1] & 0x0F) as usize;
    let binary = u32::from_be_bytes([
        component[offset] & 0x7F,
        component[offset + 1],
        component[offset + 2],
        component[offset + 3],
    ]);
    binary % DECIMAL_MODULUS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(count: usize) -> Vec<DerivedKey> {
        (0..count)
            .map(|i| DerivedKey::from_bytes([i as u8 + 1; 32]))
            .collect()
    }

    #[test]
    fn test_decimal_format_shape() {
        let signature = compute_signature(&keys(3), b"data", 7, SignatureFormat::Decimal).unwrap();
        let groups: Vec<&str> = signature.split('-').collect();
        assert_eq!(groups.len(), 3);
        for group in groups {
            assert_eq!(group.len(), DECIMAL_COMPONENT_LEN);
            assert!(group.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_base64_format_length() {
        let signature = compute_signature(&keys(2), b"data", 7, SignatureFormat::Base64).unwrap();
        assert_eq!(BASE64.decode(signature).unwrap().len(), 2 * BASE64_COMPONENT_LEN);
    }

    #[test]
    fn test_signature_depends_on_counter_and_data() {
        let k = keys(1);
        let base = compute_signature(&k, b"data", 1, SignatureFormat::Base64).unwrap();
        assert_ne!(base, compute_signature(&k, b"data", 2, SignatureFormat::Base64).unwrap());
        assert_ne!(base, compute_signature(&k, b"other", 1, SignatureFormat::Base64).unwrap());
    }

    #[test]
    fn test_verify_signature() {
        let k = keys(2);
        let signature = compute_signature(&k, b"data", 3, SignatureFormat::Decimal).unwrap();
        assert!(verify_signature(&k, b"data", &signature, 3, SignatureFormat::Decimal).unwrap());
        assert!(!verify_signature(&k, b"data", &signature, 4, SignatureFormat::Decimal).unwrap());
        assert!(!verify_signature(&k, b"data", "", 3, SignatureFormat::Decimal).unwrap());
    }

    #[test]
    fn test_empty_key_set_is_an_error() {
        assert!(compute_signature(&[], b"data", 0, SignatureFormat::Decimal).is_err());
    }

    #[test]
    fn test_salted_data() {
        assert_eq!(salted_data(b"POST&/x", "secret"), b"POST&/x&secret".to_vec());
    }

    #[test]
    fn test_factor_classification() {
        assert!(SignatureType::Possession.is_possession_only());
        assert!(!SignatureType::Knowledge.is_possession_only());
        assert!(SignatureType::PossessionKnowledge.is_combined());
        assert!(SignatureType::PossessionKnowledgeBiometry.is_combined());
        assert!(!SignatureType::Knowledge.is_combined());
        assert!(!SignatureType::Biometry.is_combined());
        assert!(!SignatureType::Possession.is_combined());
    }

    #[test]
    fn test_persisted_mapping_is_exhaustive() {
        for signature_type in SignatureType::ALL {
            let raw: i16 = signature_type.into();
            assert_eq!(SignatureType::try_from(raw).unwrap(), signature_type);
        }
        assert!(matches!(
            SignatureType::try_from(0),
            Err(KeywardError::UnmappedValue { .. })
        ));
        assert!(SignatureType::try_from(7).is_err());
    }

    #[test]
    fn test_parse_signature_type() {
        assert_eq!(
            "possession_biometry".parse::<SignatureType>().unwrap(),
            SignatureType::PossessionBiometry
        );
        assert!("pin".parse::<SignatureType>().is_err());
    }
}
