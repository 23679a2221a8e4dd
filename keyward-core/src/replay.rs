//! One-time values consumed by the encrypted transport layer

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KeywardError, Result};

/// Scope a unique value was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UniqueValueType {
    EciesApplicationScope,
    EciesActivationScope,
}

impl From<UniqueValueType> for i16 {
    fn from(value: UniqueValueType) -> Self {
        match value {
            UniqueValueType::EciesApplicationScope => 1,
            UniqueValueType::EciesActivationScope => 2,
        }
    }
}

impl TryFrom<i16> for UniqueValueType {
    type Error = KeywardError;

    fn try_from(value: i16) -> Result<Self> {
        match value {
            1 => Ok(Self::EciesApplicationScope),
            2 => Ok(Self::EciesActivationScope),
            other => Err(KeywardError::UnmappedValue {
                kind: "unique value type",
                value: other.into(),
            }),
        }
    }
}

/// A consumed one-time value and when it may be forgotten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueValueRecord {
    pub value: String,
    pub value_type: UniqueValueType,
    pub expires_at: DateTime<Utc>,
}

/// `base64(ephemeral_public_key || nonce || identifier)`; absent parts contribute nothing.
pub fn unique_value(
    ephemeral_public_key: Option<&[u8]>,
    nonce: Option<&[u8]>,
    identifier: Option<&str>,
) -> String {
    let mut bytes = Vec::new();
    if let Some(key) = ephemeral_public_key {
        bytes.extend_from_slice(key);
    }
    if let Some(nonce) = nonce {
        bytes.extend_from_slice(nonce);
    }
    if let Some(identifier) = identifier {
        bytes.extend_from_slice(identifier.as_bytes());
    }
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_value_concatenation() {
        let value = unique_value(Some(&[1, 2]), Some(&[3]), Some("id"));
        assert_eq!(BASE64.decode(value).unwrap(), vec![1, 2, 3, b'i', b'd']);
        assert_eq!(unique_value(None, None, None), "");
        assert_eq!(unique_value(None, Some(&[7]), None), BASE64.encode([7]));
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(
            UniqueValueType::try_from(i16::from(UniqueValueType::EciesActivationScope)).unwrap(),
            UniqueValueType::EciesActivationScope
        );
        assert!(UniqueValueType::try_from(0).is_err());
    }
}
