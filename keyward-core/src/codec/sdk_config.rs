//! SDK configuration blob
//!
//! Bundles the application key, application secret and the application master
//! public key into one base64 string that client SDKs are initialised with.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use super::{DataReader, DataWriter};
use crate::error::{KeywardError, Result};

/// Format version written as the first byte.
pub const SDK_CONFIG_VERSION: u8 = 0x01;

/// Identifier of the application master key slot.
pub const MASTER_KEY_ID: u8 = 0x01;

/// Length of the application key and secret.
pub const APPLICATION_CREDENTIAL_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkConfiguration {
    pub application_key: Vec<u8>,
    pub application_secret: Vec<u8>,
    pub master_public_key: Vec<u8>,
}

impl SdkConfiguration {
    /// Encode into the base64 blob handed to client SDKs.
    pub fn serialize(&self) -> Result<String> {
        if self.application_key.len() != APPLICATION_CREDENTIAL_LEN
            || self.application_secret.len() != APPLICATION_CREDENTIAL_LEN
        {
            return Err(KeywardError::Encoding(format!(
                "application key and secret must be {} bytes",
                APPLICATION_CREDENTIAL_LEN
            )));
        }

        let mut writer = DataWriter::with_capacity(64 + self.master_public_key.len());
        writer.write_byte(SDK_CONFIG_VERSION);
        writer.write_data(&self.application_key)?;
        writer.write_data(&self.application_secret)?;
        writer.write_count(1)?;
        writer.write_byte(MASTER_KEY_ID);
        writer.write_data(&self.master_public_key)?;

        Ok(BASE64.encode(writer.as_bytes()))
    }

    /// Decode a base64 blob produced by [`SdkConfiguration::serialize`].
    pub fn deserialize(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| KeywardError::Encoding(format!("invalid base64: {}", e)))?;
        let mut reader = DataReader::new(&bytes);

        let truncated = || KeywardError::Encoding("truncated SDK configuration".into());

        let version = reader.read_byte().ok_or_else(truncated)?;
        if version != SDK_CONFIG_VERSION {
            return Err(KeywardError::Encoding(format!(
                "unsupported SDK configuration version {}",
                version
            )));
        }

        let application_key = reader
            .read_data(APPLICATION_CREDENTIAL_LEN)
            .ok_or_else(truncated)?
            .to_vec();
        let application_secret = reader
            .read_data(APPLICATION_CREDENTIAL_LEN)
            .ok_or_else(truncated)?
            .to_vec();

        let key_count = reader.read_count().ok_or_else(truncated)?;
        let mut master_public_key = None;
        for _ in 0..key_count {
            let key_id = reader.read_byte().ok_or_else(truncated)?;
            let key = reader.read_data(0).ok_or_else(truncated)?;
            if key_id == MASTER_KEY_ID {
                master_public_key = Some(key.to_vec());
            }
        }

        let master_public_key = master_public_key.ok_or_else(|| {
            KeywardError::Encoding("SDK configuration carries no master public key".into())
        })?;

        Ok(Self {
            application_key,
            application_secret,
            master_public_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SdkConfiguration {
        SdkConfiguration {
            application_key: vec![0x11; 16],
            application_secret: vec![0x22; 16],
            master_public_key: vec![0x02; 33],
        }
    }

    #[test]
    fn test_serialized_layout() {
        let encoded = sample().serialize().unwrap();
        let bytes = BASE64.decode(encoded).unwrap();

        assert_eq!(bytes[0], SDK_CONFIG_VERSION);
        assert_eq!(bytes[1], 16);
        assert_eq!(&bytes[2..18], &[0x11; 16]);
        assert_eq!(bytes[18], 16);
        assert_eq!(&bytes[19..35], &[0x22; 16]);
        assert_eq!(bytes[35], 1, "one master key");
        assert_eq!(bytes[36], MASTER_KEY_ID);
        assert_eq!(bytes[37], 33);
        assert_eq!(bytes.len(), 38 + 33);
    }

    #[test]
    fn test_deserialize_restores_fields() {
        let config = sample();
        let decoded = SdkConfiguration::deserialize(&config.serialize().unwrap()).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_rejects_short_application_key() {
        let mut config = sample();
        config.application_key = vec![0x11; 8];
        assert!(config.serialize().is_err());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut bytes = BASE64.decode(sample().serialize().unwrap()).unwrap();
        bytes[0] = 0x02;
        assert!(SdkConfiguration::deserialize(&BASE64.encode(bytes)).is_err());
    }

    #[test]
    fn test_rejects_truncated_blob() {
        let bytes = BASE64.decode(sample().serialize().unwrap()).unwrap();
        let truncated = BASE64.encode(&bytes[..bytes.len() - 5]);
        assert!(matches!(
            SdkConfiguration::deserialize(&truncated),
            Err(KeywardError::Encoding(_))
        ));
    }

    #[test]
    fn test_rejects_blob_without_keys() {
        let mut writer = DataWriter::new();
        writer.write_byte(SDK_CONFIG_VERSION);
        writer.write_data(&[0x11; 16]).unwrap();
        writer.write_data(&[0x22; 16]).unwrap();
        writer.write_count(0).unwrap();
        let encoded = BASE64.encode(writer.as_bytes());
        assert!(SdkConfiguration::deserialize(&encoded).is_err());
    }
}
