//! Applications and application versions

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};

use crate::codec::sdk_config::{SdkConfiguration, APPLICATION_CREDENTIAL_LEN};
use crate::encryption::EncryptableField;
use crate::error::{KeywardError, Result};

/// An application and its master signing keypair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub application_id: String,
    pub name: String,
    /// Sealed with context [`Application::encryption_context`].
    pub master_private_key: EncryptableField,
    pub master_public_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Application {
    pub fn encryption_context(&self) -> [&str; 1] {
        [self.application_id.as_str()]
    }
}

/// Key/secret pair clients of one application version sign with.
///
/// Unsupported versions are rejected before any key material is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationVersion {
    pub version_id: String,
    pub application_id: String,
    pub name: String,
    /// Base64 of 16 random bytes; public identifier sent with each request.
    pub application_key: String,
    /// Base64 of 16 random bytes; salts the signed data.
    pub application_secret: String,
    pub supported: bool,
    pub created_at: DateTime<Utc>,
}

impl ApplicationVersion {
    /// SDK configuration for this version under the application's master public key.
    pub fn sdk_configuration(&self, master_public_key: &[u8]) -> Result<SdkConfiguration> {
        let decode = |value: &str| {
            BASE64.decode(value).map_err(|e| {
                KeywardError::Encoding(format!("invalid application credential: {}", e))
            })
        };
        Ok(SdkConfiguration {
            application_key: decode(&self.application_key)?,
            application_secret: decode(&self.application_secret)?,
            master_public_key: master_public_key.to_vec(),
        })
    }
}

/// Random application key or secret.
pub fn generate_credential() -> String {
    let mut bytes = [0u8; APPLICATION_CREDENTIAL_LEN];
    OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_credentials_are_distinct() {
        let a = generate_credential();
        let b = generate_credential();
        assert_ne!(a, b);
        assert_eq!(BASE64.decode(&a).unwrap().len(), APPLICATION_CREDENTIAL_LEN);
    }

    #[test]
    fn test_sdk_configuration_from_version() {
        let version = ApplicationVersion {
            version_id: "v1".into(),
            application_id: "app".into(),
            name: "default".into(),
            application_key: generate_credential(),
            application_secret: generate_credential(),
            supported: true,
            created_at: Utc::now(),
        };
        let config = version.sdk_configuration(&[0x03; 33]).unwrap();
        let decoded = SdkConfiguration::deserialize(&config.serialize().unwrap()).unwrap();
        assert_eq!(BASE64.encode(decoded.application_key), version.application_key);
    }
}
