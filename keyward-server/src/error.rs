//! Service error handling module
//!
//! Failures a caller can see. Cryptographic rejections (bad signature, failed
//! proximity check) are verdicts carried in responses, not errors.

use keyward_core::KeywardError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::storage::StorageError;

/// Error taxonomy used for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unknown activation, application or version; nothing was mutated
    NotFound,
    /// Request refused by lifecycle or replay policy
    PolicyRejection,
    /// Malformed payload or key material
    Encoding,
    /// Missing or inconsistent configuration
    Configuration,
    /// Storage or unexpected failures
    Internal,
}

/// Service error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Activation not found: {0}")]
    ActivationNotFound(String),

    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    #[error("Application version not found: {0}")]
    ApplicationVersionNotFound(String),

    #[error("Activation {activation_id} is in state {status}")]
    InvalidActivationState {
        activation_id: String,
        status: keyward_core::ActivationStatus,
    },

    #[error("Activation expired: {0}")]
    ActivationExpired(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request expired")]
    RequestExpired,

    #[error("Replay attack detected")]
    ReplayDetected,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Core error: {0}")]
    Core(#[from] KeywardError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ServiceError {
    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ActivationNotFound(_)
            | Self::ApplicationNotFound(_)
            | Self::ApplicationVersionNotFound(_) => ErrorCategory::NotFound,
            Self::InvalidActivationState { .. }
            | Self::ActivationExpired(_)
            | Self::RequestExpired
            | Self::ReplayDetected => ErrorCategory::PolicyRejection,
            Self::InvalidRequest(_) => ErrorCategory::Encoding,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Core(ref e) => match e {
                KeywardError::MissingMasterDbKey => ErrorCategory::Configuration,
                KeywardError::InvalidKey(_)
                | KeywardError::Encoding(_)
                | KeywardError::UnmappedValue { .. } => ErrorCategory::Encoding,
                KeywardError::InvalidTransition { .. } => ErrorCategory::PolicyRejection,
                KeywardError::Crypto(_) | KeywardError::Decryption(_) => ErrorCategory::Internal,
            },
            Self::Storage(_) => ErrorCategory::Internal,
        }
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ActivationNotFound(_) => "ACTIVATION_NOT_FOUND",
            Self::ApplicationNotFound(_) => "NO_APPLICATION_ID",
            Self::ApplicationVersionNotFound(_) => "NO_APPLICATION_VERSION",
            Self::InvalidActivationState { .. } => "ACTIVATION_INCORRECT_STATE",
            Self::ActivationExpired(_) => "ACTIVATION_EXPIRED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::RequestExpired => "REQUEST_EXPIRED",
            Self::ReplayDetected => "REPLAY_ATTACK",
            Self::Config(_) => "INVALID_CONFIGURATION",
            Self::Core(ref e) => match e {
                KeywardError::InvalidKey(_) => "INVALID_KEY_FORMAT",
                KeywardError::Encoding(_) => "INVALID_INPUT_FORMAT",
                KeywardError::UnmappedValue { .. } => "INVALID_PERSISTED_VALUE",
                KeywardError::InvalidTransition { .. } => "ACTIVATION_INCORRECT_STATE",
                KeywardError::MissingMasterDbKey => "MISSING_MASTER_DB_ENCRYPTION_KEY",
                KeywardError::Crypto(_) => "GENERIC_CRYPTOGRAPHY_ERROR",
                KeywardError::Decryption(_) => "DECRYPTION_FAILED",
            },
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Log the error at a level matching its category
    pub fn log(&self) {
        let category = self.category();
        let code = self.error_code();
        match category {
            ErrorCategory::Internal | ErrorCategory::Configuration => {
                tracing::error!(category = ?category, code = code, error = %self, "Service error");
            }
            _ => {
                tracing::warn!(
                    category = ?category,
                    code = code,
                    error = %self,
                    "Request rejected"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            ServiceError::ActivationNotFound("a".into()).category(),
            ErrorCategory::NotFound
        );
        assert_eq!(ServiceError::ReplayDetected.category(), ErrorCategory::PolicyRejection);
        assert_eq!(
            ServiceError::from(KeywardError::MissingMasterDbKey).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            ServiceError::from(KeywardError::InvalidKey("bad".into())).category(),
            ErrorCategory::Encoding
        );
        assert_eq!(
            ServiceError::from(StorageError::Query("boom".into())).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_config_errors_are_configuration() {
        let err = ServiceError::from(ConfigError::invalid("REQUEST_EXPIRATION_MS", "out of range"));
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ServiceError::RequestExpired.error_code(), "REQUEST_EXPIRED");
        assert_eq!(
            ServiceError::from(KeywardError::MissingMasterDbKey).error_code(),
            "MISSING_MASTER_DB_ENCRYPTION_KEY"
        );
    }
}
