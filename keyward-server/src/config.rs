//! Server configuration module
//!
//! Handles loading configuration from environment variables with sensible defaults.
//! Values that fail to parse fall back to their defaults; [`Config::validate`]
//! rejects values that parse but are out of range.

use std::net::SocketAddr;
use std::time::Duration;

use keyward_core::totp::{MAX_DIGITS, MIN_DIGITS};
use keyward_core::MasterDbKey;

/// Largest accepted lookahead window.
pub const MAX_LOOKAHEAD: u32 = 64;

/// Configuration errors are fatal at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

/// Replay guard enforcement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayVerificationMode {
    /// Persist and check unique values
    #[default]
    Default,
    /// Accept every value (explicit opt-out)
    None,
}

impl std::str::FromStr for ReplayVerificationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "none" => Ok(Self::None),
            other => Err(ConfigError::invalid(
                "REPLAY_VERIFICATION",
                format!("expected 'default' or 'none', got '{}'", other),
            )),
        }
    }
}

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3000)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: [u8; 4],
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// PostgreSQL connection string; in-memory storage when unset
    pub database_url: Option<String>,
    /// Database connection pool maximum connections (default: 20)
    pub database_max_connections: u32,
    /// Database connection pool minimum connections (default: 2)
    pub database_min_connections: u32,
    /// Counter positions checked per verification (default: 20)
    pub signature_validation_lookahead: u32,
    /// Default max failed attempts for new activations (default: 5)
    pub max_failed_attempts: u64,
    /// Whether rejections for a non-active activation count as failed attempts (default: false)
    pub invalid_state_counts_as_failed_attempt: bool,
    /// Replay window (default: 60s)
    pub request_expiration: Duration,
    /// Replay guard mode (default: enforcing)
    pub replay_verification: ReplayVerificationMode,
    /// At-rest encryption key; sensitive fields are stored in clear when unset
    pub master_db_encryption_key: Option<MasterDbKey>,
    /// Time a new activation has to reach ACTIVE (default: 2 minutes)
    pub activation_validity: Duration,
    /// Unique value sweep period (default: 60s)
    pub unique_value_cleanup_interval: Duration,
    /// Proximity OTP digits (default: 8)
    pub proximity_otp_length: u32,
    /// Proximity OTP time step (default: 30s)
    pub proximity_step_secs: u64,
    /// Previous time steps accepted (default: 1)
    pub proximity_step_count: u32,
    /// Lease holder identity for background tasks
    pub instance_id: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: [127, 0, 0, 1],
            timeout_secs: 30,
            database_url: None,
            database_max_connections: 20,
            database_min_connections: 2,
            signature_validation_lookahead: 20,
            max_failed_attempts: 5,
            invalid_state_counts_as_failed_attempt: false,
            request_expiration: Duration::from_millis(60_000),
            replay_verification: ReplayVerificationMode::Default,
            master_db_encryption_key: None,
            activation_validity: Duration::from_millis(120_000),
            unique_value_cleanup_interval: Duration::from_millis(60_000),
            proximity_otp_length: 8,
            proximity_step_secs: 30,
            proximity_step_count: 1,
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = std::env::var("HOST")
            .ok()
            .map(|h| {
                if h == "0.0.0.0" {
                    [0, 0, 0, 0]
                } else {
                    [127, 0, 0, 1]
                }
            })
            .unwrap_or(defaults.host);

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.is_empty());

        let replay_verification = match std::env::var("REPLAY_VERIFICATION") {
            Ok(value) => value.parse()?,
            Err(_) => ReplayVerificationMode::Default,
        };

        let master_db_encryption_key = match std::env::var("MASTER_DB_ENCRYPTION_KEY") {
            Ok(value) if !value.trim().is_empty() => Some(
                MasterDbKey::from_base64(&value)
                    .map_err(|e| ConfigError::invalid("MASTER_DB_ENCRYPTION_KEY", e.to_string()))?,
            ),
            _ => None,
        };

        let config = Self {
            port: env_parse("PORT", defaults.port),
            host,
            timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", defaults.timeout_secs),
            database_url,
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            database_min_connections: env_parse(
                "DATABASE_MIN_CONNECTIONS",
                defaults.database_min_connections,
            ),
            signature_validation_lookahead: env_parse(
                "SIGNATURE_VALIDATION_LOOKAHEAD",
                defaults.signature_validation_lookahead,
            ),
            max_failed_attempts: env_parse(
                "SIGNATURE_MAX_FAILED_ATTEMPTS",
                defaults.max_failed_attempts,
            ),
            invalid_state_counts_as_failed_attempt: env_flag(
                "INVALID_STATE_COUNTS_AS_FAILED_ATTEMPT",
                defaults.invalid_state_counts_as_failed_attempt,
            ),
            request_expiration: Duration::from_millis(env_parse("REQUEST_EXPIRATION_MS", 60_000)),
            replay_verification,
            master_db_encryption_key,
            activation_validity: Duration::from_millis(env_parse(
                "ACTIVATION_VALIDITY_MS",
                120_000,
            )),
            unique_value_cleanup_interval: Duration::from_millis(env_parse(
                "UNIQUE_VALUE_CLEANUP_INTERVAL_MS",
                60_000,
            )),
            proximity_otp_length: env_parse("PROXIMITY_OTP_LENGTH", defaults.proximity_otp_length),
            proximity_step_secs: env_parse("PROXIMITY_STEP_SECS", defaults.proximity_step_secs),
            proximity_step_count: env_parse("PROXIMITY_STEP_COUNT", defaults.proximity_step_count),
            instance_id: std::env::var("INSTANCE_ID").unwrap_or(defaults.instance_id),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check ranges of protocol parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_LOOKAHEAD).contains(&self.signature_validation_lookahead) {
            return Err(ConfigError::invalid(
                "SIGNATURE_VALIDATION_LOOKAHEAD",
                format!("must be between 1 and {}", MAX_LOOKAHEAD),
            ));
        }
        if self.max_failed_attempts == 0 {
            return Err(ConfigError::invalid(
                "SIGNATURE_MAX_FAILED_ATTEMPTS",
                "must be at least 1",
            ));
        }
        if self.request_expiration.is_zero() {
            return Err(ConfigError::invalid("REQUEST_EXPIRATION_MS", "must be positive"));
        }
        if self.unique_value_cleanup_interval.is_zero() {
            return Err(ConfigError::invalid(
                "UNIQUE_VALUE_CLEANUP_INTERVAL_MS",
                "must be positive",
            ));
        }
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&self.proximity_otp_length) {
            return Err(ConfigError::invalid(
                "PROXIMITY_OTP_LENGTH",
                format!("must be between {} and {}", MIN_DIGITS, MAX_DIGITS),
            ));
        }
        if self.proximity_step_secs == 0 {
            return Err(ConfigError::invalid("PROXIMITY_STEP_SECS", "must be positive"));
        }
        Ok(())
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.signature_validation_lookahead, 20);
        assert_eq!(config.replay_verification, ReplayVerificationMode::Default);
        assert!(config.master_db_encryption_key.is_none());
        assert!(!config.invalid_state_counts_as_failed_attempt);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lookahead_range() {
        let mut config = Config::default();
        config.signature_validation_lookahead = 0;
        assert!(config.validate().is_err());
        config.signature_validation_lookahead = 65;
        assert!(config.validate().is_err());
        config.signature_validation_lookahead = 64;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_max_failed_attempts_rejected() {
        let config = Config {
            max_failed_attempts: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_proximity_length_range() {
        let config = Config {
            proximity_otp_length: 4,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_replay_mode_parsing() {
        assert_eq!(
            "default".parse::<ReplayVerificationMode>().unwrap(),
            ReplayVerificationMode::Default
        );
        assert_eq!(
            " NONE ".parse::<ReplayVerificationMode>().unwrap(),
            ReplayVerificationMode::None
        );
        assert!("off".parse::<ReplayVerificationMode>().is_err());
    }
}
