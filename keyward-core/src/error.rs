use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeywardError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Master DB encryption key is not configured")]
    MissingMasterDbKey,

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("Unmapped {kind} value: {value}")]
    UnmappedValue { kind: &'static str, value: i64 },
}

pub type Result<T> = std::result::Result<T, KeywardError>;
