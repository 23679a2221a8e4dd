//! Keyward Core - protocol primitives for multi-factor device activations
//!
//! This crate holds the pure, synchronous pieces of the activation protocol
//! shared by the server and developer tooling:
//!
//! - Compact binary codec for offline payloads and SDK configuration blobs
//! - P-256 key handling, ECDH master secrets and HKDF purpose keys
//! - Counter-bound multi-factor signatures (decimal and base64 formats)
//! - Context-bound at-rest encryption of stored secrets
//! - Proximity one-time codes and offline payload signing
//! - Activation, application and audit record types with exhaustive
//!   persisted-integer mappings
//!
//! # Example
//!
//! ```
//! use keyward_core::{
//!     compute_signature, salted_data, verify_signature, HkdfKeyDerivation, KeyDerivation,
//!     KeyPair, SignatureFormat, SignatureType,
//! };
//!
//! # fn example() -> keyward_core::Result<()> {
//! let server = KeyPair::generate();
//! let device = KeyPair::generate();
//! let kdf = HkdfKeyDerivation;
//!
//! // Device side
//! let master = kdf.derive_master_secret(device.private_key(), server.public_key())?;
//! let keys = kdf.derive_signature_keys(&master, SignatureType::PossessionKnowledge)?;
//! let data = salted_data(b"POST&/payment", "app-secret");
//! let signature = compute_signature(&keys, &data, 0, SignatureFormat::Base64)?;
//!
//! // Server side
//! let master = kdf.derive_master_secret(server.private_key(), device.public_key())?;
//! let keys = kdf.derive_signature_keys(&master, SignatureType::PossessionKnowledge)?;
//! assert!(verify_signature(&keys, &data, &signature, 0, SignatureFormat::Base64)?);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod activation;
pub mod application;
pub mod codec;
pub mod encryption;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod offline;
pub mod replay;
pub mod signature;
pub mod totp;
pub mod vault;

// Re-export main types for convenience
pub use activation::{
    ActivationRecord, ActivationStatus, AuditReason, SignatureAuditRecord,
    AUDIT_INFO_BIOMETRY_ALLOWED, AUDIT_INFO_PROXIMITY_CHECK, AUDIT_INFO_VAULT_UNLOCK_REASON,
    BLOCKED_REASON_MAX_FAILED_ATTEMPTS, REASON_NOT_SPECIFIED,
};
pub use application::{generate_credential, Application, ApplicationVersion};
pub use codec::{DataReader, DataWriter, SdkConfiguration, MAX_COUNT};
pub use encryption::{AtRestEncryption, EncryptableField, EncryptionMode, MasterDbKey};
pub use error::{KeywardError, Result};
pub use kdf::{
    counter_data, counter_key, DerivedKey, HkdfKeyDerivation, KeyDerivation, MasterSecret,
    TransportPurpose,
};
pub use keys::KeyPair;
pub use offline::{
    create_offline_payload, verify_offline_payload, OfflineKeyIndicator, OfflinePayload,
};
pub use replay::{unique_value, UniqueValueRecord, UniqueValueType};
pub use signature::{
    compute_signature, salted_data, verify_signature, SignatureFactor, SignatureFormat,
    SignatureType, OFFLINE_APPLICATION_SECRET,
};
pub use totp::ProximityOtp;
pub use vault::{open_vault_key, seal_vault_key};
