//! Application state module
//!
//! Wires the protocol services to one storage backend. Every service receives
//! the narrow capabilities it uses; there is no global registry.

use std::sync::Arc;

use keyward_core::{AtRestEncryption, HkdfKeyDerivation, KeyDerivation, ProximityOtp};

use crate::application::ApplicationService;
use crate::callback::CallbackNotifier;
use crate::config::{Config, ConfigError};
use crate::error::ServiceError;
use crate::lifecycle::{ActivationService, LifecycleSettings};
use crate::offline::OfflineSignatureService;
use crate::replay::{replay_guard, ReplayGuard};
use crate::signature::{SignatureVerifier, VerificationPolicy};
use crate::storage::Storage;
use crate::vault::VaultService;

/// Shared services, cheap to clone into handlers and tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Arc<Storage>,
    pub activations: Arc<ActivationService>,
    pub applications: Arc<ApplicationService>,
    pub signatures: Arc<SignatureVerifier>,
    pub offline: Arc<OfflineSignatureService>,
    pub vault: Arc<VaultService>,
    pub replay: Arc<dyn ReplayGuard>,
}

impl AppState {
    pub fn build(
        config: Config,
        storage: Storage,
        notifier: Arc<dyn CallbackNotifier>,
    ) -> Result<Self, ServiceError> {
        let encryption = Arc::new(AtRestEncryption::new(
            config.master_db_encryption_key.clone(),
        ));
        let kdf: Arc<dyn KeyDerivation> = Arc::new(HkdfKeyDerivation);
        let proximity_otp = ProximityOtp::new(
            config.proximity_otp_length,
            config.proximity_step_secs,
            config.proximity_step_count,
        )
        .map_err(|e| ConfigError::invalid("PROXIMITY_OTP", e.to_string()))?;
        let window = chrono::Duration::from_std(config.request_expiration)
            .map_err(|e| ConfigError::invalid("REQUEST_EXPIRATION_MS", e.to_string()))?;
        let activation_validity = chrono::Duration::from_std(config.activation_validity)
            .map_err(|e| ConfigError::invalid("ACTIVATION_VALIDITY_MS", e.to_string()))?;

        let activation_store = storage.activations();
        let application_store = storage.applications();

        let signatures = Arc::new(SignatureVerifier::new(
            activation_store.clone(),
            application_store.clone(),
            kdf,
            encryption.clone(),
            notifier.clone(),
            VerificationPolicy {
                lookahead: config.signature_validation_lookahead,
                invalid_state_counts_as_failed_attempt: config
                    .invalid_state_counts_as_failed_attempt,
            },
        ));

        Ok(Self {
            activations: Arc::new(ActivationService::new(
                activation_store.clone(),
                application_store.clone(),
                encryption.clone(),
                notifier,
                LifecycleSettings {
                    max_failed_attempts: config.max_failed_attempts,
                    activation_validity,
                },
            )),
            applications: Arc::new(ApplicationService::new(
                application_store.clone(),
                encryption.clone(),
            )),
            offline: Arc::new(OfflineSignatureService::new(
                signatures.clone(),
                activation_store,
                application_store,
                encryption,
                proximity_otp,
            )),
            vault: Arc::new(VaultService::new(signatures.clone())),
            replay: replay_guard(config.replay_verification, storage.unique_values(), window),
            signatures,
            storage: Arc::new(storage),
            config: Arc::new(config),
        })
    }

    /// In-memory state with log-only notifications.
    pub fn in_memory(config: Config) -> Result<Self, ServiceError> {
        Self::build(
            config,
            Storage::in_memory(),
            Arc::new(crate::callback::TracingNotifier),
        )
    }
}
