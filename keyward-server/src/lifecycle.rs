//! Activation lifecycle service
//!
//! ```text
//! create -> CREATED -- prepare --> OTP_USED -- commit --> ACTIVE <-- block/unblock --> BLOCKED
//! ```
//!
//! Every mutation runs under the per-activation lock. Pending activations that
//! outlive their validity period are removed on the next access. Status changes
//! are reported to the callback notifier after the lock is released.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use keyward_core::keys::decode_public_key;
use keyward_core::{
    ActivationRecord, ActivationStatus, AtRestEncryption, KeyPair, SignatureAuditRecord,
    REASON_NOT_SPECIFIED,
};
use serde::Serialize;

use crate::callback::{ActivationStatusChange, CallbackNotifier};
use crate::error::ServiceError;
use crate::storage::{ActivationLock, ActivationStore, ApplicationStore};

/// Defaults applied to new activations.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleSettings {
    pub max_failed_attempts: u64,
    pub activation_validity: chrono::Duration,
}

/// Result of [`ActivationService::create_activation`].
#[derive(Debug, Clone, Serialize)]
pub struct CreatedActivation {
    pub activation_id: String,
    pub user_id: String,
    pub application_id: String,
    /// SEC1 compressed server public key for the key exchange
    pub server_public_key: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

/// Snapshot returned by status queries and lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationStatusInfo {
    pub activation_id: String,
    pub application_id: String,
    pub user_id: String,
    pub status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub counter: u64,
    pub failed_attempts: u64,
    pub max_failed_attempts: u64,
    pub remaining_attempts: u64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub last_changed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&ActivationRecord> for ActivationStatusInfo {
    fn from(record: &ActivationRecord) -> Self {
        Self {
            activation_id: record.activation_id.clone(),
            application_id: record.application_id.clone(),
            user_id: record.user_id.clone(),
            status: record.status,
            blocked_reason: record.blocked_reason.clone(),
            counter: record.counter,
            failed_attempts: record.failed_attempts,
            max_failed_attempts: record.max_failed_attempts,
            remaining_attempts: record.remaining_attempts(),
            created_at: record.created_at,
            last_used_at: record.last_used_at,
            last_changed_at: record.last_changed_at,
            expires_at: record.expires_at,
        }
    }
}

pub struct ActivationService {
    activations: Arc<dyn ActivationStore>,
    applications: Arc<dyn ApplicationStore>,
    encryption: Arc<AtRestEncryption>,
    notifier: Arc<dyn CallbackNotifier>,
    settings: LifecycleSettings,
}

impl ActivationService {
    pub fn new(
        activations: Arc<dyn ActivationStore>,
        applications: Arc<dyn ApplicationStore>,
        encryption: Arc<AtRestEncryption>,
        notifier: Arc<dyn CallbackNotifier>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            activations,
            applications,
            encryption,
            notifier,
            settings,
        }
    }

    /// Enroll a new activation in `CREATED` with a fresh server keypair.
    pub async fn create_activation(
        &self,
        user_id: &str,
        application_id: &str,
        max_failed_attempts: Option<u64>,
    ) -> Result<CreatedActivation, ServiceError> {
        if user_id.trim().is_empty() {
            return Err(ServiceError::invalid_request("user id must not be empty"));
        }
        let max_failed_attempts = max_failed_attempts.unwrap_or(self.settings.max_failed_attempts);
        if max_failed_attempts == 0 {
            return Err(ServiceError::invalid_request(
                "max failed attempts must be at least 1",
            ));
        }
        if self.applications.find_application(application_id).await?.is_none() {
            return Err(ServiceError::ApplicationNotFound(application_id.to_string()));
        }

        let now = Utc::now();
        let activation_id = uuid::Uuid::new_v4().to_string();
        let key_pair = KeyPair::generate();
        let server_private_key = self
            .encryption
            .encrypt(key_pair.private_key(), &[user_id, activation_id.as_str()])?;

        let record = ActivationRecord {
            activation_id: activation_id.clone(),
            application_id: application_id.to_string(),
            user_id: user_id.to_string(),
            server_private_key,
            server_public_key: key_pair.public_key().to_vec(),
            device_public_key: None,
            counter: 0,
            failed_attempts: 0,
            max_failed_attempts,
            status: ActivationStatus::Created,
            blocked_reason: None,
            created_at: now,
            last_used_at: now,
            last_changed_at: now,
            expires_at: now + self.settings.activation_validity,
        };
        self.activations.insert_activation(&record).await?;

        tracing::info!(
            activation_id = %activation_id,
            application_id = %application_id,
            "Activation created"
        );

        Ok(CreatedActivation {
            activation_id,
            user_id: record.user_id,
            application_id: record.application_id,
            server_public_key: record.server_public_key,
            expires_at: record.expires_at,
        })
    }

    /// Key exchange: store the device public key and move to `OTP_USED`.
    ///
    /// A key that does not decode as a P-256 point removes the activation.
    pub async fn prepare_activation(
        &self,
        activation_id: &str,
        device_public_key: &[u8],
    ) -> Result<ActivationStatusInfo, ServiceError> {
        let now = Utc::now();
        let lock = self.lock(activation_id).await?;
        let mut record = lock.activation().clone();
        let lock = self.expire_pending(lock, &mut record, now).await?;

        if record.status != ActivationStatus::Created {
            return Err(invalid_state(&record));
        }

        if let Err(e) = decode_public_key(device_public_key) {
            tracing::warn!(activation_id = %activation_id, error = %e, "Invalid device public key");
            record.transition(ActivationStatus::Removed, now)?;
            self.commit(lock, &record).await?;
            return Err(e.into());
        }

        record.device_public_key = Some(device_public_key.to_vec());
        record.transition(ActivationStatus::OtpUsed, now)?;
        self.commit(lock, &record).await?;
        Ok((&record).into())
    }

    pub async fn commit_activation(
        &self,
        activation_id: &str,
    ) -> Result<ActivationStatusInfo, ServiceError> {
        let now = Utc::now();
        let lock = self.lock(activation_id).await?;
        let mut record = lock.activation().clone();
        let lock = self.expire_pending(lock, &mut record, now).await?;

        if record.status != ActivationStatus::OtpUsed {
            return Err(invalid_state(&record));
        }
        record.transition(ActivationStatus::Active, now)?;
        self.commit(lock, &record).await?;
        Ok((&record).into())
    }

    /// Block an active activation. Already blocked activations are left as they are.
    pub async fn block_activation(
        &self,
        activation_id: &str,
        reason: Option<&str>,
    ) -> Result<ActivationStatusInfo, ServiceError> {
        let now = Utc::now();
        let lock = self.lock(activation_id).await?;
        let mut record = lock.activation().clone();

        match record.status {
            ActivationStatus::Blocked => return Ok((&record).into()),
            ActivationStatus::Active => {}
            _ => return Err(invalid_state(&record)),
        }

        record.transition(ActivationStatus::Blocked, now)?;
        record.blocked_reason = Some(reason.unwrap_or(REASON_NOT_SPECIFIED).to_string());
        self.commit(lock, &record).await?;
        Ok((&record).into())
    }

    /// Return a blocked activation to `ACTIVE` with a clean failed-attempt count.
    pub async fn unblock_activation(
        &self,
        activation_id: &str,
    ) -> Result<ActivationStatusInfo, ServiceError> {
        let now = Utc::now();
        let lock = self.lock(activation_id).await?;
        let mut record = lock.activation().clone();

        match record.status {
            ActivationStatus::Active => return Ok((&record).into()),
            ActivationStatus::Blocked => {}
            _ => return Err(invalid_state(&record)),
        }

        record.transition(ActivationStatus::Active, now)?;
        record.blocked_reason = None;
        record.failed_attempts = 0;
        self.commit(lock, &record).await?;
        Ok((&record).into())
    }

    pub async fn remove_activation(
        &self,
        activation_id: &str,
    ) -> Result<ActivationStatusInfo, ServiceError> {
        let now = Utc::now();
        let lock = self.lock(activation_id).await?;
        let mut record = lock.activation().clone();

        if record.status != ActivationStatus::Removed {
            record.transition(ActivationStatus::Removed, now)?;
            self.commit(lock, &record).await?;
        }
        Ok((&record).into())
    }

    /// Current status. An expired pending activation is removed first.
    pub async fn get_activation_status(
        &self,
        activation_id: &str,
    ) -> Result<ActivationStatusInfo, ServiceError> {
        let now = Utc::now();
        let record = self
            .activations
            .find_activation(activation_id)
            .await?
            .ok_or_else(|| ServiceError::ActivationNotFound(activation_id.to_string()))?;
        if !record.is_pending_expired(now) {
            return Ok((&record).into());
        }

        let lock = self.lock(activation_id).await?;
        let mut record = lock.activation().clone();
        if record.is_pending_expired(now) {
            self.remove_expired(lock, &mut record, now).await?;
        }
        Ok((&record).into())
    }

    /// Audit trail in insertion order.
    pub async fn list_signature_audit(
        &self,
        activation_id: &str,
    ) -> Result<Vec<SignatureAuditRecord>, ServiceError> {
        if self.activations.find_activation(activation_id).await?.is_none() {
            return Err(ServiceError::ActivationNotFound(activation_id.to_string()));
        }
        Ok(self.activations.list_audit_records(activation_id).await?)
    }

    async fn lock(&self, activation_id: &str) -> Result<Box<dyn ActivationLock>, ServiceError> {
        self.activations
            .lock_for_update(activation_id)
            .await?
            .ok_or_else(|| ServiceError::ActivationNotFound(activation_id.to_string()))
    }

    /// Hands the lock back while the activation is still within its validity period.
    async fn expire_pending(
        &self,
        lock: Box<dyn ActivationLock>,
        record: &mut ActivationRecord,
        now: DateTime<Utc>,
    ) -> Result<Box<dyn ActivationLock>, ServiceError> {
        if !record.is_pending_expired(now) {
            return Ok(lock);
        }
        self.remove_expired(lock, record, now).await?;
        Err(ServiceError::ActivationExpired(record.activation_id.clone()))
    }

    async fn remove_expired(
        &self,
        lock: Box<dyn ActivationLock>,
        record: &mut ActivationRecord,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        tracing::info!(activation_id = %record.activation_id, "Pending activation expired");
        record.transition(ActivationStatus::Removed, now)?;
        self.commit(lock, record).await
    }

    async fn commit(
        &self,
        lock: Box<dyn ActivationLock>,
        record: &ActivationRecord,
    ) -> Result<(), ServiceError> {
        let previous = lock.activation().status;
        lock.commit(record.clone(), None).await?;

        if record.status != previous {
            tracing::debug!(
                activation_id = %record.activation_id,
                from = %previous,
                to = %record.status,
                "Transition committed"
            );
            self.notifier
                .notify_status_change(ActivationStatusChange::of(record))
                .await;
        }
        Ok(())
    }
}

fn invalid_state(record: &ActivationRecord) -> ServiceError {
    ServiceError::InvalidActivationState {
        activation_id: record.activation_id.clone(),
        status: record.status,
    }
}
