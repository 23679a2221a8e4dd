//! Signature verification protocol
//!
//! One verification attempt runs entirely under the activation lock:
//!
//! ```text
//! LOOKUP -> { NOT_FOUND | APP_MISMATCH | BAD_STATE | VERIFY } -> { ACCEPT | BAD_SIGNATURE }
//! ```
//!
//! Every path that finds the activation advances its counter and commits the
//! record together with one audit entry. Key reconstruction happens before any
//! field of the record is touched, so a failure there leaves storage unchanged.
//! The callback notifier is invoked after commit.
//!
//! Online, offline and vault verification share [`SignatureVerifier::verify_attempt`];
//! they differ in how the application secret is resolved, which signature types
//! are tried and what happens after a match.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use keyward_core::{
    salted_data, seal_vault_key, verify_signature, ActivationRecord, ActivationStatus,
    AtRestEncryption, AuditReason, DerivedKey, KeyDerivation, KeywardError, ProximityOtp,
    SignatureAuditRecord, SignatureFormat, SignatureType, TransportPurpose,
    AUDIT_INFO_PROXIMITY_CHECK, BLOCKED_REASON_MAX_FAILED_ATTEMPTS, OFFLINE_APPLICATION_SECRET,
};
use serde::Serialize;

use crate::callback::{ActivationStatusChange, CallbackNotifier};
use crate::error::ServiceError;
use crate::storage::{ActivationStore, ApplicationStore};

/// Error detail reported when the base signature matched but the proximity code did not.
pub const PROXIMITY_CHECK_FAILED: &str = "PROXIMITY_CHECK_FAILED";

/// Verification policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct VerificationPolicy {
    /// Number of counter positions tried, starting at the stored counter
    pub lookahead: u32,
    /// Whether attempts against a non-active activation count as failed attempts
    pub invalid_state_counts_as_failed_attempt: bool,
}

/// Online signature verification request.
#[derive(Debug, Clone)]
pub struct SignatureRequest {
    pub activation_id: String,
    pub application_key: String,
    /// Normalized request data, before salting with the application secret
    pub data: Vec<u8>,
    pub signature: String,
    pub signature_type: SignatureType,
    pub signature_format: SignatureFormat,
}

/// Verdict of one verification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResponse {
    pub signature_valid: bool,
    pub activation_id: String,
    /// `REMOVED` whenever the attempt was rejected before the signature check;
    /// such responses also leave identity and attempt fields empty
    pub activation_status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub user_id: Option<String>,
    pub application_id: Option<String>,
    pub signature_type: SignatureType,
    pub remaining_attempts: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<&'static str>,
}

impl VerificationResponse {
    fn masked(activation_id: &str, signature_type: SignatureType) -> Self {
        Self {
            signature_valid: false,
            activation_id: activation_id.to_string(),
            activation_status: ActivationStatus::Removed,
            blocked_reason: None,
            user_id: None,
            application_id: None,
            signature_type,
            remaining_attempts: 0,
            error_detail: None,
        }
    }
}

/// How the application secret that salts the data is obtained.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ApplicationBinding<'a> {
    /// Resolve by application key; the version must be supported and belong
    /// to the activation's application.
    Online { application_key: &'a str },
    /// Literal offline secret, no application check.
    Offline,
}

/// Extra step applied once the base signature matched.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PostMatch<'a> {
    None,
    Proximity {
        otp: &'a ProximityOtp,
        seed: &'a [u8],
        code: &'a str,
    },
    /// Release the vault key, consuming one more counter position.
    VaultUnlock,
}

pub(crate) struct Attempt<'a> {
    pub activation_id: &'a str,
    pub binding: ApplicationBinding<'a>,
    pub data: &'a [u8],
    pub signature: &'a str,
    /// Tried in order at each counter position; the first is reported on failure.
    pub candidates: &'a [SignatureType],
    pub format: SignatureFormat,
    pub additional_info: BTreeMap<String, String>,
    pub post_match: PostMatch<'a>,
}

pub(crate) struct Outcome {
    pub response: VerificationResponse,
    /// Base64 sealed vault key, present after a successful vault unlock
    pub sealed_vault_key: Option<String>,
}

/// Result of the branch taken under the lock.
struct Verdict {
    valid: bool,
    reason: AuditReason,
    signature_type: SignatureType,
    /// Whether the response masks the real status as `REMOVED`
    masked: bool,
    error_detail: Option<&'static str>,
    sealed_vault_key: Option<String>,
}

impl Verdict {
    fn rejected(reason: AuditReason, signature_type: SignatureType, masked: bool) -> Self {
        Self {
            valid: false,
            reason,
            signature_type,
            masked,
            error_detail: None,
            sealed_vault_key: None,
        }
    }
}

pub struct SignatureVerifier {
    activations: Arc<dyn ActivationStore>,
    applications: Arc<dyn ApplicationStore>,
    kdf: Arc<dyn KeyDerivation>,
    encryption: Arc<AtRestEncryption>,
    notifier: Arc<dyn CallbackNotifier>,
    policy: VerificationPolicy,
}

impl SignatureVerifier {
    pub fn new(
        activations: Arc<dyn ActivationStore>,
        applications: Arc<dyn ApplicationStore>,
        kdf: Arc<dyn KeyDerivation>,
        encryption: Arc<AtRestEncryption>,
        notifier: Arc<dyn CallbackNotifier>,
        policy: VerificationPolicy,
    ) -> Self {
        Self {
            activations,
            applications,
            kdf,
            encryption,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> VerificationPolicy {
        self.policy
    }

    /// Verify an online signature.
    pub async fn verify_signature(
        &self,
        request: &SignatureRequest,
    ) -> Result<VerificationResponse, ServiceError> {
        let outcome = self
            .verify_attempt(Attempt {
                activation_id: &request.activation_id,
                binding: ApplicationBinding::Online {
                    application_key: &request.application_key,
                },
                data: &request.data,
                signature: &request.signature,
                candidates: std::slice::from_ref(&request.signature_type),
                format: request.signature_format,
                additional_info: BTreeMap::new(),
                post_match: PostMatch::None,
            })
            .await?;
        Ok(outcome.response)
    }

    pub(crate) async fn verify_attempt(
        &self,
        attempt: Attempt<'_>,
    ) -> Result<Outcome, ServiceError> {
        let Some(&primary_type) = attempt.candidates.first() else {
            return Err(ServiceError::invalid_request("no signature type to verify"));
        };

        let Some(lock) = self.activations.lock_for_update(attempt.activation_id).await? else {
            tracing::debug!(
                activation_id = %attempt.activation_id,
                "Verification for unknown activation"
            );
            return Ok(Outcome {
                response: VerificationResponse::masked(attempt.activation_id, primary_type),
                sealed_vault_key: None,
            });
        };

        let now = Utc::now();
        let mut record = lock.activation().clone();
        let previous_status = record.status;
        let counter_before = record.counter;

        let application_secret = match attempt.binding {
            ApplicationBinding::Offline => Some(OFFLINE_APPLICATION_SECRET.to_string()),
            ApplicationBinding::Online { application_key } => self
                .applications
                .find_version_by_key(application_key)
                .await?
                .filter(|v| v.supported && v.application_id == record.application_id)
                .map(|v| v.application_secret),
        };
        let signed_data = match &application_secret {
            Some(secret) => salted_data(attempt.data, secret),
            None => attempt.data.to_vec(),
        };

        let verdict = match application_secret {
            None => {
                tracing::warn!(
                    activation_id = %record.activation_id,
                    "Signature with foreign or unsupported application key"
                );
                record.counter = next_counter(record.counter)?;
                if !primary_type.is_possession_only() {
                    register_failure(&mut record, now)?;
                }
                Verdict::rejected(AuditReason::ActivationInvalidApplication, primary_type, true)
            }
            Some(_) if record.status != ActivationStatus::Active => {
                tracing::warn!(
                    activation_id = %record.activation_id,
                    status = %record.status,
                    "Signature for activation in invalid state"
                );
                record.counter = next_counter(record.counter)?;
                if self.policy.invalid_state_counts_as_failed_attempt
                    && !primary_type.is_possession_only()
                {
                    register_failure(&mut record, now)?;
                }
                Verdict::rejected(AuditReason::ActivationInvalidState, primary_type, true)
            }
            Some(_) if record.failed_attempts >= record.max_failed_attempts => {
                tracing::warn!(
                    activation_id = %record.activation_id,
                    failed_attempts = record.failed_attempts,
                    "Active activation over failed-attempt limit, blocking"
                );
                record.counter = next_counter(record.counter)?;
                block(&mut record, now)?;
                Verdict::rejected(
                    AuditReason::ActivationInvalidStateCtrMismatch,
                    primary_type,
                    true,
                )
            }
            Some(_) => self.verify_active(&mut record, &attempt, &signed_data, now)?,
        };

        let mut additional_info = attempt.additional_info;
        if let PostMatch::Proximity { .. } = attempt.post_match {
            let outcome = if verdict.reason == AuditReason::ProximityCheckFailed {
                "FAILED"
            } else if verdict.valid {
                "OK"
            } else {
                "NOT_EVALUATED"
            };
            additional_info.insert(AUDIT_INFO_PROXIMITY_CHECK.to_string(), outcome.to_string());
        }

        let audit = SignatureAuditRecord {
            activation_id: record.activation_id.clone(),
            application_id: record.application_id.clone(),
            user_id: record.user_id.clone(),
            activation_counter: counter_before,
            activation_status: record.status,
            signature_type: verdict.signature_type,
            signature: attempt.signature.to_string(),
            data: signed_data,
            valid: verdict.valid,
            reason: verdict.reason,
            additional_info,
            created_at: now,
        };

        lock.commit(record.clone(), Some(audit)).await?;

        tracing::debug!(
            activation_id = %record.activation_id,
            counter = record.counter,
            valid = verdict.valid,
            reason = verdict.reason.as_str(),
            "Verification committed"
        );

        if record.status != previous_status {
            self.notifier
                .notify_status_change(ActivationStatusChange::of(&record))
                .await;
        }

        // Masked rejections carry no identity or attempt state.
        let response = if verdict.masked {
            VerificationResponse::masked(&record.activation_id, verdict.signature_type)
        } else {
            VerificationResponse {
                signature_valid: verdict.valid,
                activation_id: record.activation_id.clone(),
                activation_status: record.status,
                blocked_reason: record.blocked_reason.clone(),
                user_id: Some(record.user_id.clone()),
                application_id: Some(record.application_id.clone()),
                signature_type: verdict.signature_type,
                remaining_attempts: record.remaining_attempts(),
                error_detail: verdict.error_detail,
            }
        };

        Ok(Outcome {
            response,
            sealed_vault_key: verdict.sealed_vault_key,
        })
    }

    /// Lookahead search and its outcome for an `ACTIVE` activation.
    fn verify_active(
        &self,
        record: &mut ActivationRecord,
        attempt: &Attempt<'_>,
        signed_data: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Verdict, ServiceError> {
        let server_private_key = self
            .encryption
            .decrypt(&record.server_private_key, &record.encryption_context())?;
        let device_public_key = record.device_public_key.as_deref().ok_or_else(|| {
            KeywardError::InvalidKey("activation has no device public key".into())
        })?;
        let master = self
            .kdf
            .derive_master_secret(&server_private_key, device_public_key)?;

        let keyed = attempt
            .candidates
            .iter()
            .map(|&t| Ok((t, self.kdf.derive_signature_keys(&master, t)?)))
            .collect::<Result<Vec<(SignatureType, Vec<DerivedKey>)>, KeywardError>>()?;

        let mut matched = None;
        'window: for offset in 0..u64::from(self.policy.lookahead) {
            let Some(counter) = record.counter.checked_add(offset) else {
                break;
            };
            for (signature_type, keys) in &keyed {
                let signature = attempt.signature;
                if verify_signature(keys, signed_data, signature, counter, attempt.format)? {
                    matched = Some((*signature_type, counter));
                    break 'window;
                }
            }
        }

        let primary_type = keyed[0].0;
        let Some((signature_type, matched_counter)) = matched else {
            tracing::warn!(
                activation_id = %record.activation_id,
                counter = record.counter,
                "Signature does not match"
            );
            record.counter = next_counter(record.counter)?;
            if !primary_type.is_possession_only() {
                register_failure(record, now)?;
            }
            return Ok(Verdict::rejected(
                AuditReason::SignatureDoesNotMatch,
                primary_type,
                false,
            ));
        };

        record.counter = next_counter(matched_counter)?;

        if let PostMatch::Proximity { otp, seed, code } = attempt.post_match {
            if !otp.verify(seed, code, now)? {
                tracing::warn!(activation_id = %record.activation_id, "Proximity check failed");
                if !signature_type.is_possession_only() {
                    register_failure(record, now)?;
                }
                let mut verdict =
                    Verdict::rejected(AuditReason::ProximityCheckFailed, signature_type, false);
                verdict.error_detail = Some(PROXIMITY_CHECK_FAILED);
                return Ok(verdict);
            }
        }

        if !signature_type.is_possession_only() {
            record.failed_attempts = 0;
        }
        record.last_used_at = now;

        let sealed_vault_key = match attempt.post_match {
            PostMatch::VaultUnlock => {
                let transport = self
                    .kdf
                    .derive_transport_key(&master, TransportPurpose::Transport)?;
                let vault = self.kdf.derive_transport_key(&master, TransportPurpose::Vault)?;
                let sealed = seal_vault_key(&transport, &vault, record.counter)?;
                record.counter = next_counter(record.counter)?;
                Some(sealed)
            }
            _ => None,
        };

        tracing::debug!(
            activation_id = %record.activation_id,
            matched_counter,
            signature_type = %signature_type,
            "Signature matched"
        );

        Ok(Verdict {
            valid: true,
            reason: AuditReason::SignatureOk,
            signature_type,
            masked: false,
            error_detail: None,
            sealed_vault_key,
        })
    }
}

fn next_counter(counter: u64) -> Result<u64, ServiceError> {
    counter
        .checked_add(1)
        .ok_or_else(|| KeywardError::Crypto("activation counter exhausted".into()).into())
}

/// Count one failed attempt, blocking an active activation at the limit.
fn register_failure(record: &mut ActivationRecord, now: DateTime<Utc>) -> Result<(), ServiceError> {
    record.failed_attempts = record.failed_attempts.saturating_add(1);
    if record.status == ActivationStatus::Active
        && record.failed_attempts >= record.max_failed_attempts
    {
        tracing::warn!(
            activation_id = %record.activation_id,
            failed_attempts = record.failed_attempts,
            "Maximum failed attempts reached, blocking activation"
        );
        block(record, now)?;
    }
    Ok(())
}

fn block(record: &mut ActivationRecord, now: DateTime<Utc>) -> Result<(), ServiceError> {
    record.transition(ActivationStatus::Blocked, now)?;
    record.blocked_reason = Some(BLOCKED_REASON_MAX_FAILED_ATTEMPTS.to_string());
    Ok(())
}
