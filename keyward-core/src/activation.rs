//! Activation records and the lifecycle state machine

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encryption::EncryptableField;
use crate::error::{KeywardError, Result};
use crate::signature::SignatureType;

/// Blocked reason set by the automatic failed-attempt policy.
pub const BLOCKED_REASON_MAX_FAILED_ATTEMPTS: &str = "MAX_FAILED_ATTEMPTS";

/// Reason used when a caller does not supply one.
pub const REASON_NOT_SPECIFIED: &str = "NOT_SPECIFIED";

/// Lifecycle state of an activation.
///
/// ```text
/// CREATED -> OTP_USED -> ACTIVE <-> BLOCKED
///    \__________\__________\__________\____> REMOVED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationStatus {
    Created,
    OtpUsed,
    Active,
    Blocked,
    Removed,
}

impl ActivationStatus {
    pub fn can_transition_to(self, next: ActivationStatus) -> bool {
        use ActivationStatus::*;
        matches!(
            (self, next),
            (Created, OtpUsed)
                | (OtpUsed, Active)
                | (Active, Blocked)
                | (Blocked, Active)
                | (Created | OtpUsed | Active | Blocked, Removed)
        )
    }

    /// Not yet committed; subject to the activation validity period.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Created | Self::OtpUsed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::OtpUsed => "OTP_USED",
            Self::Active => "ACTIVE",
            Self::Blocked => "BLOCKED",
            Self::Removed => "REMOVED",
        }
    }
}

impl std::fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ActivationStatus> for i16 {
    fn from(value: ActivationStatus) -> Self {
        match value {
            ActivationStatus::Created => 1,
            ActivationStatus::OtpUsed => 2,
            ActivationStatus::Active => 3,
            ActivationStatus::Blocked => 4,
            ActivationStatus::Removed => 5,
        }
    }
}

impl TryFrom<i16> for ActivationStatus {
    type Error = KeywardError;

    fn try_from(value: i16) -> Result<Self> {
        match value {
            1 => Ok(Self::Created),
            2 => Ok(Self::OtpUsed),
            3 => Ok(Self::Active),
            4 => Ok(Self::Blocked),
            5 => Ok(Self::Removed),
            other => Err(KeywardError::UnmappedValue {
                kind: "activation status",
                value: other.into(),
            }),
        }
    }
}

/// One enrolled device credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRecord {
    pub activation_id: String,
    pub application_id: String,
    pub user_id: String,
    /// Sealed with context [`ActivationRecord::encryption_context`].
    pub server_private_key: EncryptableField,
    pub server_public_key: Vec<u8>,
    /// Set once by the key exchange, immutable afterwards.
    pub device_public_key: Option<Vec<u8>>,
    pub counter: u64,
    pub failed_attempts: u64,
    pub max_failed_attempts: u64,
    pub status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub last_changed_at: DateTime<Utc>,
    /// Deadline for reaching `ACTIVE`.
    pub expires_at: DateTime<Utc>,
}

impl ActivationRecord {
    /// Context strings binding the server private key to this record.
    pub fn encryption_context(&self) -> [&str; 2] {
        [self.user_id.as_str(), self.activation_id.as_str()]
    }

    pub fn remaining_attempts(&self) -> u64 {
        self.max_failed_attempts.saturating_sub(self.failed_attempts)
    }

    pub fn is_pending_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.is_pending() && now > self.expires_at
    }

    /// Apply a status change, stamping the change time.
    pub fn transition(&mut self, next: ActivationStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(KeywardError::InvalidTransition {
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        self.last_changed_at = now;
        Ok(())
    }
}

/// Reason code stored with each audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditReason {
    SignatureOk,
    SignatureDoesNotMatch,
    ActivationInvalidApplication,
    ActivationInvalidState,
    ActivationInvalidStateCtrMismatch,
    ProximityCheckFailed,
}

impl AuditReason {
    pub const ALL: [AuditReason; 6] = [
        Self::SignatureOk,
        Self::SignatureDoesNotMatch,
        Self::ActivationInvalidApplication,
        Self::ActivationInvalidState,
        Self::ActivationInvalidStateCtrMismatch,
        Self::ProximityCheckFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignatureOk => "signature_ok",
            Self::SignatureDoesNotMatch => "signature_does_not_match",
            Self::ActivationInvalidApplication => "activation_invalid_application",
            Self::ActivationInvalidState => "activation_invalid_state",
            Self::ActivationInvalidStateCtrMismatch => "activation_invalid_state_ctr_mismatch",
            Self::ProximityCheckFailed => "proximity_check_failed",
        }
    }
}

impl std::str::FromStr for AuditReason {
    type Err = KeywardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| KeywardError::Encoding(format!("unknown audit reason '{}'", s)))
    }
}

/// Additional-info key: whether offline verification accepted biometry.
pub const AUDIT_INFO_BIOMETRY_ALLOWED: &str = "BIOMETRY_ALLOWED";
/// Additional-info key: caller-supplied vault unlock reason.
pub const AUDIT_INFO_VAULT_UNLOCK_REASON: &str = "VAULT_UNLOCK_REASON";
/// Additional-info key: outcome of the proximity check.
pub const AUDIT_INFO_PROXIMITY_CHECK: &str = "PROXIMITY_CHECK";

/// Append-only record of one verification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureAuditRecord {
    pub activation_id: String,
    pub application_id: String,
    pub user_id: String,
    /// Counter before the attempt was applied.
    pub activation_counter: u64,
    pub activation_status: ActivationStatus,
    pub signature_type: SignatureType,
    pub signature: String,
    /// Data as verified, already salted.
    pub data: Vec<u8>,
    pub valid: bool,
    pub reason: AuditReason,
    pub additional_info: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}
