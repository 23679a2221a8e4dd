//! Replay guard for the encrypted transport layer
//!
//! Each encrypted request carries an ephemeral public key, a nonce and a
//! timestamp. The guard refuses stale timestamps before touching storage, then
//! records `ephemeral_key || nonce || identifier` with insert-if-absent so that
//! two concurrent requests with the same value yield exactly one acceptance.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyward_core::{unique_value, UniqueValueRecord, UniqueValueType};

use crate::config::ReplayVerificationMode;
use crate::error::ServiceError;
use crate::storage::UniqueValueStore;

/// Parts of one encrypted request that must never be seen twice.
#[derive(Debug, Clone, Copy)]
pub struct UniqueValueClaim<'a> {
    pub value_type: UniqueValueType,
    pub request_timestamp: DateTime<Utc>,
    pub ephemeral_public_key: Option<&'a [u8]>,
    pub nonce: Option<&'a [u8]>,
    pub identifier: Option<&'a str>,
}

#[async_trait]
pub trait ReplayGuard: Send + Sync {
    /// Accept the claim once; stale or repeated claims are rejected.
    async fn check_and_persist_unique_value(
        &self,
        claim: UniqueValueClaim<'_>,
    ) -> Result<(), ServiceError>;
}

/// Enforcing guard backed by a [`UniqueValueStore`].
pub struct DefaultReplayGuard {
    store: Arc<dyn UniqueValueStore>,
    window: chrono::Duration,
}

impl DefaultReplayGuard {
    pub fn new(store: Arc<dyn UniqueValueStore>, window: chrono::Duration) -> Self {
        Self { store, window }
    }
}

#[async_trait]
impl ReplayGuard for DefaultReplayGuard {
    async fn check_and_persist_unique_value(
        &self,
        claim: UniqueValueClaim<'_>,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        if claim.request_timestamp < now - self.window {
            tracing::warn!(timestamp = %claim.request_timestamp, "Stale request rejected");
            return Err(ServiceError::RequestExpired);
        }
        if claim.request_timestamp > now + self.window {
            tracing::warn!(
                timestamp = %claim.request_timestamp,
                "Request from the future rejected"
            );
            return Err(ServiceError::RequestExpired);
        }

        let record = UniqueValueRecord {
            value: unique_value(claim.ephemeral_public_key, claim.nonce, claim.identifier),
            value_type: claim.value_type,
            expires_at: now + self.window,
        };
        if !self.store.insert_unique_value(&record).await? {
            tracing::warn!(value_type = ?claim.value_type, "Replay detected");
            return Err(ServiceError::ReplayDetected);
        }
        Ok(())
    }
}

/// Accepts everything. Selected only by `REPLAY_VERIFICATION=none`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReplayGuard;

#[async_trait]
impl ReplayGuard for NoopReplayGuard {
    async fn check_and_persist_unique_value(
        &self,
        _claim: UniqueValueClaim<'_>,
    ) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Guard for the configured verification mode.
pub fn replay_guard(
    mode: ReplayVerificationMode,
    store: Arc<dyn UniqueValueStore>,
    window: chrono::Duration,
) -> Arc<dyn ReplayGuard> {
    match mode {
        ReplayVerificationMode::Default => Arc::new(DefaultReplayGuard::new(store, window)),
        ReplayVerificationMode::None => {
            tracing::warn!("Replay verification disabled");
            Arc::new(NoopReplayGuard)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn claim(nonce: &[u8], at: DateTime<Utc>) -> UniqueValueClaim<'_> {
        UniqueValueClaim {
            value_type: UniqueValueType::EciesActivationScope,
            request_timestamp: at,
            ephemeral_public_key: Some(b"ephemeral"),
            nonce: Some(nonce),
            identifier: Some("activation-1"),
        }
    }

    fn guard() -> DefaultReplayGuard {
        DefaultReplayGuard::new(Arc::new(MemoryStore::new()), chrono::Duration::seconds(60))
    }

    #[tokio::test]
    async fn test_second_use_is_replay() {
        let guard = guard();
        let now = Utc::now();
        guard.check_and_persist_unique_value(claim(b"n1", now)).await.unwrap();
        assert!(matches!(
            guard.check_and_persist_unique_value(claim(b"n1", now)).await,
            Err(ServiceError::ReplayDetected)
        ));
        guard.check_and_persist_unique_value(claim(b"n2", now)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_and_future_timestamps_rejected() {
        let guard = guard();
        let now = Utc::now();
        assert!(matches!(
            guard
                .check_and_persist_unique_value(claim(b"n", now - chrono::Duration::seconds(120)))
                .await,
            Err(ServiceError::RequestExpired)
        ));
        assert!(matches!(
            guard
                .check_and_persist_unique_value(claim(b"n", now + chrono::Duration::seconds(120)))
                .await,
            Err(ServiceError::RequestExpired)
        ));
    }

    #[tokio::test]
    async fn test_noop_accepts_repeats() {
        let now = Utc::now();
        NoopReplayGuard.check_and_persist_unique_value(claim(b"n", now)).await.unwrap();
        NoopReplayGuard.check_and_persist_unique_value(claim(b"n", now)).await.unwrap();
    }
}
