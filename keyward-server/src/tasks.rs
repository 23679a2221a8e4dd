//! Background tasks
//!
//! Expired unique values are swept on a fixed interval. The sweep runs under a
//! named lease so that only one server instance deletes at a time; the lease
//! TTL equals the interval, so a crashed holder is replaced within one period.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::storage::{LeaseStore, StorageError, UniqueValueStore};

/// Lease guarding the unique value sweep.
pub const UNIQUE_VALUE_CLEANUP_LEASE: &str = "unique-value-cleanup";

/// One sweep. Returns `None` when another instance holds the lease.
pub async fn run_cleanup_once(
    unique_values: &dyn UniqueValueStore,
    leases: &dyn LeaseStore,
    holder: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<Option<u64>, StorageError> {
    if !leases
        .try_acquire_lease(UNIQUE_VALUE_CLEANUP_LEASE, holder, ttl)
        .await?
    {
        tracing::debug!(holder = %holder, "Cleanup lease held elsewhere, skipping sweep");
        return Ok(None);
    }

    let removed = unique_values.delete_expired_unique_values(now).await?;
    if removed > 0 {
        tracing::info!(removed, "Expired unique values removed");
    }
    Ok(Some(removed))
}

/// Spawn the periodic sweep. Abort the handle to stop it.
pub fn spawn_unique_value_cleanup(
    unique_values: Arc<dyn UniqueValueStore>,
    leases: Arc<dyn LeaseStore>,
    holder: String,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = run_cleanup_once(
                unique_values.as_ref(),
                leases.as_ref(),
                &holder,
                interval,
                Utc::now(),
            )
            .await
            {
                tracing::error!(error = %e, "Unique value cleanup failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use keyward_core::{UniqueValueRecord, UniqueValueType};

    #[tokio::test]
    async fn test_only_lease_holder_sweeps() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_unique_value(&UniqueValueRecord {
                value: "old".into(),
                value_type: UniqueValueType::EciesApplicationScope,
                expires_at: now - chrono::Duration::seconds(1),
            })
            .await
            .unwrap();

        let ttl = Duration::from_secs(60);
        assert_eq!(
            run_cleanup_once(&store, &store, "instance-a", ttl, now).await.unwrap(),
            Some(1)
        );
        assert_eq!(
            run_cleanup_once(&store, &store, "instance-b", ttl, now).await.unwrap(),
            None
        );
        assert_eq!(
            run_cleanup_once(&store, &store, "instance-a", ttl, now).await.unwrap(),
            Some(0)
        );
    }
}
