//! In-memory storage backend
//!
//! Every map is a `DashMap`. The per-activation lock is a tokio mutex held for
//! the whole read-modify-write, so concurrent verifications of one activation
//! serialize exactly as they would on a database row lock. Lock entries exist
//! only for stored activations and are dropped once nobody holds or awaits them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use keyward_core::{
    ActivationRecord, Application, ApplicationVersion, SignatureAuditRecord, UniqueValueRecord,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    ActivationLock, ActivationStore, ApplicationStore, LeaseStore, StorageError, UniqueValueStore,
};

struct Lease {
    holder: String,
    locked_until: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryInner {
    activations: DashMap<String, ActivationRecord>,
    activation_locks: DashMap<String, Arc<Mutex<()>>>,
    /// activation_id -> audit records in insertion order
    audit: DashMap<String, Vec<SignatureAuditRecord>>,
    applications: DashMap<String, Application>,
    /// application_key -> version
    versions: DashMap<String, ApplicationVersion>,
    unique_values: DashMap<String, UniqueValueRecord>,
    leases: DashMap<String, Lease>,
}

impl MemoryInner {
    /// Drop the lock entry once nobody holds or waits on it.
    fn prune_lock(&self, activation_id: &str) {
        self.activation_locks
            .remove_if(activation_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Non-persistent backend for development and tests
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored unique values
    pub fn unique_value_count(&self) -> usize {
        self.inner.unique_values.len()
    }

    /// Number of per-activation lock entries currently allocated
    pub fn activation_lock_count(&self) -> usize {
        self.inner.activation_locks.len()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("activations", &self.inner.activations.len())
            .field("applications", &self.inner.applications.len())
            .field("unique_values", &self.inner.unique_values.len())
            .finish()
    }
}

struct MemoryActivationLock {
    guard: Option<OwnedMutexGuard<()>>,
    record: ActivationRecord,
    inner: Arc<MemoryInner>,
}

impl Drop for MemoryActivationLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.inner.prune_lock(&self.record.activation_id);
    }
}

#[async_trait]
impl ActivationLock for MemoryActivationLock {
    fn activation(&self) -> &ActivationRecord {
        &self.record
    }

    async fn commit(
        self: Box<Self>,
        record: ActivationRecord,
        audit: Option<SignatureAuditRecord>,
    ) -> Result<(), StorageError> {
        if record.activation_id != self.record.activation_id {
            return Err(StorageError::Conflict(format!(
                "lock held for {} but commit targets {}",
                self.record.activation_id, record.activation_id
            )));
        }

        if let Some(audit) = audit {
            self.inner
                .audit
                .entry(audit.activation_id.clone())
                .or_default()
                .push(audit);
        }
        self.inner
            .activations
            .insert(record.activation_id.clone(), record);
        Ok(())
    }
}

#[async_trait]
impl ActivationStore for MemoryStore {
    async fn insert_activation(&self, record: &ActivationRecord) -> Result<(), StorageError> {
        match self.inner.activations.entry(record.activation_id.clone()) {
            Entry::Occupied(_) => Err(StorageError::Conflict(format!(
                "activation {} already exists",
                record.activation_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn find_activation(
        &self,
        activation_id: &str,
    ) -> Result<Option<ActivationRecord>, StorageError> {
        Ok(self
            .inner
            .activations
            .get(activation_id)
            .map(|entry| entry.value().clone()))
    }

    async fn lock_for_update(
        &self,
        activation_id: &str,
    ) -> Result<Option<Box<dyn ActivationLock>>, StorageError> {
        if !self.inner.activations.contains_key(activation_id) {
            return Ok(None);
        }

        let mutex = self
            .inner
            .activation_locks
            .entry(activation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;

        let Some(record) = self
            .inner
            .activations
            .get(activation_id)
            .map(|entry| entry.value().clone())
        else {
            drop(guard);
            self.inner.prune_lock(activation_id);
            return Ok(None);
        };

        Ok(Some(Box::new(MemoryActivationLock {
            guard: Some(guard),
            record,
            inner: self.inner.clone(),
        })))
    }

    async fn list_audit_records(
        &self,
        activation_id: &str,
    ) -> Result<Vec<SignatureAuditRecord>, StorageError> {
        Ok(self
            .inner
            .audit
            .get(activation_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn insert_application(&self, application: &Application) -> Result<(), StorageError> {
        if self
            .inner
            .applications
            .iter()
            .any(|entry| entry.value().name == application.name)
        {
            return Err(StorageError::Conflict(format!(
                "application '{}' already exists",
                application.name
            )));
        }
        self.inner
            .applications
            .insert(application.application_id.clone(), application.clone());
        Ok(())
    }

    async fn find_application(
        &self,
        application_id: &str,
    ) -> Result<Option<Application>, StorageError> {
        Ok(self
            .inner
            .applications
            .get(application_id)
            .map(|entry| entry.value().clone()))
    }

    async fn insert_application_version(
        &self,
        version: &ApplicationVersion,
    ) -> Result<(), StorageError> {
        match self.inner.versions.entry(version.application_key.clone()) {
            Entry::Occupied(_) => Err(StorageError::Conflict(
                "application key already in use".into(),
            )),
            Entry::Vacant(slot) => {
                slot.insert(version.clone());
                Ok(())
            }
        }
    }

    async fn find_version_by_key(
        &self,
        application_key: &str,
    ) -> Result<Option<ApplicationVersion>, StorageError> {
        Ok(self
            .inner
            .versions
            .get(application_key)
            .map(|entry| entry.value().clone()))
    }

    async fn list_application_versions(
        &self,
        application_id: &str,
    ) -> Result<Vec<ApplicationVersion>, StorageError> {
        let mut versions: Vec<ApplicationVersion> = self
            .inner
            .versions
            .iter()
            .filter(|entry| entry.value().application_id == application_id)
            .map(|entry| entry.value().clone())
            .collect();
        versions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(versions)
    }

    async fn set_version_supported(
        &self,
        version_id: &str,
        supported: bool,
    ) -> Result<bool, StorageError> {
        for mut entry in self.inner.versions.iter_mut() {
            if entry.value().version_id == version_id {
                entry.value_mut().supported = supported;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl UniqueValueStore for MemoryStore {
    async fn insert_unique_value(&self, record: &UniqueValueRecord) -> Result<bool, StorageError> {
        match self.inner.unique_values.entry(record.value.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn delete_expired_unique_values(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut removed = 0u64;
        self.inner.unique_values.retain(|_, record| {
            let keep = record.expires_at > now;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StorageError::Serialization(format!("lease ttl out of range: {}", e)))?;
        let lease = Lease {
            holder: holder.to_string(),
            locked_until: now + ttl,
        };

        match self.inner.leases.entry(name.to_string()) {
            Entry::Occupied(mut current) => {
                let existing = current.get();
                if existing.holder == holder || existing.locked_until <= now {
                    current.insert(lease);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(lease);
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_core::{ActivationStatus, EncryptableField, EncryptionMode, UniqueValueType};

    fn activation(activation_id: &str) -> ActivationRecord {
        let now = Utc::now();
        ActivationRecord {
            activation_id: activation_id.into(),
            application_id: "app".into(),
            user_id: "user".into(),
            server_private_key: EncryptableField {
                mode: EncryptionMode::NoEncryption,
                data: vec![1; 32],
            },
            server_public_key: vec![2; 33],
            device_public_key: None,
            counter: 0,
            failed_attempts: 0,
            max_failed_attempts: 5,
            status: ActivationStatus::Created,
            blocked_reason: None,
            created_at: now,
            last_used_at: now,
            last_changed_at: now,
            expires_at: now,
        }
    }

    #[tokio::test]
    async fn test_unknown_activation_allocates_no_lock() {
        let store = MemoryStore::new();
        for i in 0..1000 {
            let lock = store.lock_for_update(&format!("missing-{i}")).await.unwrap();
            assert!(lock.is_none());
        }
        assert_eq!(store.activation_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_lock_entry_released_after_commit_or_drop() {
        let store = MemoryStore::new();
        store.insert_activation(&activation("a1")).await.unwrap();

        let lock = store.lock_for_update("a1").await.unwrap().unwrap();
        assert_eq!(store.activation_lock_count(), 1);
        let mut record = lock.activation().clone();
        record.counter = 1;
        lock.commit(record, None).await.unwrap();
        assert_eq!(store.activation_lock_count(), 0);
        assert_eq!(store.find_activation("a1").await.unwrap().unwrap().counter, 1);

        let lock = store.lock_for_update("a1").await.unwrap().unwrap();
        drop(lock);
        assert_eq!(store.activation_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_lock_entry_kept_while_contended() {
        let store = MemoryStore::new();
        store.insert_activation(&activation("a1")).await.unwrap();

        let first = store.lock_for_update("a1").await.unwrap().unwrap();
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let lock = store.lock_for_update("a1").await.unwrap().unwrap();
                lock.activation().counter
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut record = first.activation().clone();
        record.counter = 7;
        first.commit(record, None).await.unwrap();

        assert_eq!(waiter.await.unwrap(), 7);
        assert_eq!(store.activation_lock_count(), 0);
    }

    fn unique(value: &str, expires_at: DateTime<Utc>) -> UniqueValueRecord {
        UniqueValueRecord {
            value: value.into(),
            value_type: UniqueValueType::EciesApplicationScope,
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_unique_value_insert_if_absent() {
        let store = MemoryStore::new();
        let expires = Utc::now() + chrono::Duration::seconds(60);
        assert!(store.insert_unique_value(&unique("v", expires)).await.unwrap());
        assert!(!store.insert_unique_value(&unique("v", expires)).await.unwrap());
        assert_eq!(store.unique_value_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_expired_unique_values() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_unique_value(&unique("old", now - chrono::Duration::seconds(1)))
            .await
            .unwrap();
        store
            .insert_unique_value(&unique("fresh", now + chrono::Duration::seconds(60)))
            .await
            .unwrap();

        assert_eq!(store.delete_expired_unique_values(now).await.unwrap(), 1);
        assert_eq!(store.unique_value_count(), 1);
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_until_expiry() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.try_acquire_lease("sweep", "a", ttl).await.unwrap());
        assert!(store.try_acquire_lease("sweep", "a", ttl).await.unwrap(), "renewal");
        assert!(!store.try_acquire_lease("sweep", "b", ttl).await.unwrap());

        assert!(store.try_acquire_lease("sweep-2", "b", Duration::ZERO).await.unwrap());
        assert!(store.try_acquire_lease("sweep-2", "a", ttl).await.unwrap(), "expired lease");
    }
}
