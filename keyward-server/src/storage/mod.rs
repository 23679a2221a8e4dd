//! Persistence capability
//!
//! The protocol services depend on four narrow traits:
//! - [`ActivationStore`]: activation records, the per-activation exclusive lock
//!   and the append-only signature audit trail
//! - [`ApplicationStore`]: applications and application versions
//! - [`UniqueValueStore`]: replay guard values with atomic insert-if-absent
//! - [`LeaseStore`]: named leases that keep background sweeps single-instance
//!
//! Two backends implement all of them: PostgreSQL (production, row locks via
//! `SELECT ... FOR UPDATE`) and an in-memory backend built on `DashMap` with a
//! tokio mutex per activation. If `DATABASE_URL` is not set the server falls
//! back to memory (useful for development, but data is lost on restart).

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyward_core::{
    ActivationRecord, Application, ApplicationVersion, SignatureAuditRecord, UniqueValueRecord,
};

use crate::config::Config;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Exclusive hold on one activation, from lookup until commit.
///
/// Dropping the lock without calling [`ActivationLock::commit`] discards every
/// change (the transaction rolls back).
#[async_trait]
pub trait ActivationLock: Send {
    /// Record as read under the lock
    fn activation(&self) -> &ActivationRecord;

    /// Persist the updated record and its audit entry atomically, then release the lock
    async fn commit(
        self: Box<Self>,
        record: ActivationRecord,
        audit: Option<SignatureAuditRecord>,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait ActivationStore: Send + Sync {
    async fn insert_activation(&self, record: &ActivationRecord) -> Result<(), StorageError>;

    /// Unlocked read
    async fn find_activation(
        &self,
        activation_id: &str,
    ) -> Result<Option<ActivationRecord>, StorageError>;

    /// Acquire the per-activation exclusive lock and read the record under it
    async fn lock_for_update(
        &self,
        activation_id: &str,
    ) -> Result<Option<Box<dyn ActivationLock>>, StorageError>;

    /// Audit trail of one activation in insertion order
    async fn list_audit_records(
        &self,
        activation_id: &str,
    ) -> Result<Vec<SignatureAuditRecord>, StorageError>;
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn insert_application(&self, application: &Application) -> Result<(), StorageError>;

    async fn find_application(
        &self,
        application_id: &str,
    ) -> Result<Option<Application>, StorageError>;

    async fn insert_application_version(
        &self,
        version: &ApplicationVersion,
    ) -> Result<(), StorageError>;

    async fn find_version_by_key(
        &self,
        application_key: &str,
    ) -> Result<Option<ApplicationVersion>, StorageError>;

    async fn list_application_versions(
        &self,
        application_id: &str,
    ) -> Result<Vec<ApplicationVersion>, StorageError>;

    /// Returns `false` when the version does not exist
    async fn set_version_supported(
        &self,
        version_id: &str,
        supported: bool,
    ) -> Result<bool, StorageError>;
}

#[async_trait]
pub trait UniqueValueStore: Send + Sync {
    /// Atomic insert-if-absent; `false` means the value was already present
    async fn insert_unique_value(&self, record: &UniqueValueRecord) -> Result<bool, StorageError>;

    /// Delete values whose expiration is at or before `now`; returns the number removed
    async fn delete_expired_unique_values(&self, now: DateTime<Utc>) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take or renew the named lease for `holder` until `now + ttl`.
    /// Fails (returns `false`) while another holder's lease is still valid.
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError>;
}

/// Storage backend
enum StorageBackend {
    /// PostgreSQL storage (production)
    Postgres(Arc<PostgresStore>),
    /// In-memory storage (development fallback)
    Memory(Arc<MemoryStore>),
}

/// Handle to the configured backend
pub struct Storage {
    backend: StorageBackend,
}

impl Storage {
    /// Create storage with PostgreSQL backend
    pub async fn with_postgres(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, StorageError> {
        let store = PostgresStore::connect(database_url, max_connections, min_connections).await?;
        store.migrate().await?;

        Ok(Self {
            backend: StorageBackend::Postgres(Arc::new(store)),
        })
    }

    /// Create storage with in-memory backend (development only)
    pub fn in_memory() -> Self {
        tracing::warn!("Using in-memory storage - activations will be lost on restart!");
        Self {
            backend: StorageBackend::Memory(Arc::new(MemoryStore::new())),
        }
    }

    /// Create storage from configuration
    ///
    /// Uses PostgreSQL if a database URL is configured, otherwise falls back to in-memory.
    pub async fn from_config(config: &Config) -> Result<Self, StorageError> {
        match &config.database_url {
            Some(url) => {
                tracing::info!("Using PostgreSQL storage");
                Self::with_postgres(
                    url,
                    config.database_max_connections,
                    config.database_min_connections,
                )
                .await
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory storage");
                Ok(Self::in_memory())
            }
        }
    }

    /// Check if using persistent storage
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Postgres(_))
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            StorageBackend::Postgres(_) => "postgres",
            StorageBackend::Memory(_) => "memory",
        }
    }

    /// Check database health (always Ok for memory backend)
    pub async fn check_health(&self) -> Result<(), StorageError> {
        match &self.backend {
            StorageBackend::Postgres(pg) => pg.check_health().await,
            StorageBackend::Memory(_) => Ok(()),
        }
    }

    pub fn activations(&self) -> Arc<dyn ActivationStore> {
        match &self.backend {
            StorageBackend::Postgres(pg) => pg.clone(),
            StorageBackend::Memory(mem) => mem.clone(),
        }
    }

    pub fn applications(&self) -> Arc<dyn ApplicationStore> {
        match &self.backend {
            StorageBackend::Postgres(pg) => pg.clone(),
            StorageBackend::Memory(mem) => mem.clone(),
        }
    }

    pub fn unique_values(&self) -> Arc<dyn UniqueValueStore> {
        match &self.backend {
            StorageBackend::Postgres(pg) => pg.clone(),
            StorageBackend::Memory(mem) => mem.clone(),
        }
    }

    pub fn leases(&self) -> Arc<dyn LeaseStore> {
        match &self.backend {
            StorageBackend::Postgres(pg) => pg.clone(),
            StorageBackend::Memory(mem) => mem.clone(),
        }
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("backend", &self.backend_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_storage() {
        let storage = Storage::in_memory();
        assert!(!storage.is_persistent());
        assert_eq!(storage.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_memory_health_check() {
        let storage = Storage::in_memory();
        assert!(storage.check_health().await.is_ok());
    }
}
