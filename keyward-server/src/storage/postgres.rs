//! PostgreSQL storage backend
//!
//! `lock_for_update` opens a transaction and takes a row lock with
//! `SELECT ... FOR UPDATE`; the transaction is committed together with the
//! audit insert, or rolled back when the lock is dropped.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyward_core::{
    ActivationRecord, ActivationStatus, Application, ApplicationVersion, AuditReason,
    EncryptableField, EncryptionMode, SignatureAuditRecord, SignatureType, UniqueValueRecord,
};
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::types::Json;
use sqlx::{PgPool, Transaction};

use super::{
    ActivationLock, ActivationStore, ApplicationStore, LeaseStore, StorageError, UniqueValueStore,
};

const UNIQUE_VIOLATION: &str = "23505";

const ACTIVATION_COLUMNS: &str = r#"
    activation_id, application_id, user_id,
    server_private_key, server_private_key_encryption, server_public_key, device_public_key,
    counter, failed_attempts, max_failed_attempts, status, blocked_reason,
    created_at, last_used_at, last_changed_at, expires_at
"#;

fn query_error(e: sqlx::Error) -> StorageError {
    let unique_violation = e
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION);
    if unique_violation {
        StorageError::Conflict(e.to_string())
    } else {
        StorageError::Query(e.to_string())
    }
}

fn to_i64(value: u64, column: &str) -> Result<i64, StorageError> {
    i64::try_from(value)
        .map_err(|_| StorageError::Serialization(format!("{} out of range: {}", column, value)))
}

fn to_u64(value: i64, column: &str) -> Result<u64, StorageError> {
    u64::try_from(value)
        .map_err(|_| StorageError::Serialization(format!("{} is negative: {}", column, value)))
}

fn decode<T, E: std::fmt::Display>(value: Result<T, E>) -> Result<T, StorageError> {
    value.map_err(|e| StorageError::Serialization(e.to_string()))
}

/// PostgreSQL-backed storage
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        tracing::info!("Connected to PostgreSQL database");
        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Check database connection health
    pub async fn check_health(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }
}

struct PostgresActivationLock {
    tx: Transaction<'static, Postgres>,
    record: ActivationRecord,
}

#[async_trait]
impl ActivationLock for PostgresActivationLock {
    fn activation(&self) -> &ActivationRecord {
        &self.record
    }

    async fn commit(
        self: Box<Self>,
        record: ActivationRecord,
        audit: Option<SignatureAuditRecord>,
    ) -> Result<(), StorageError> {
        let PostgresActivationLock { mut tx, record: locked } = *self;
        if record.activation_id != locked.activation_id {
            return Err(StorageError::Conflict(format!(
                "lock held for {} but commit targets {}",
                locked.activation_id, record.activation_id
            )));
        }

        sqlx::query(
            r#"
            UPDATE activations
            SET device_public_key = $2, counter = $3, failed_attempts = $4,
                max_failed_attempts = $5, status = $6, blocked_reason = $7,
                last_used_at = $8, last_changed_at = $9
            WHERE activation_id = $1
            "#,
        )
        .bind(&record.activation_id)
        .bind(record.device_public_key.as_deref())
        .bind(to_i64(record.counter, "counter")?)
        .bind(to_i64(record.failed_attempts, "failed_attempts")?)
        .bind(to_i64(record.max_failed_attempts, "max_failed_attempts")?)
        .bind(i16::from(record.status))
        .bind(record.blocked_reason.as_deref())
        .bind(record.last_used_at)
        .bind(record.last_changed_at)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if let Some(audit) = audit {
            sqlx::query(
                r#"
                INSERT INTO signature_audit
                    (activation_id, application_id, user_id, activation_counter,
                     activation_status, signature_type, signature, data, valid,
                     reason, additional_info, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(&audit.activation_id)
            .bind(&audit.application_id)
            .bind(&audit.user_id)
            .bind(to_i64(audit.activation_counter, "activation_counter")?)
            .bind(i16::from(audit.activation_status))
            .bind(i16::from(audit.signature_type))
            .bind(&audit.signature)
            .bind(&audit.data)
            .bind(audit.valid)
            .bind(audit.reason.as_str())
            .bind(Json(&audit.additional_info))
            .bind(audit.created_at)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        }

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }
}

#[async_trait]
impl ActivationStore for PostgresStore {
    async fn insert_activation(&self, record: &ActivationRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO activations
                (activation_id, application_id, user_id,
                 server_private_key, server_private_key_encryption, server_public_key,
                 device_public_key, counter, failed_attempts, max_failed_attempts,
                 status, blocked_reason, created_at, last_used_at, last_changed_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(&record.activation_id)
        .bind(&record.application_id)
        .bind(&record.user_id)
        .bind(&record.server_private_key.data)
        .bind(i16::from(record.server_private_key.mode))
        .bind(&record.server_public_key)
        .bind(record.device_public_key.as_deref())
        .bind(to_i64(record.counter, "counter")?)
        .bind(to_i64(record.failed_attempts, "failed_attempts")?)
        .bind(to_i64(record.max_failed_attempts, "max_failed_attempts")?)
        .bind(i16::from(record.status))
        .bind(record.blocked_reason.as_deref())
        .bind(record.created_at)
        .bind(record.last_used_at)
        .bind(record.last_changed_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        tracing::debug!(activation_id = %record.activation_id, "Activation stored in database");
        Ok(())
    }

    async fn find_activation(
        &self,
        activation_id: &str,
    ) -> Result<Option<ActivationRecord>, StorageError> {
        let row = sqlx::query_as::<_, ActivationRow>(&format!(
            "SELECT {} FROM activations WHERE activation_id = $1",
            ACTIVATION_COLUMNS
        ))
        .bind(activation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.map(ActivationRow::into_record).transpose()
    }

    async fn lock_for_update(
        &self,
        activation_id: &str,
    ) -> Result<Option<Box<dyn ActivationLock>>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        let row = sqlx::query_as::<_, ActivationRow>(&format!(
            "SELECT {} FROM activations WHERE activation_id = $1 FOR UPDATE",
            ACTIVATION_COLUMNS
        ))
        .bind(activation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => Ok(Some(Box::new(PostgresActivationLock {
                tx,
                record: row.into_record()?,
            }))),
            None => Ok(None),
        }
    }

    async fn list_audit_records(
        &self,
        activation_id: &str,
    ) -> Result<Vec<SignatureAuditRecord>, StorageError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT activation_id, application_id, user_id, activation_counter,
                   activation_status, signature_type, signature, data, valid,
                   reason, additional_info, created_at
            FROM signature_audit
            WHERE activation_id = $1
            ORDER BY id
            "#,
        )
        .bind(activation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.into_iter().map(AuditRow::into_record).collect()
    }
}

#[async_trait]
impl ApplicationStore for PostgresStore {
    async fn insert_application(&self, application: &Application) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO applications
                (application_id, name, master_private_key, master_private_key_encryption,
                 master_public_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&application.application_id)
        .bind(&application.name)
        .bind(&application.master_private_key.data)
        .bind(i16::from(application.master_private_key.mode))
        .bind(&application.master_public_key)
        .bind(application.created_at)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn find_application(
        &self,
        application_id: &str,
    ) -> Result<Option<Application>, StorageError> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT application_id, name, master_private_key, master_private_key_encryption,
                   master_public_key, created_at
            FROM applications
            WHERE application_id = $1
            "#,
        )
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.map(ApplicationRow::into_application).transpose()
    }

    async fn insert_application_version(
        &self,
        version: &ApplicationVersion,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO application_versions
                (version_id, application_id, name, application_key, application_secret,
                 supported, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&version.version_id)
        .bind(&version.application_id)
        .bind(&version.name)
        .bind(&version.application_key)
        .bind(&version.application_secret)
        .bind(version.supported)
        .bind(version.created_at)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn find_version_by_key(
        &self,
        application_key: &str,
    ) -> Result<Option<ApplicationVersion>, StorageError> {
        let row = sqlx::query_as::<_, VersionRow>(
            r#"
            SELECT version_id, application_id, name, application_key, application_secret,
                   supported, created_at
            FROM application_versions
            WHERE application_key = $1
            "#,
        )
        .bind(application_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(row.map(VersionRow::into_version))
    }

    async fn list_application_versions(
        &self,
        application_id: &str,
    ) -> Result<Vec<ApplicationVersion>, StorageError> {
        let rows = sqlx::query_as::<_, VersionRow>(
            r#"
            SELECT version_id, application_id, name, application_key, application_secret,
                   supported, created_at
            FROM application_versions
            WHERE application_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(application_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(rows.into_iter().map(VersionRow::into_version).collect())
    }

    async fn set_version_supported(
        &self,
        version_id: &str,
        supported: bool,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE application_versions SET supported = $2 WHERE version_id = $1",
        )
        .bind(version_id)
        .bind(supported)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UniqueValueStore for PostgresStore {
    async fn insert_unique_value(&self, record: &UniqueValueRecord) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO unique_values (unique_value, value_type, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (unique_value) DO NOTHING
            "#,
        )
        .bind(&record.value)
        .bind(i16::from(record.value_type))
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_expired_unique_values(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM unique_values WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LeaseStore for PostgresStore {
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StorageError::Serialization(format!("lease ttl out of range: {}", e)))?;
        let locked_until = Utc::now() + ttl;

        let result = sqlx::query(
            r#"
            INSERT INTO scheduler_leases (name, holder, locked_until)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE
                SET holder = EXCLUDED.holder, locked_until = EXCLUDED.locked_until
                WHERE scheduler_leases.locked_until <= NOW()
                   OR scheduler_leases.holder = EXCLUDED.holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(locked_until)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }
}

/// Database row for activations
#[derive(sqlx::FromRow)]
struct ActivationRow {
    activation_id: String,
    application_id: String,
    user_id: String,
    server_private_key: Vec<u8>,
    server_private_key_encryption: i16,
    server_public_key: Vec<u8>,
    device_public_key: Option<Vec<u8>>,
    counter: i64,
    failed_attempts: i64,
    max_failed_attempts: i64,
    status: i16,
    blocked_reason: Option<String>,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
    last_changed_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl ActivationRow {
    fn into_record(self) -> Result<ActivationRecord, StorageError> {
        Ok(ActivationRecord {
            activation_id: self.activation_id,
            application_id: self.application_id,
            user_id: self.user_id,
            server_private_key: EncryptableField {
                mode: decode(EncryptionMode::try_from(self.server_private_key_encryption))?,
                data: self.server_private_key,
            },
            server_public_key: self.server_public_key,
            device_public_key: self.device_public_key,
            counter: to_u64(self.counter, "counter")?,
            failed_attempts: to_u64(self.failed_attempts, "failed_attempts")?,
            max_failed_attempts: to_u64(self.max_failed_attempts, "max_failed_attempts")?,
            status: decode(ActivationStatus::try_from(self.status))?,
            blocked_reason: self.blocked_reason,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            last_changed_at: self.last_changed_at,
            expires_at: self.expires_at,
        })
    }
}

/// Database row for signature audit entries
#[derive(sqlx::FromRow)]
struct AuditRow {
    activation_id: String,
    application_id: String,
    user_id: String,
    activation_counter: i64,
    activation_status: i16,
    signature_type: i16,
    signature: String,
    data: Vec<u8>,
    valid: bool,
    reason: String,
    additional_info: Json<BTreeMap<String, String>>,
    created_at: DateTime<Utc>,
}

impl AuditRow {
    fn into_record(self) -> Result<SignatureAuditRecord, StorageError> {
        Ok(SignatureAuditRecord {
            activation_id: self.activation_id,
            application_id: self.application_id,
            user_id: self.user_id,
            activation_counter: to_u64(self.activation_counter, "activation_counter")?,
            activation_status: decode(ActivationStatus::try_from(self.activation_status))?,
            signature_type: decode(SignatureType::try_from(self.signature_type))?,
            signature: self.signature,
            data: self.data,
            valid: self.valid,
            reason: decode(self.reason.parse::<AuditReason>())?,
            additional_info: self.additional_info.0,
            created_at: self.created_at,
        })
    }
}

/// Database row for applications
#[derive(sqlx::FromRow)]
struct ApplicationRow {
    application_id: String,
    name: String,
    master_private_key: Vec<u8>,
    master_private_key_encryption: i16,
    master_public_key: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl ApplicationRow {
    fn into_application(self) -> Result<Application, StorageError> {
        Ok(Application {
            application_id: self.application_id,
            name: self.name,
            master_private_key: EncryptableField {
                mode: decode(EncryptionMode::try_from(self.master_private_key_encryption))?,
                data: self.master_private_key,
            },
            master_public_key: self.master_public_key,
            created_at: self.created_at,
        })
    }
}

/// Database row for application versions
#[derive(sqlx::FromRow)]
struct VersionRow {
    version_id: String,
    application_id: String,
    name: String,
    application_key: String,
    application_secret: String,
    supported: bool,
    created_at: DateTime<Utc>,
}

impl VersionRow {
    fn into_version(self) -> ApplicationVersion {
        ApplicationVersion {
            version_id: self.version_id,
            application_id: self.application_id,
            name: self.name,
            application_key: self.application_key,
            application_secret: self.application_secret,
            supported: self.supported,
            created_at: self.created_at,
        }
    }
}
