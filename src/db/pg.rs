//! PostgreSQL binding of the entity store.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, error, info};

use super::{EntityKind, EntityStore};
use crate::config::DatabaseConfig;
use crate::error::{Result, SyncError};

/// Entity store over per-kind read-model tables.
///
/// Each kind maps to a table of shape
/// `(id TEXT PRIMARY KEY, attributes JSONB, synced_at TIMESTAMPTZ)`;
/// the attribute document is stored as-is, the query layer projects it.
#[derive(Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool sized and timed for long-lived streaming load.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.url)
            .await
            .map_err(|e| {
                error!("Failed to create database pool: {}", e);
                SyncError::Database(e.to_string())
            })?;

        info!(
            "Database pool created: max={}, min={}",
            config.max_connections, config.min_connections
        );

        Ok(Self { pool })
    }

    /// Create the read-model tables if they don't exist. Safe to call on
    /// every startup.
    pub async fn initialize(&self) -> Result<()> {
        for kind in EntityKind::ALL {
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    attributes JSONB NOT NULL,
                    synced_at TIMESTAMPTZ NOT NULL
                )",
                kind.table()
            );
            sqlx::query(&sql).execute(&self.pool).await.map_err(|e| {
                error!("Failed to create table {}: {}", kind.table(), e);
                SyncError::Database(e.to_string())
            })?;
        }
        info!("Read-model tables initialized");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn upsert(
        &self,
        kind: EntityKind,
        id: &str,
        attributes: &Map<String, Value>,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id, attributes, synced_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (id)
             DO UPDATE SET
                 attributes = EXCLUDED.attributes,
                 synced_at = EXCLUDED.synced_at",
            kind.table()
        );

        sqlx::query(&sql)
            .bind(id)
            .bind(Value::Object(attributes.clone()))
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to upsert {} id={}: {}", kind, id, e);
                SyncError::Database(e.to_string())
            })?;

        debug!("Upserted {} id={}", kind, id);
        Ok(())
    }

    async fn delete_by_id(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", kind.table());

        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete {} id={}: {}", kind, id, e);
                SyncError::Database(e.to_string())
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<Value>> {
        let sql = format!("SELECT attributes FROM {} WHERE id = $1", kind.table());

        let attributes = sqlx::query_scalar::<_, Value>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to fetch {} id={}: {}", kind, id, e);
                SyncError::Database(e.to_string())
            })?;

        Ok(attributes)
    }

    /// Verify the pool still hands out live connections. Retirement of
    /// stale ones is the pool's own idle-timeout and max-lifetime policy.
    async fn recycle(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;
        debug!(
            "Connection pool recycled: size={}, idle={}",
            self.pool.size(),
            self.pool.num_idle()
        );
        Ok(())
    }
}
