//! Cache stores for the role-permission mapping.
//!
//! A store holds whole `RoleMap` snapshots under a namespace key. Writes replace
//! the snapshot in one step, so readers observe either the old or the new map.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::role_map::RoleMap;
use crate::errors::AuthzError;

#[async_trait]
pub trait RolePermissionStore: Send + Sync {
    /// Current snapshot, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Arc<RoleMap>>, AuthzError>;

    /// Replace the snapshot. A zero `ttl` keeps it until deleted.
    async fn put(&self, key: &str, roles: Arc<RoleMap>, ttl: Duration) -> Result<(), AuthzError>;

    async fn delete(&self, key: &str) -> Result<(), AuthzError>;
}

// =============================================================================
// MEMORY
// =============================================================================

#[derive(Debug, Clone)]
struct Slot {
    roles: Arc<RoleMap>,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<String, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RolePermissionStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Arc<RoleMap>>, AuthzError> {
        let slots = self.slots.read();
        Ok(slots
            .get(key)
            .filter(|slot| slot.is_live())
            .map(|slot| Arc::clone(&slot.roles)))
    }

    async fn put(&self, key: &str, roles: Arc<RoleMap>, ttl: Duration) -> Result<(), AuthzError> {
        // A TTL past the clock's range is kept until deleted.
        let expires_at = if ttl.is_zero() { None } else { Instant::now().checked_add(ttl) };
        self.slots
            .write()
            .insert(key.to_string(), Slot { roles, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AuthzError> {
        self.slots.write().remove(key);
        Ok(())
    }
}

// =============================================================================
// SQLITE
// =============================================================================

/// Shared store backed by a SQLite `cache` table, one row per namespace key.
///
/// The server and the operator CLI point at the same database, so a refresh or
/// clear issued from the command line is seen by running processes.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, AuthzError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), AuthzError> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|err| AuthzError::store(format!("failed to run migrations: {err}")))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Unix expiry for a row written at `now`. `None` keeps the row until deleted,
/// which also covers TTLs too large to represent.
fn expiry_timestamp(now: i64, ttl: Duration) -> Option<i64> {
    if ttl.is_zero() {
        return None;
    }
    i64::try_from(ttl.as_secs()).ok().and_then(|secs| now.checked_add(secs))
}

#[async_trait]
impl RolePermissionStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Arc<RoleMap>>, AuthzError> {
        let row = sqlx::query_as::<_, (String, Option<i64>)>("SELECT value, expires_at FROM cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some((value, expires_at)) = row else {
            return Ok(None);
        };
        if expires_at.is_some_and(|at| at <= Utc::now().timestamp()) {
            return Ok(None);
        }

        match serde_json::from_str::<RoleMap>(&value) {
            Ok(roles) => Ok(Some(Arc::new(roles))),
            Err(err) => {
                // An unreadable snapshot is dropped and reported as a miss so the
                // next read refetches it.
                tracing::warn!(key, error = %err, "discarding undecodable role map snapshot");
                self.delete(key).await?;
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, roles: Arc<RoleMap>, ttl: Duration) -> Result<(), AuthzError> {
        let value = serde_json::to_string(roles.as_ref())
            .map_err(|err| AuthzError::store(format!("failed to encode role map: {err}")))?;
        let expires_at = expiry_timestamp(Utc::now().timestamp(), ttl);

        sqlx::query(
            "INSERT INTO cache (key, value, expires_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AuthzError> {
        sqlx::query("DELETE FROM cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
