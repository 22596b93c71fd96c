//! Snapshot persistence backends.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Where review snapshots go. Implementations take ownership of their
/// arguments so saves can run detached from the caller.
pub trait SnapshotStore: Send + Sync + 'static {
    fn save(
        &self,
        game_id: String,
        snapshot: JsonValue,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete(&self, game_id: String) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Postgres-backed store: one row per game, upserted.
#[derive(Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl SnapshotStore for PgSnapshotStore {
    fn save(
        &self,
        game_id: String,
        snapshot: JsonValue,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let pool = self.pool.clone();
        async move {
            sqlx::query(
                r#"INSERT INTO review_snapshots (game_id, snapshot, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (game_id) DO UPDATE SET
                    snapshot = EXCLUDED.snapshot,
                    updated_at = NOW()"#,
            )
            .bind(&game_id)
            .bind(&snapshot)
            .execute(&pool)
            .await?;
            Ok(())
        }
    }

    fn delete(&self, game_id: String) -> impl Future<Output = Result<(), StoreError>> + Send {
        let pool = self.pool.clone();
        async move {
            sqlx::query("DELETE FROM review_snapshots WHERE game_id = $1")
                .bind(&game_id)
                .execute(&pool)
                .await?;
            Ok(())
        }
    }
}

#[derive(Default)]
struct MemoryInner {
    snapshots: HashMap<String, JsonValue>,
    saves: usize,
    attempts: usize,
    fail_next: usize,
    delay: Option<Duration>,
}

/// In-memory store used by tests and database-less runs. Supports failure
/// injection and artificial latency.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

fn lock(inner: &Mutex<MemoryInner>) -> MutexGuard<'_, MemoryInner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` saves fail.
    pub fn fail_next(&self, n: usize) {
        lock(&self.inner).fail_next = n;
    }

    /// Add latency to every save.
    pub fn set_delay(&self, delay: Duration) {
        lock(&self.inner).delay = Some(delay);
    }

    /// Successful saves so far.
    pub fn saves(&self) -> usize {
        lock(&self.inner).saves
    }

    /// Save attempts, including failed ones.
    pub fn attempts(&self) -> usize {
        lock(&self.inner).attempts
    }

    pub fn get(&self, game_id: &str) -> Option<JsonValue> {
        lock(&self.inner).snapshots.get(game_id).cloned()
    }
}

impl SnapshotStore for MemoryStore {
    fn save(
        &self,
        game_id: String,
        snapshot: JsonValue,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let inner = self.inner.clone();
        async move {
            let delay = lock(&inner).delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut inner = lock(&inner);
            inner.attempts += 1;
            if inner.fail_next > 0 {
                inner.fail_next -= 1;
                return Err(StoreError::Unavailable("injected failure".into()));
            }
            inner.snapshots.insert(game_id, snapshot);
            inner.saves += 1;
            Ok(())
        }
    }

    fn delete(&self, game_id: String) -> impl Future<Output = Result<(), StoreError>> + Send {
        let inner = self.inner.clone();
        async move {
            lock(&inner).snapshots.remove(&game_id);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        store
            .save("g1".into(), serde_json::json!({"boardState": "x"}))
            .await
            .unwrap();
        assert_eq!(store.saves(), 1);
        assert!(store.get("g1").is_some());

        store.delete("g1".into()).await.unwrap();
        assert!(store.get("g1").is_none());
    }

    #[tokio::test]
    async fn test_memory_store_failure_injection() {
        let store = MemoryStore::new();
        store.fail_next(1);
        assert!(store.save("g1".into(), serde_json::json!({})).await.is_err());
        assert_eq!(store.attempts(), 1);
        assert_eq!(store.saves(), 0);

        store.save("g1".into(), serde_json::json!({})).await.unwrap();
        assert_eq!(store.saves(), 1);
    }
}
