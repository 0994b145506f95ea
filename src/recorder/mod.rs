//! Result recording.
//!
//! Persists the final aggregated result plus its full per-judge outcome
//! trail. Writes are idempotent on request id: recording the same result
//! twice never creates a duplicate, so the orchestrator can safely retry
//! at-least-once.

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::errors::PersistenceError;
use crate::types::AggregatedResult;

// ---------------------------------------------------------------------------
// ResultStore trait
// ---------------------------------------------------------------------------

/// Durable storage for aggregated results, keyed by request id.
#[async_trait]
pub trait ResultStore: Send + Sync + std::fmt::Debug {
    /// Persist a result. Returns `true` when the write created a record,
    /// `false` when a record for this request id already existed.
    async fn put(&self, result: &AggregatedResult) -> Result<bool, PersistenceError>;

    /// Fetch a previously recorded result.
    async fn get(&self, request_id: &Uuid) -> Result<Option<AggregatedResult>, PersistenceError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Concurrent in-memory store. The default for tests and single-process
/// deployments without durability requirements.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    results: DashMap<Uuid, AggregatedResult>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn put(&self, result: &AggregatedResult) -> Result<bool, PersistenceError> {
        match self.results.entry(result.request_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(result.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, request_id: &Uuid) -> Result<Option<AggregatedResult>, PersistenceError> {
        Ok(self.results.get(request_id).map(|r| r.clone()))
    }
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

/// SQLite-backed store. Results are stored as JSON rows keyed by request
/// id; `INSERT OR IGNORE` gives the idempotence guarantee.
///
/// rusqlite is synchronous, so every operation opens a connection inside a
/// blocking task.
#[derive(Debug, Clone)]
pub struct SqliteResultStore {
    db_path: PathBuf,
}

impl SqliteResultStore {
    /// Open (or create) the store at `db_path`.
    pub fn new(db_path: PathBuf) -> Result<Self, PersistenceError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::Storage {
                message: format!("cannot create {}: {}", parent.display(), e),
            })?;
        }
        let conn = Connection::open(&db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS aggregated_results (
                request_id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self { db_path })
    }
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    async fn put(&self, result: &AggregatedResult) -> Result<bool, PersistenceError> {
        let db_path = self.db_path.clone();
        let request_id = result.request_id.to_string();
        let body = serde_json::to_string(result)?;
        let created_at = result.created_at.to_rfc3339();

        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO aggregated_results (request_id, body, created_at)
                 VALUES (?1, ?2, ?3)",
                params![request_id, body, created_at],
            )?;
            Ok(inserted > 0)
        })
        .await
        .map_err(|e| PersistenceError::Storage {
            message: format!("store task failed: {}", e),
        })?
    }

    async fn get(&self, request_id: &Uuid) -> Result<Option<AggregatedResult>, PersistenceError> {
        let db_path = self.db_path.clone();
        let request_id = request_id.to_string();

        let body: Option<String> = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.query_row(
                "SELECT body FROM aggregated_results WHERE request_id = ?1",
                params![request_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(PersistenceError::from)
        })
        .await
        .map_err(|e| PersistenceError::Storage {
            message: format!("store task failed: {}", e),
        })??;

        match body {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EvaluationRequest, JudgeOutcome, ResolutionStatus};

    fn sample_result() -> AggregatedResult {
        let request = EvaluationRequest::for_judge("j1", serde_json::json!("content"));
        let outcomes = vec![JudgeOutcome::failed("j1", "boom", 3)];
        AggregatedResult::new(&request, outcomes, None, ResolutionStatus::AllFailed)
    }

    #[tokio::test]
    async fn in_memory_put_is_idempotent() {
        let store = InMemoryResultStore::new();
        let result = sample_result();

        assert!(store.put(&result).await.unwrap());
        assert!(!store.put(&result).await.unwrap());

        let fetched = store.get(&result.request_id).await.unwrap().unwrap();
        assert_eq!(fetched.request_id, result.request_id);
        assert_eq!(fetched.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn sqlite_put_is_idempotent_and_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.db");
        let store = SqliteResultStore::new(path.clone()).unwrap();
        let result = sample_result();

        assert!(store.put(&result).await.unwrap());
        assert!(!store.put(&result).await.unwrap());

        // Reopening sees the same single record.
        let reopened = SqliteResultStore::new(path).unwrap();
        let fetched = reopened.get(&result.request_id).await.unwrap().unwrap();
        assert_eq!(fetched.request_id, result.request_id);
        assert_eq!(fetched.status, ResolutionStatus::AllFailed);
        assert!(fetched.degraded);
    }

    #[tokio::test]
    async fn sqlite_get_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteResultStore::new(dir.path().join("results.db")).unwrap();
        assert!(store.get(&Uuid::new_v4()).await.unwrap().is_none());
    }
}
