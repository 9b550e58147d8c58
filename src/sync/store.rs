//! Match State Store
//!
//! The transactional boundary. A commit is a compare-and-swap on the row's
//! version: it succeeds only if the stored version still equals the version
//! the caller computed from, and it writes the new record and appends the
//! event in one step. Backends that span server instances implement the same
//! contract with a conditional update (`... WHERE version = $expected`).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::core::ids::MatchId;
use crate::sync::event::Event;
use crate::sync::record::MatchRecord;

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No such match.
    #[error("match {0} not found")]
    NotFound(MatchId),

    /// Insert of an id that already exists.
    #[error("match {0} already exists")]
    AlreadyExists(MatchId),

    /// Compare-and-swap lost: someone committed first.
    #[error("version conflict: expected {expected}, stored {actual}")]
    VersionConflict {
        /// Version the caller computed from
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// Commit arguments are inconsistent (version/seq mismatch).
    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    /// Backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Persistence for match records and their event logs.
///
/// Implementations must be safe for concurrent use; `commit` must be atomic
/// per match.
#[async_trait]
pub trait MatchStore: Send + Sync + 'static {
    /// Insert a new match at version 0. The record is also kept as genesis.
    async fn insert(&self, record: MatchRecord) -> Result<(), StoreError>;

    /// Current record.
    async fn load(&self, id: MatchId) -> Result<MatchRecord, StoreError>;

    /// Replace the record and append the event iff the stored version is
    /// still `expected_version`.
    async fn commit(
        &self,
        expected_version: u64,
        record: MatchRecord,
        event: Event,
    ) -> Result<(), StoreError>;

    /// Events with `seq > after_seq`, oldest first.
    async fn events_since(&self, id: MatchId, after_seq: u64) -> Result<Vec<Event>, StoreError>;

    /// Last `limit` events, oldest first.
    async fn recent_events(&self, id: MatchId, limit: usize) -> Result<Vec<Event>, StoreError>;

    /// Record as inserted (version 0).
    async fn genesis(&self, id: MatchId) -> Result<MatchRecord, StoreError>;

    /// Ids of matches that are neither completed nor cancelled.
    async fn list_open(&self) -> Result<Vec<MatchId>, StoreError>;
}

struct MatchRow {
    genesis: MatchRecord,
    current: MatchRecord,
    events: Vec<Event>,
}

/// In-process store. Rows are locked individually so commits on different
/// matches never contend.
#[derive(Default)]
pub struct MemoryMatchStore {
    rows: RwLock<BTreeMap<MatchId, Arc<Mutex<MatchRow>>>>,
}

impl MemoryMatchStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn row(&self, id: MatchId) -> Result<Arc<Mutex<MatchRow>>, StoreError> {
        self.rows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    /// Number of matches stored.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Is the store empty?
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Overwrite a stored record without any checks.
    #[cfg(test)]
    pub(crate) async fn corrupt(&self, record: MatchRecord) {
        if let Ok(row) = self.row(record.id).await {
            row.lock().await.current = record;
        }
    }
}

#[async_trait]
impl MatchStore for MemoryMatchStore {
    async fn insert(&self, record: MatchRecord) -> Result<(), StoreError> {
        if record.version != 0 {
            return Err(StoreError::InvalidCommit(format!(
                "new match must start at version 0, got {}",
                record.version
            )));
        }
        let mut rows = self.rows.write().await;
        if rows.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        rows.insert(
            record.id,
            Arc::new(Mutex::new(MatchRow {
                genesis: record.clone(),
                current: record,
                events: Vec::new(),
            })),
        );
        Ok(())
    }

    async fn load(&self, id: MatchId) -> Result<MatchRecord, StoreError> {
        let row = self.row(id).await?;
        let row = row.lock().await;
        Ok(row.current.clone())
    }

    async fn commit(
        &self,
        expected_version: u64,
        record: MatchRecord,
        event: Event,
    ) -> Result<(), StoreError> {
        if record.version != expected_version + 1 || event.seq != record.version {
            return Err(StoreError::InvalidCommit(format!(
                "expected {} -> record {} / event {}",
                expected_version, record.version, event.seq
            )));
        }
        if event.match_id != record.id {
            return Err(StoreError::InvalidCommit("event for another match".to_string()));
        }

        let row = self.row(record.id).await?;
        let mut row = row.lock().await;
        if row.current.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: row.current.version,
            });
        }

        row.current = record;
        row.events.push(event);
        Ok(())
    }

    async fn events_since(&self, id: MatchId, after_seq: u64) -> Result<Vec<Event>, StoreError> {
        let row = self.row(id).await?;
        let row = row.lock().await;
        // seq n lives at index n - 1
        let start = (after_seq as usize).min(row.events.len());
        Ok(row.events[start..].to_vec())
    }

    async fn recent_events(&self, id: MatchId, limit: usize) -> Result<Vec<Event>, StoreError> {
        let row = self.row(id).await?;
        let row = row.lock().await;
        let start = row.events.len().saturating_sub(limit);
        Ok(row.events[start..].to_vec())
    }

    async fn genesis(&self, id: MatchId) -> Result<MatchRecord, StoreError> {
        let row = self.row(id).await?;
        let row = row.lock().await;
        Ok(row.genesis.clone())
    }

    async fn list_open(&self) -> Result<Vec<MatchId>, StoreError> {
        let rows: Vec<(MatchId, Arc<Mutex<MatchRow>>)> = self
            .rows
            .read()
            .await
            .iter()
            .map(|(id, row)| (*id, row.clone()))
            .collect();

        let mut open = Vec::new();
        for (id, row) in rows {
            if !row.lock().await.current.status.is_terminal() {
                open.push(id);
            }
        }
        Ok(open)
    }
}
