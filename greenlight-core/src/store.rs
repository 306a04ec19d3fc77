use crate::error::StoreError;
use crate::types::{EntityRecord, HistoryEntry};
use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Persistence boundary for entity records.
///
/// The executor operates exclusively through this trait, enabling pluggable
/// backends (MemoryEntityStore for tests and single-node use, Postgres for
/// production behind the `postgres` feature).
///
/// `commit` is the one concurrency-relevant contract in the engine: it must
/// compare-and-swap on `version` so two concurrent applies against the same
/// entity cannot silently overwrite one another. The loser gets
/// `StoreError::Conflict` and reloads.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Persist a newly submitted record. Fails on duplicate id.
    async fn insert(&self, record: &EntityRecord) -> Result<(), StoreError>;

    async fn load(&self, id: Uuid) -> Result<EntityRecord, StoreError>;

    /// Commit a state transition. `record` carries the new state but the
    /// version it was loaded at; the store verifies that version still
    /// matches, appends `entry`, bumps the version, and makes both writes
    /// visible together. Returns the record as persisted.
    async fn commit(
        &self,
        record: &EntityRecord,
        entry: HistoryEntry,
    ) -> Result<EntityRecord, StoreError>;

    /// Remove a record outright. Only the deletion-guard workflow's side
    /// effect calls this; ordinary terminal states are permanent.
    async fn remove(&self, id: Uuid) -> Result<(), StoreError>;
}

// ─── MemoryEntityStore ────────────────────────────────────────

/// In-memory EntityStore. The commit CAS and the state+history write happen
/// under one write-lock critical section, so no partial write is ever
/// observable.
pub struct MemoryEntityStore {
    inner: RwLock<HashMap<Uuid, EntityRecord>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn insert(&self, record: &EntityRecord) -> Result<(), StoreError> {
        let mut store = self
            .inner
            .write()
            .map_err(|e| StoreError::Backend(anyhow!("lock: {e}")))?;
        if store.contains_key(&record.id) {
            return Err(StoreError::DuplicateId(record.id));
        }
        store.insert(record.id, record.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<EntityRecord, StoreError> {
        let store = self
            .inner
            .read()
            .map_err(|e| StoreError::Backend(anyhow!("lock: {e}")))?;
        store.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn commit(
        &self,
        record: &EntityRecord,
        entry: HistoryEntry,
    ) -> Result<EntityRecord, StoreError> {
        let mut store = self
            .inner
            .write()
            .map_err(|e| StoreError::Backend(anyhow!("lock: {e}")))?;
        let current = store
            .get_mut(&record.id)
            .ok_or(StoreError::NotFound(record.id))?;

        if current.version != record.version {
            return Err(StoreError::Conflict(record.id));
        }

        current.state = record.state.clone();
        current.history.push(entry);
        current.version += 1;
        Ok(current.clone())
    }

    async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        let mut store = self
            .inner
            .write()
            .map_err(|e| StoreError::Backend(anyhow!("lock: {e}")))?;
        store.remove(&id).map(|_| ()).ok_or(StoreError::NotFound(id))
    }
}
