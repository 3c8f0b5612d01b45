//! In-memory storage used by dry runs and tests

use async_trait::async_trait;
use batchload_common::Result;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ensure_unassigned, RecordSink, SinkTransaction};
use crate::record::{PersistedStudent, Student};

#[derive(Default)]
struct MemoryStore {
    last_id: AtomicI64,
    rows: Mutex<Vec<PersistedStudent>>,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

/// [`RecordSink`] keeping committed rows in memory
///
/// Ids come from a shared counter at save time; ids used by rolled-back
/// transactions are skipped, as with a database sequence.
#[derive(Clone, Default)]
pub struct MemorySink {
    store: Arc<MemoryStore>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows, in commit order
    pub async fn records(&self) -> Vec<PersistedStudent> {
        self.store.rows.lock().await.clone()
    }

    pub fn commits(&self) -> u64 {
        self.store.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u64 {
        self.store.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn SinkTransaction>> {
        Ok(Box::new(MemoryTransaction {
            store: Arc::clone(&self.store),
            pending: Vec::new(),
        }))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.store.rows.lock().await.len() as u64)
    }
}

struct MemoryTransaction {
    store: Arc<MemoryStore>,
    pending: Vec<PersistedStudent>,
}

#[async_trait]
impl SinkTransaction for MemoryTransaction {
    async fn save(&mut self, record: Student) -> Result<PersistedStudent> {
        ensure_unassigned(&record)?;

        let id = self.store.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let persisted = record.into_persisted(id);
        self.pending.push(persisted.clone());

        Ok(persisted)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { store, pending } = *self;
        let saved = pending.len();
        store.rows.lock().await.extend(pending);
        store.commits.fetch_add(1, Ordering::SeqCst);
        debug!(saved, "Memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.store.rollbacks.fetch_add(1, Ordering::SeqCst);
        debug!(discarded = self.pending.len(), "Memory transaction rolled back");
        Ok(())
    }
}
