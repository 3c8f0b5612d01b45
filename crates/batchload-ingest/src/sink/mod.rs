//! Durable storage for transformed records
//!
//! A sink hands out one transaction per chunk. Every record of the chunk is
//! saved through that transaction and the chunk becomes visible only when
//! the transaction commits. Dropping a transaction without committing
//! discards its writes.

use async_trait::async_trait;
use batchload_common::{BatchError, Result};

use crate::record::{PersistedStudent, Student};

pub mod memory;
pub mod sqlite;

pub use memory::MemorySink;
pub use sqlite::SqliteSink;

/// Storage capable of transactional, per-record inserts
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Backend name for log lines
    fn name(&self) -> &str;

    /// Open a transaction scoped to one chunk
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>>;

    /// Number of committed records
    async fn count(&self) -> Result<u64>;
}

/// One open chunk transaction
///
/// Not idempotent: saving the same record twice inserts two rows.
#[async_trait]
pub trait SinkTransaction: Send {
    /// Insert one record; storage assigns its identifier
    async fn save(&mut self, record: Student) -> Result<PersistedStudent>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Records reaching a sink must not carry an identifier
pub(crate) fn ensure_unassigned(record: &Student) -> Result<()> {
    match record.id {
        None => Ok(()),
        Some(id) => Err(BatchError::Storage(format!(
            "record {} already carries id {}; only new rows can be inserted",
            record, id
        ))),
    }
}
