//! Test helpers for batchload pipeline tests
//!
//! - Input builders for delimited student files
//! - Sink wrappers that fail on demand or slow down writes
//! - An in-memory SQLite sink

#![allow(dead_code)]

use async_trait::async_trait;
use batchload_common::{BatchError, Result};
use batchload_ingest::{
    CsvRecordSource, DatabaseConfig, PersistedStudent, RecordSink, SinkTransaction, SqliteSink,
    Student,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub type StringSource = CsvRecordSource<Cursor<Vec<u8>>>;

pub const HEADER: &str = "id,firstname,lastname,age";

/// First name that makes [`FailingSink`] reject the save
pub const POISON: &str = "Poison";

/// Header plus `rows` generated student lines
pub fn student_lines(rows: usize) -> String {
    let mut input = format!("{}\n", HEADER);
    for i in 0..rows {
        input.push_str(&format!("{},First{},Last{},{}\n", i + 1, i, i, 18 + i % 60));
    }
    input
}

/// Like [`student_lines`], but the record at `poison_index` (0-based) is poisoned
pub fn student_lines_with_poison(rows: usize, poison_index: usize) -> String {
    let mut input = format!("{}\n", HEADER);
    for i in 0..rows {
        let first = if i == poison_index {
            POISON.to_string()
        } else {
            format!("First{}", i)
        };
        input.push_str(&format!("{},{},Last{},{}\n", i + 1, first, i, 18 + i % 60));
    }
    input
}

pub fn source_from(input: &str) -> StringSource {
    CsvRecordSource::from_reader(Cursor::new(input.as_bytes().to_vec()), b',')
        .expect("header line should be readable")
}

pub async fn memory_sqlite() -> SqliteSink {
    SqliteSink::connect(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        ..DatabaseConfig::default()
    })
    .await
    .expect("in-memory database should open")
}

/// Rejects any record whose first name is [`POISON`]
pub struct FailingSink {
    inner: Arc<dyn RecordSink>,
}

impl FailingSink {
    pub fn wrap(inner: Arc<dyn RecordSink>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl RecordSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn begin(&self) -> Result<Box<dyn SinkTransaction>> {
        Ok(Box::new(FailingTransaction {
            inner: self.inner.begin().await?,
        }))
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }
}

struct FailingTransaction {
    inner: Box<dyn SinkTransaction>,
}

#[async_trait]
impl SinkTransaction for FailingTransaction {
    async fn save(&mut self, record: Student) -> Result<PersistedStudent> {
        if record.first_name == POISON {
            return Err(BatchError::storage("constraint violation on poisoned record"));
        }
        self.inner.save(record).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}

/// Delays every save and tracks how many transactions are open at once
pub struct SlowSink {
    inner: Arc<dyn RecordSink>,
    delay: Duration,
    open: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl SlowSink {
    pub fn wrap(inner: Arc<dyn RecordSink>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            open: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Highest number of transactions observed open at the same time
    pub fn peak_open(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSink for SlowSink {
    fn name(&self) -> &str {
        "slow"
    }

    async fn begin(&self) -> Result<Box<dyn SinkTransaction>> {
        let inner = self.inner.begin().await?;
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(SlowTransaction {
            inner,
            delay: self.delay,
            _open: OpenGuard(Arc::clone(&self.open)),
        }))
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }
}

/// Counts a transaction as open until dropped
struct OpenGuard(Arc<AtomicUsize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SlowTransaction {
    inner: Box<dyn SinkTransaction>,
    delay: Duration,
    _open: OpenGuard,
}

#[async_trait]
impl SinkTransaction for SlowTransaction {
    async fn save(&mut self, record: Student) -> Result<PersistedStudent> {
        tokio::time::sleep(self.delay).await;
        self.inner.save(record).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let SlowTransaction { inner, _open, .. } = *self;
        inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let SlowTransaction { inner, _open, .. } = *self;
        inner.rollback().await
    }
}
