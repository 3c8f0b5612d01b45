//! Batchload Ingest Library
//!
//! Chunked, concurrent import of student records from delimited text files
//! into a relational store.
//!
//! # Pipeline
//!
//! - **Source**: [`CsvRecordSource`] reads one record per line, skipping the header
//! - **Transform**: [`ClearIdTransformer`] drops the input id so the store assigns one
//! - **Sink**: [`SqliteSink`] (or [`MemorySink`] for dry runs) saves each chunk
//!   in a single transaction
//!
//! [`ChunkOrchestrator`] groups records into chunks and hands each chunk to a
//! bounded [`ChunkExecutor`]; [`JobRunner`] wires everything together from a
//! [`JobConfig`].
//!
//! # Example
//!
//! ```no_run
//! use batchload_ingest::{JobConfig, JobRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = JobConfig::from_env()?;
//!     let result = JobRunner::new(config).run().await;
//!     println!("{}", result.summary());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod executor;
pub mod job;
pub mod orchestrator;
pub mod record;
pub mod runner;
pub mod sink;
pub mod source;
pub mod transform;

pub use config::{DatabaseConfig, FailurePolicy, JobConfig};
pub use executor::{ChunkExecutor, TaskHandle};
pub use job::{ChunkReport, ChunkStatus, JobResult, JobStatus};
pub use orchestrator::{ChunkOrchestrator, OrchestratorOutcome, OrchestratorState};
pub use record::{PersistedStudent, Student};
pub use runner::JobRunner;
pub use sink::{MemorySink, RecordSink, SinkTransaction, SqliteSink};
pub use source::{CsvRecordSource, RecordSource};
pub use transform::{ClearIdTransformer, RecordTransformer};
