//! Chunk orchestrator
//!
//! Drives the read -> transform -> write pipeline:
//!
//! 1. Reading: pull up to `chunk_size` records from the source
//! 2. Transforming: apply the transformer to each record, in order
//! 3. Writing: hand the chunk to the executor as one transactional unit
//!
//! Reading and transforming happen on the calling task, one chunk at a time.
//! Writes run on the executor, so up to `limit` chunks commit concurrently
//! while the next chunk is being read. No ordering is guaranteed between
//! chunks; records inside a chunk are saved in read order.

use batchload_common::{BatchError, Result};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::config::FailurePolicy;
use crate::executor::ChunkExecutor;
use crate::job::{ChunkReport, ChunkStatus};
use crate::record::Student;
use crate::sink::RecordSink;
use crate::source::RecordSource;
use crate::transform::RecordTransformer;

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Reading,
    Transforming,
    Writing,
    /// Source exhausted, every dispatched chunk finished
    Done,
    /// Stopped early after a failure or cancellation
    Aborted,
}

/// What a finished orchestrator run produced
#[derive(Debug)]
pub struct OrchestratorOutcome {
    pub state: OrchestratorState,
    pub chunks: Vec<ChunkReport>,
    pub records_read: u64,
    pub records_written: u64,
    pub first_error: Option<BatchError>,
    pub peak_concurrency: usize,
}

impl OrchestratorOutcome {
    pub fn chunks_failed(&self) -> usize {
        self.chunks.iter().filter(|c| !c.is_committed()).count()
    }
}

struct ChunkWrite {
    sequence: u64,
    records: usize,
    result: Result<u64>,
}

/// Bookkeeping shared by the dispatch loop and the final drain
#[derive(Default)]
struct Progress {
    chunks: Vec<ChunkReport>,
    records_written: u64,
    first_error: Option<BatchError>,
    stop: bool,
}

impl Progress {
    fn note_error(&mut self, err: BatchError) {
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
    }

    fn abort(&mut self, err: BatchError) {
        self.note_error(err);
        self.stop = true;
    }

    fn record(&mut self, write: ChunkWrite, policy: FailurePolicy) {
        match write.result {
            Ok(saved) => {
                info!(chunk = write.sequence, records = saved, "Chunk committed");
                self.records_written += saved;
                self.chunks.push(ChunkReport {
                    sequence: write.sequence,
                    records: write.records,
                    status: ChunkStatus::Committed,
                    error: None,
                });
            },
            Err(e) => {
                let fatal = policy == FailurePolicy::Abort || matches!(e, BatchError::Executor(_));
                warn!(
                    chunk = write.sequence,
                    records = write.records,
                    error = %e,
                    fatal,
                    "Chunk rolled back"
                );
                self.chunks.push(ChunkReport {
                    sequence: write.sequence,
                    records: write.records,
                    status: ChunkStatus::RolledBack,
                    error: Some(e.to_string()),
                });
                if fatal {
                    self.abort(e);
                } else {
                    self.note_error(e);
                }
            },
        }
    }
}

/// Runs one import step over a source, a transformer and a sink
pub struct ChunkOrchestrator<S: RecordSource> {
    source: S,
    transformer: Arc<dyn RecordTransformer>,
    sink: Arc<dyn RecordSink>,
    executor: ChunkExecutor,
    chunk_size: usize,
    failure_policy: FailurePolicy,
    cancel: CancellationToken,
    state: OrchestratorState,
}

impl<S: RecordSource> ChunkOrchestrator<S> {
    pub fn new(
        source: S,
        transformer: Arc<dyn RecordTransformer>,
        sink: Arc<dyn RecordSink>,
        executor: ChunkExecutor,
        chunk_size: usize,
    ) -> Self {
        Self {
            source,
            transformer,
            sink,
            executor,
            chunk_size: chunk_size.max(1),
            failure_policy: FailurePolicy::default(),
            cancel: CancellationToken::new(),
            state: OrchestratorState::Idle,
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Stop reading new chunks once `cancel` fires; in-flight chunks finish
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    fn transition(&mut self, next: OrchestratorState) {
        trace!(from = ?self.state, to = ?next, "Orchestrator state change");
        self.state = next;
    }

    /// Process the source to exhaustion, or until the first fatal error
    pub async fn run(mut self) -> OrchestratorOutcome {
        info!(
            chunk_size = self.chunk_size,
            concurrency_limit = self.executor.limit(),
            sink = self.sink.name(),
            policy = %self.failure_policy,
            "Starting chunk processing"
        );

        let mut progress = Progress::default();
        let mut pending: FuturesUnordered<BoxFuture<'static, ChunkWrite>> = FuturesUnordered::new();
        let mut sequence = 0u64;

        loop {
            // Pick up finished writes without waiting for the rest
            while let Some(Some(write)) = pending.next().now_or_never() {
                progress.record(write, self.failure_policy);
            }

            if progress.stop {
                break;
            }

            if self.cancel.is_cancelled() {
                warn!(dispatched = sequence, "Cancellation requested, no further chunks will be read");
                progress.abort(BatchError::Cancelled);
                break;
            }

            self.transition(OrchestratorState::Reading);
            let chunk = match self.read_chunk() {
                Ok(chunk) => chunk,
                Err(e) => {
                    error!(chunk = sequence + 1, error = %e, "Failed to read chunk, aborting job");
                    progress.abort(e);
                    break;
                },
            };

            if chunk.is_empty() {
                debug!(chunks = sequence, "Source exhausted");
                break;
            }

            sequence += 1;

            self.transition(OrchestratorState::Transforming);
            let chunk = match self.transform_chunk(chunk) {
                Ok(chunk) => chunk,
                Err(e) => {
                    error!(chunk = sequence, error = %e, "Failed to transform chunk, aborting job");
                    progress.abort(e);
                    break;
                },
            };

            self.transition(OrchestratorState::Writing);
            let records = chunk.len();
            let write = write_chunk(Arc::clone(&self.sink), chunk)
                .instrument(info_span!("chunk", sequence, records));

            match self.executor.submit(write).await {
                Ok(handle) => {
                    debug!(chunk = sequence, records, "Chunk dispatched");
                    pending.push(
                        handle
                            .map(move |result| ChunkWrite {
                                sequence,
                                records,
                                result,
                            })
                            .boxed(),
                    );
                },
                Err(e) => {
                    error!(chunk = sequence, error = %e, "Failed to dispatch chunk, aborting job");
                    progress.abort(e);
                    break;
                },
            }
        }

        // Nothing is dispatched past this point
        self.executor.close();

        if !pending.is_empty() {
            debug!(in_flight = pending.len(), "Waiting for in-flight chunks");
        }
        while let Some(write) = pending.next().await {
            progress.record(write, self.failure_policy);
        }

        let terminal = if progress.stop {
            OrchestratorState::Aborted
        } else {
            OrchestratorState::Done
        };
        self.transition(terminal);

        progress.chunks.sort_by_key(|c| c.sequence);

        OrchestratorOutcome {
            state: terminal,
            chunks: progress.chunks,
            records_read: self.source.records_read(),
            records_written: progress.records_written,
            first_error: progress.first_error,
            peak_concurrency: self.executor.peak_concurrency(),
        }
    }

    /// Up to `chunk_size` records; empty once the source is exhausted
    fn read_chunk(&mut self) -> Result<Vec<Student>> {
        let mut chunk = Vec::with_capacity(self.chunk_size);

        while chunk.len() < self.chunk_size {
            match self.source.next_record()? {
                Some(record) => chunk.push(record),
                None => break,
            }
        }

        Ok(chunk)
    }

    fn transform_chunk(&self, chunk: Vec<Student>) -> Result<Vec<Student>> {
        chunk
            .into_iter()
            .map(|record| self.transformer.transform(record))
            .collect()
    }
}

/// Save every record of a chunk in one transaction
///
/// Commits only if every save succeeds; otherwise the whole chunk is rolled
/// back and the first save error is returned.
async fn write_chunk(sink: Arc<dyn RecordSink>, records: Vec<Student>) -> Result<u64> {
    let mut tx = sink.begin().await?;
    let mut saved = 0u64;

    for (index, record) in records.into_iter().enumerate() {
        let result = tx.save(record).await;
        if let Err(e) = result {
            debug!(index, error = %e, "Save failed, rolling back");
            if let Err(rollback_err) = tx.rollback().await {
                error!(error = %rollback_err, "Rollback failed; the transaction is discarded on drop");
            }
            return Err(e);
        }
        saved += 1;
    }

    tx.commit().await?;
    Ok(saved)
}
