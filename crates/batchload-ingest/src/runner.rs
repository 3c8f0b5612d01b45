//! Job entry point
//!
//! Builds the pipeline from a [`JobConfig`], drives one
//! [`ChunkOrchestrator`] to completion and folds its outcome into a
//! [`JobResult`]. Setup failures (bad config, missing input, unreachable
//! database) are reported as a failed result, never as a panic.

use batchload_common::BatchError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::JobConfig;
use crate::executor::ChunkExecutor;
use crate::job::{JobResult, JobStatus};
use crate::orchestrator::{ChunkOrchestrator, OrchestratorState};
use crate::sink::{MemorySink, RecordSink, SqliteSink};
use crate::source::{CsvRecordSource, RecordSource};
use crate::transform::ClearIdTransformer;

/// Runs the import job described by a [`JobConfig`]
pub struct JobRunner {
    config: JobConfig,
    cancel: CancellationToken,
}

impl JobRunner {
    pub fn new(config: JobConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Token that stops the job after in-flight chunks finish
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Open the configured input and sink, then run the job
    pub async fn run(&self) -> JobResult {
        let job_id = Uuid::new_v4();
        let started_at = Utc::now();

        if let Err(e) = self.config.validate() {
            error!(job_id = %job_id, error = %e, "Invalid job configuration");
            return JobResult::setup_failed(job_id, started_at, BatchError::Config(format!("{:#}", e)));
        }

        let source = match CsvRecordSource::open(&self.config.input_path, self.config.delimiter) {
            Ok(source) => source,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to open input");
                return JobResult::setup_failed(job_id, started_at, e);
            },
        };

        let sink: Arc<dyn RecordSink> = if self.config.dry_run {
            info!(job_id = %job_id, "Dry run: records are kept in memory only");
            Arc::new(MemorySink::new())
        } else {
            match SqliteSink::connect(&self.config.database).await {
                Ok(sink) => Arc::new(sink),
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Failed to connect to database");
                    return JobResult::setup_failed(job_id, started_at, e);
                },
            }
        };

        self.execute(job_id, started_at, source, sink).await
    }

    /// Run the job over caller-supplied collaborators
    pub async fn run_with<S: RecordSource>(&self, source: S, sink: Arc<dyn RecordSink>) -> JobResult {
        let job_id = Uuid::new_v4();
        let started_at = Utc::now();

        if let Err(e) = self.config.validate() {
            return JobResult::setup_failed(job_id, started_at, BatchError::Config(format!("{:#}", e)));
        }

        self.execute(job_id, started_at, source, sink).await
    }

    #[instrument(name = "job", skip_all, fields(job_id = %job_id))]
    async fn execute<S: RecordSource>(
        &self,
        job_id: Uuid,
        started_at: DateTime<Utc>,
        source: S,
        sink: Arc<dyn RecordSink>,
    ) -> JobResult {
        info!(
            input = %self.config.input_path.display(),
            chunk_size = self.config.chunk_size,
            concurrency_limit = self.config.concurrency_limit,
            "Job started"
        );

        let orchestrator = ChunkOrchestrator::new(
            source,
            Arc::new(ClearIdTransformer),
            Arc::clone(&sink),
            ChunkExecutor::new(self.config.concurrency_limit),
            self.config.chunk_size,
        )
        .with_failure_policy(self.config.failure_policy)
        .with_cancellation(self.cancel.clone());

        let outcome = orchestrator.run().await;

        let status = if outcome.state == OrchestratorState::Done && outcome.first_error.is_none() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };

        match sink.count().await {
            Ok(total) => debug!(sink = sink.name(), total, "Rows in store after job"),
            Err(e) => warn!(sink = sink.name(), error = %e, "Could not count stored rows"),
        }

        let chunks_failed = outcome.chunks_failed();
        let result = JobResult {
            job_id,
            status,
            chunks_processed: outcome.chunks.len(),
            chunks_failed,
            records_read: outcome.records_read,
            records_written: outcome.records_written,
            first_error: outcome.first_error,
            chunks: outcome.chunks,
            peak_concurrency: outcome.peak_concurrency,
            started_at,
            finished_at: Utc::now(),
        };

        match result.status {
            JobStatus::Completed => info!(
                chunks = result.chunks_processed,
                records_written = result.records_written,
                duration_secs = result.duration_seconds(),
                "Job completed"
            ),
            JobStatus::Failed => error!(
                chunks = result.chunks_processed,
                chunks_failed,
                records_written = result.records_written,
                error = result.first_error.as_ref().map(|e| e.to_string()),
                "Job failed"
            ),
        }

        result
    }
}
