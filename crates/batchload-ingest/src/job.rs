//! Job and chunk result types

use batchload_common::BatchError;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Terminal job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a dispatched chunk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Committed,
    RolledBack,
}

/// Outcome of one chunk write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkReport {
    /// 1-based position of the chunk in the input
    pub sequence: u64,
    pub records: usize,
    pub status: ChunkStatus,
    pub error: Option<String>,
}

impl ChunkReport {
    pub fn is_committed(&self) -> bool {
        self.status == ChunkStatus::Committed
    }
}

/// Aggregate result of one job run
#[derive(Debug, Serialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// Chunks whose write finished, committed or not
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    pub records_read: u64,
    pub records_written: u64,
    #[serde(serialize_with = "serialize_error")]
    pub first_error: Option<BatchError>,
    /// Per-chunk outcomes, ordered by sequence
    pub chunks: Vec<ChunkReport>,
    pub peak_concurrency: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }

    /// Result for a job that could not start
    pub fn setup_failed(job_id: Uuid, started_at: DateTime<Utc>, error: BatchError) -> Self {
        Self {
            job_id,
            status: JobStatus::Failed,
            chunks_processed: 0,
            chunks_failed: 0,
            records_read: 0,
            records_written: 0,
            first_error: Some(error),
            chunks: Vec::new(),
            peak_concurrency: 0,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Human-readable multi-line summary
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Import Summary:\n\
             - Job: {}\n\
             - Status: {}\n\
             - Chunks processed: {} ({} failed)\n\
             - Records read: {}\n\
             - Records written: {}\n\
             - Peak concurrent writers: {}\n\
             - Duration: {:.2}s",
            self.job_id,
            self.status,
            self.chunks_processed,
            self.chunks_failed,
            self.records_read,
            self.records_written,
            self.peak_concurrency,
            self.duration_seconds()
        );

        if let Some(ref error) = self.first_error {
            summary.push_str(&format!("\n - First error ({}): {}", error.kind(), error));
        }

        summary
    }
}

fn serialize_error<S: Serializer>(error: &Option<BatchError>, serializer: S) -> Result<S::Ok, S::Error> {
    error.as_ref().map(|e| e.to_string()).serialize(serializer)
}
