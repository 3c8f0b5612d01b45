//! End-to-end tests for the chunked import pipeline
//!
//! These tests drive [`JobRunner`] over real sources and sinks:
//! - Identifier reassignment and record counts
//! - Chunk boundaries
//! - Per-chunk atomicity on SQLite and in memory
//! - The concurrency bound
//! - Failure policies, parse errors and cancellation

mod helpers;

use batchload_common::BatchError;
use batchload_ingest::{
    ChunkStatus, FailurePolicy, JobConfig, JobRunner, JobStatus, MemorySink, RecordSink,
};
use helpers::*;
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn runner(chunk_size: usize, concurrency_limit: usize, failure_policy: FailurePolicy) -> JobRunner {
    JobRunner::new(JobConfig {
        chunk_size,
        concurrency_limit,
        failure_policy,
        ..JobConfig::default()
    })
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn test_two_students_get_fresh_ids() {
    let input = format!("{}\n41,Ann,Lee,30\n42,Bo,Ng,41\n", HEADER);
    let sink = memory_sqlite().await;

    let result = runner(1, 2, FailurePolicy::Abort)
        .run_with(source_from(&input), Arc::new(sink.clone()))
        .await;

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.chunks_processed, 2);
    assert_eq!(result.records_written, 2);

    let mut rows = sink.fetch_all().await.unwrap();
    rows.sort_by(|a, b| a.first_name.cmp(&b.first_name));
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].fields(), ("Ann", "Lee", 30));
    assert_eq!(rows[1].fields(), ("Bo", "Ng", 41));

    // Input ids are dropped; the store numbers rows itself
    let ids: HashSet<i64> = rows.iter().map(|r| r.id).collect();
    assert_eq!(ids, HashSet::from([1, 2]));
}

#[tokio::test]
async fn test_persisted_count_is_lines_minus_header() {
    let input = student_lines(250);
    let sink = MemorySink::new();

    let result = runner(7, 4, FailurePolicy::Abort)
        .run_with(source_from(&input), Arc::new(sink.clone()))
        .await;

    assert!(result.is_success(), "{}", result.summary());
    let lines = input.lines().count() as u64;
    assert_eq!(sink.count().await.unwrap(), lines - 1);
    assert_eq!(result.records_read, lines - 1);
    assert_eq!(result.records_written, lines - 1);

    // Every persisted id is distinct
    let ids: HashSet<i64> = sink.records().await.iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), 250);
}

#[tokio::test]
async fn test_last_chunk_holds_remainder() {
    let chunk_size = 10;
    let input = student_lines(3 * chunk_size + 7);
    let sink = memory_sqlite().await;

    let result = runner(chunk_size, 3, FailurePolicy::Abort)
        .run_with(source_from(&input), Arc::new(sink.clone()))
        .await;

    assert!(result.is_success(), "{}", result.summary());
    let sizes: Vec<usize> = result.chunks.iter().map(|c| c.records).collect();
    assert_eq!(sizes, vec![10, 10, 10, 7]);
    let sequences: Vec<u64> = result.chunks.iter().map(|c| c.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
    assert_eq!(sink.count().await.unwrap(), 37);
}

#[tokio::test]
async fn test_header_only_input_completes_empty() {
    let sink = MemorySink::new();

    let result = runner(5, 2, FailurePolicy::Abort)
        .run_with(source_from(&format!("{}\n", HEADER)), Arc::new(sink.clone()))
        .await;

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.chunks_processed, 0);
    assert_eq!(sink.commits(), 0);
}

// ============================================================================
// Chunk Atomicity
// ============================================================================

#[tokio::test]
async fn test_failed_chunk_leaves_no_rows_in_sqlite() {
    // Chunk 2 (records 5..10) fails on its third record
    let input = student_lines_with_poison(20, 7);
    let sqlite = memory_sqlite().await;
    let sink = FailingSink::wrap(Arc::new(sqlite.clone()));

    let result = runner(5, 2, FailurePolicy::Continue)
        .run_with(source_from(&input), Arc::new(sink))
        .await;

    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.chunks_processed, 4);
    assert_eq!(result.chunks_failed, 1);
    assert_eq!(result.chunks[1].status, ChunkStatus::RolledBack);
    assert!(matches!(result.first_error, Some(BatchError::Storage(_))));

    let rows = sqlite.fetch_all().await.unwrap();
    assert_eq!(rows.len(), 15);
    for i in 5..10 {
        let name = format!("First{}", i);
        assert!(
            rows.iter().all(|r| r.first_name != name),
            "record {} of the failed chunk was persisted",
            i
        );
    }
}

#[tokio::test]
async fn test_failed_chunk_leaves_no_rows_in_memory() {
    let input = student_lines_with_poison(12, 0);
    let memory = MemorySink::new();
    let sink = FailingSink::wrap(Arc::new(memory.clone()));

    let result = runner(4, 1, FailurePolicy::Continue)
        .run_with(source_from(&input), Arc::new(sink))
        .await;

    assert_eq!(result.chunks_failed, 1);
    assert_eq!(result.records_written, 8);
    assert_eq!(memory.count().await.unwrap(), 8);
    assert_eq!(memory.rollbacks(), 1);
    assert!(memory.records().await.iter().all(|r| r.first_name != "First1"));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_writers_never_exceed_limit() {
    let limit = 3;
    let memory = MemorySink::new();
    let slow = Arc::new(SlowSink::wrap(Arc::new(memory.clone()), Duration::from_millis(10)));

    let result = runner(2, limit, FailurePolicy::Abort)
        .run_with(source_from(&student_lines(40)), Arc::clone(&slow) as Arc<dyn RecordSink>)
        .await;

    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(result.chunks_processed, 20);
    assert!(slow.peak_open() <= limit, "peak {} exceeds {}", slow.peak_open(), limit);
    assert_eq!(result.peak_concurrency, limit);
    assert_eq!(memory.count().await.unwrap(), 40);
}

#[tokio::test]
async fn test_single_writer_limit_serializes_chunks() {
    let memory = MemorySink::new();
    let slow = Arc::new(SlowSink::wrap(Arc::new(memory.clone()), Duration::from_millis(2)));

    let result = runner(3, 1, FailurePolicy::Abort)
        .run_with(source_from(&student_lines(15)), Arc::clone(&slow) as Arc<dyn RecordSink>)
        .await;

    assert!(result.is_success());
    assert_eq!(slow.peak_open(), 1);
    assert_eq!(result.peak_concurrency, 1);
}

// ============================================================================
// Failure Policies
// ============================================================================

#[tokio::test]
async fn test_abort_policy_stops_dispatching() {
    // Five chunks of five; chunk 2 fails
    let input = student_lines_with_poison(25, 6);
    let memory = MemorySink::new();
    let sink = FailingSink::wrap(Arc::new(memory.clone()));

    let result = runner(5, 1, FailurePolicy::Abort)
        .run_with(source_from(&input), Arc::new(sink))
        .await;

    assert_eq!(result.status, JobStatus::Failed);
    assert!(matches!(result.first_error, Some(BatchError::Storage(_))));
    assert!(result.chunks_processed < 5, "{} chunks ran after abort", result.chunks_processed);
    assert_eq!(result.records_written, memory.count().await.unwrap());
    assert!(result.records_written < 20);
}

#[tokio::test]
async fn test_continue_policy_processes_every_chunk() {
    let input = student_lines_with_poison(25, 6);
    let memory = MemorySink::new();
    let sink = FailingSink::wrap(Arc::new(memory.clone()));

    let result = runner(5, 1, FailurePolicy::Continue)
        .run_with(source_from(&input), Arc::new(sink))
        .await;

    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.chunks_processed, 5);
    assert_eq!(result.chunks_failed, 1);
    assert_eq!(result.records_written, 20);
    assert_eq!(memory.count().await.unwrap(), 20);
}

// ============================================================================
// Parse Errors
// ============================================================================

#[tokio::test]
async fn test_malformed_age_fails_job_with_line_number() {
    let input = format!("{}\n1,Ann,Lee,30\n2,Bo,Ng,forty\n3,Cy,Ho,19\n", HEADER);
    let sink = MemorySink::new();

    let result = runner(10, 2, FailurePolicy::Continue)
        .run_with(source_from(&input), Arc::new(sink.clone()))
        .await;

    assert_eq!(result.status, JobStatus::Failed);
    match result.first_error {
        Some(BatchError::Parse { line, .. }) => assert_eq!(line, 3),
        other => panic!("expected parse error, got {:?}", other),
    }
    // The partially read chunk is never written
    assert_eq!(sink.count().await.unwrap(), 0);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancellation_lets_in_flight_chunks_finish() {
    let memory = MemorySink::new();
    let slow = Arc::new(SlowSink::wrap(Arc::new(memory.clone()), Duration::from_millis(5)));
    let cancel = CancellationToken::new();

    let job = runner(5, 2, FailurePolicy::Abort).with_cancellation(cancel.clone());

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.cancel();
    });

    let result = job
        .run_with(source_from(&student_lines(500)), Arc::clone(&slow) as Arc<dyn RecordSink>)
        .await;
    trigger.await.unwrap();

    assert_eq!(result.status, JobStatus::Failed);
    assert!(matches!(result.first_error, Some(BatchError::Cancelled)));
    assert!(result.chunks_processed < 100);
    // Every dispatched chunk ran to completion
    assert!(result.chunks.iter().all(|c| c.is_committed()));
    assert_eq!(memory.count().await.unwrap(), result.records_written);
}

// ============================================================================
// Runner Setup
// ============================================================================

#[tokio::test]
async fn test_missing_input_file_fails_before_any_write() {
    let result = JobRunner::new(JobConfig {
        input_path: "/definitely/not/here/students.csv".into(),
        dry_run: true,
        ..JobConfig::default()
    })
    .run()
    .await;

    assert_eq!(result.status, JobStatus::Failed);
    assert!(matches!(result.first_error, Some(BatchError::Io(_))));
    assert_eq!(result.chunks_processed, 0);
}

#[tokio::test]
async fn test_dry_run_reads_tab_delimited_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "id\tfirstname\tlastname\tage\n1\tAnn\tLee\t30\n2\tBo\tNg\t41\n3\tCy\tHo\t19\n").unwrap();

    let result = JobRunner::new(JobConfig {
        input_path: file.path().to_path_buf(),
        delimiter: b'\t',
        chunk_size: 2,
        dry_run: true,
        ..JobConfig::default()
    })
    .run()
    .await;

    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(result.records_written, 3);
    assert_eq!(result.chunks_processed, 2);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["status"], "completed");
    assert!(json["first_error"].is_null());
}
