//! Batchload - chunked student import tool

use anyhow::{Context, Result};
use batchload_common::logging::{init_logging, LogConfig, LogLevel};
use batchload_ingest::config::parse_delimiter;
use batchload_ingest::{FailurePolicy, JobConfig, JobResult, JobRunner};
use clap::Parser;
use std::path::PathBuf;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "batchload")]
#[command(author, version, about = "Import student records into the database in concurrent chunks")]
struct Cli {
    /// Input file (first line is a header)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Records per chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Maximum chunks written concurrently
    #[arg(long)]
    concurrency_limit: Option<usize>,

    /// Field delimiter: a single character or "tab"
    #[arg(short, long)]
    delimiter: Option<String>,

    /// What to do after a chunk fails: abort or continue
    #[arg(long)]
    on_chunk_failure: Option<String>,

    /// Database URL
    #[arg(long)]
    database_url: Option<String>,

    /// Read and transform without writing to the database
    #[arg(long)]
    dry_run: bool,

    /// Print the job result as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Command-line flags take precedence over the environment
    fn apply(&self, config: &mut JobConfig) -> Result<()> {
        if let Some(ref input) = self.input {
            config.input_path = input.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(limit) = self.concurrency_limit {
            config.concurrency_limit = limit;
        }
        if let Some(ref delimiter) = self.delimiter {
            config.delimiter = parse_delimiter(delimiter)?;
        }
        if let Some(ref policy) = self.on_chunk_failure {
            config.failure_policy = policy.parse::<FailurePolicy>()?;
        }
        if let Some(ref url) = self.database_url {
            config.database.url = url.clone();
        }
        if self.dry_run {
            config.dry_run = true;
        }
        Ok(())
    }
}

/// Final job report for stdout, independent of log routing
fn report(result: &JobResult, json: bool) -> Result<String> {
    if json {
        Ok(serde_json::to_string_pretty(result)?)
    } else {
        Ok(result.summary())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("batchload")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;

    let guard = init_logging(&log_config)?;

    let mut config = JobConfig::from_env().context("Failed to load job configuration")?;
    cli.apply(&mut config)?;

    let runner = JobRunner::new(config);

    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, waiting for in-flight chunks");
            cancel.cancel();
        }
    });

    let result = runner.run().await;

    println!("{}", report(&result, cli.json)?);

    if !result.is_success() {
        // process::exit skips destructors; flush file logs first
        drop(guard);
        std::process::exit(1);
    }

    Ok(())
}
