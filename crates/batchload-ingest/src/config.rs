//! Job configuration
//!
//! Values come from the environment (optionally through a `.env` file) and
//! can then be overridden by command-line flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Job Configuration Constants
// ============================================================================

/// Records per chunk, and therefore per transaction.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Chunk writes allowed to run at the same time.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 10;

/// Input file read when nothing else is configured.
pub const DEFAULT_INPUT_PATH: &str = "students.csv";

/// Field delimiter of the input file.
pub const DEFAULT_DELIMITER: u8 = b',';

/// SQLite database the records are written to.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://batchload.db";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// What the orchestrator does after a chunk rolls back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop reading, let in-flight chunks finish, fail the job
    #[default]
    Abort,
    /// Keep processing later chunks; the job still ends Failed
    Continue,
}

impl std::str::FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" | "fail-fast" => Ok(FailurePolicy::Abort),
            "continue" => Ok(FailurePolicy::Continue),
            _ => Err(anyhow::anyhow!("Invalid failure policy: {}", s)),
        }
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Abort => write!(f, "abort"),
            FailurePolicy::Continue => write!(f, "continue"),
        }
    }
}

/// Import job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub chunk_size: usize,
    pub concurrency_limit: usize,
    pub input_path: PathBuf,
    pub delimiter: u8,
    pub failure_policy: FailurePolicy,
    /// Write to an in-memory store instead of the database
    pub dry_run: bool,
    pub database: DatabaseConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            input_path: PathBuf::from(DEFAULT_INPUT_PATH),
            delimiter: DEFAULT_DELIMITER,
            failure_policy: FailurePolicy::default(),
            dry_run: false,
            database: DatabaseConfig::default(),
        }
    }
}

impl JobConfig {
    /// Load configuration from environment and defaults
    ///
    /// - `BATCH_CHUNK_SIZE`, `BATCH_CONCURRENCY_LIMIT`
    /// - `BATCH_INPUT_PATH`, `BATCH_DELIMITER`, `BATCH_FAILURE_POLICY`
    /// - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`, `DATABASE_CONNECT_TIMEOUT`
    ///
    /// Only malformed values are rejected here. Range checks happen in
    /// [`JobConfig::validate`] once command-line overrides are applied.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let delimiter = match std::env::var("BATCH_DELIMITER") {
            Ok(raw) => parse_delimiter(&raw)?,
            Err(_) => DEFAULT_DELIMITER,
        };

        let failure_policy = match std::env::var("BATCH_FAILURE_POLICY") {
            Ok(raw) => raw.parse()?,
            Err(_) => FailurePolicy::default(),
        };

        let config = JobConfig {
            chunk_size: std::env::var("BATCH_CHUNK_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            concurrency_limit: std::env::var("BATCH_CONCURRENCY_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CONCURRENCY_LIMIT),
            input_path: std::env::var("BATCH_INPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_INPUT_PATH)),
            delimiter,
            failure_policy,
            dry_run: false,
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
            },
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than 0");
        }

        if self.concurrency_limit == 0 {
            anyhow::bail!("concurrency_limit must be greater than 0");
        }

        if !self.delimiter.is_ascii() || matches!(self.delimiter, b'\n' | b'\r' | b'"') {
            anyhow::bail!("delimiter {:?} cannot be used", self.delimiter as char);
        }

        if !self.dry_run {
            if self.database.url.is_empty() {
                anyhow::bail!("Database URL cannot be empty");
            }

            if self.database.max_connections == 0 {
                anyhow::bail!("Database max_connections must be greater than 0");
            }
        }

        if self.database.max_connections < self.concurrency_limit as u32 {
            tracing::warn!(
                max_connections = self.database.max_connections,
                concurrency_limit = self.concurrency_limit,
                "Fewer database connections than concurrent chunk writers; writers will queue on the pool"
            );
        }

        Ok(())
    }
}

/// Accepts a single ASCII character, or `\t` / `tab`
pub fn parse_delimiter(raw: &str) -> anyhow::Result<u8> {
    if matches!(raw, "\\t" | "tab") {
        return Ok(b'\t');
    }

    match raw.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        _ => anyhow::bail!("Delimiter must be a single ASCII character, got '{}'", raw),
    }
}
