//! Error types for batchload jobs

use thiserror::Error;

/// Result type alias for batchload operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Main error type for the import pipeline
///
/// Each variant maps to one failure policy of the chunk orchestrator:
/// parse errors abort the job, storage errors roll back the chunk that hit
/// them, executor errors fail the job while in-flight chunks finish.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: u64, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Job cancelled")]
    Cancelled,
}

impl BatchError {
    /// Short, stable name of the error kind, used in job reports
    pub fn kind(&self) -> &'static str {
        match self {
            BatchError::Io(_) => "io",
            BatchError::Parse { .. } => "parse",
            BatchError::Storage(_) => "storage",
            BatchError::Executor(_) => "executor",
            BatchError::Config(_) => "config",
            BatchError::Cancelled => "cancelled",
        }
    }

    pub fn parse(line: u64, message: impl Into<String>) -> Self {
        BatchError::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn storage(message: impl std::fmt::Display) -> Self {
        BatchError::Storage(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_carries_line() {
        let err = BatchError::parse(3, "invalid age 'x'");
        assert_eq!(err.to_string(), "Parse error at line 3: invalid age 'x'");
        assert_eq!(err.kind(), "parse");
    }

    #[test]
    fn test_storage_error_from_display() {
        let err = BatchError::storage("disk full");
        assert!(matches!(err, BatchError::Storage(ref m) if m == "disk full"));
        assert_eq!(err.kind(), "storage");
    }
}
