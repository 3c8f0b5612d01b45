//! SQLite storage through sqlx
//!
//! Rows go to the `students` table; SQLite assigns ids through
//! `AUTOINCREMENT`, so ids of rolled-back inserts are never handed out again.

use async_trait::async_trait;
use batchload_common::{BatchError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{ensure_unassigned, RecordSink, SinkTransaction};
use crate::config::DatabaseConfig;
use crate::record::{PersistedStudent, Student};

/// How long a writer waits on SQLite's write lock before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const CREATE_STUDENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS students (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name TEXT    NOT NULL,
    last_name  TEXT    NOT NULL,
    age        INTEGER NOT NULL
)
"#;

/// [`RecordSink`] backed by a SQLite connection pool
#[derive(Clone)]
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Connect and make sure the `students` table exists
    ///
    /// In-memory URLs get a single long-lived connection, otherwise every
    /// pooled connection would see its own empty database.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(BatchError::storage)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        let in_memory = config.url.contains(":memory:") || config.url.contains("mode=memory");

        let pool_options = SqlitePoolOptions::new().acquire_timeout(config.connect_timeout());
        let pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(config.max_connections)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(BatchError::storage)?;

        info!(url = %config.url, in_memory, "Database connection pool established");

        let sink = Self::from_pool(pool);
        sink.ensure_schema().await?;
        Ok(sink)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_STUDENTS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(BatchError::storage)?;
        Ok(())
    }

    /// All committed rows, in id order
    pub async fn fetch_all(&self) -> Result<Vec<PersistedStudent>> {
        let rows: Vec<(i64, String, String, i32)> = sqlx::query_as(
            "SELECT id, first_name, last_name, age FROM students ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(BatchError::storage)?;

        Ok(rows
            .into_iter()
            .map(|(id, first_name, last_name, age)| PersistedStudent {
                id,
                first_name,
                last_name,
                age,
            })
            .collect())
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn begin(&self) -> Result<Box<dyn SinkTransaction>> {
        let tx = self.pool.begin().await.map_err(BatchError::storage)?;
        Ok(Box::new(SqliteTransaction { tx, saved: 0 }))
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM students")
            .fetch_one(&self.pool)
            .await
            .map_err(BatchError::storage)?;
        Ok(count as u64)
    }
}

struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
    saved: usize,
}

#[async_trait]
impl SinkTransaction for SqliteTransaction {
    async fn save(&mut self, record: Student) -> Result<PersistedStudent> {
        ensure_unassigned(&record)?;

        let result = sqlx::query("INSERT INTO students (first_name, last_name, age) VALUES (?, ?, ?)")
            .bind(&record.first_name)
            .bind(&record.last_name)
            .bind(record.age)
            .execute(&mut *self.tx)
            .await
            .map_err(BatchError::storage)?;

        self.saved += 1;
        Ok(record.into_persisted(result.last_insert_rowid()))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let saved = self.saved;
        self.tx.commit().await.map_err(BatchError::storage)?;
        debug!(saved, "SQLite transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let saved = self.saved;
        self.tx.rollback().await.map_err(BatchError::storage)?;
        debug!(discarded = saved, "SQLite transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn memory_sink() -> SqliteSink {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        SqliteSink::connect(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_commit_assigns_fresh_ids() {
        let sink = memory_sink().await;

        let mut tx = sink.begin().await.unwrap();
        let ann = tx.save(Student::new("Ann", "Lee", 30)).await.unwrap();
        let bo = tx.save(Student::new("Bo", "Ng", 41)).await.unwrap();
        tx.commit().await.unwrap();

        assert!(ann.id > 0);
        assert!(bo.id > ann.id);
        assert_eq!(sink.count().await.unwrap(), 2);
        assert_eq!(sink.fetch_all().await.unwrap(), vec![ann, bo]);
    }

    #[tokio::test]
    async fn test_rollback_discards_chunk() {
        let sink = memory_sink().await;

        let mut tx = sink.begin().await.unwrap();
        tx.save(Student::new("Ann", "Lee", 30)).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(sink.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let sink = memory_sink().await;

        {
            let mut tx = sink.begin().await.unwrap();
            tx.save(Student::new("Ann", "Lee", 30)).await.unwrap();
        }

        assert_eq!(sink.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_saving_twice_creates_duplicates() {
        let sink = memory_sink().await;

        let mut tx = sink.begin().await.unwrap();
        let first = tx.save(Student::new("Ann", "Lee", 30)).await.unwrap();
        let second = tx.save(Student::new("Ann", "Lee", 30)).await.unwrap();
        tx.commit().await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(sink.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_record_with_id_is_rejected() {
        let sink = memory_sink().await;

        let mut tx = sink.begin().await.unwrap();
        let err = tx
            .save(Student::new("Ann", "Lee", 30).with_id(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Storage(_)));
    }

    #[tokio::test]
    async fn test_file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("import.db");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            ..DatabaseConfig::default()
        };

        let sink = SqliteSink::connect(&config).await.unwrap();
        let mut tx = sink.begin().await.unwrap();
        tx.save(Student::new("Ann", "Lee", 30)).await.unwrap();
        tx.commit().await.unwrap();

        assert!(path.exists());
        assert_eq!(sink.count().await.unwrap(), 1);
    }
}
