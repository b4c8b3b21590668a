//! `SQLite` persistence for the change ledger and the job registry.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::BoxFuture;
use crate::error::{IndexError, Result};
use crate::jobs::{IndexReport, IndexingJob, JobRegistry};
use crate::tracker::{FileIndexRecord, LedgerStore, LedgerSummary};

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

type RecordTuple = (String, String, String, i64, i64, String, String);

type JobTuple = (
    String,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    Option<String>,
    Option<String>,
);

const JOB_COLUMNS: &str = "job_id, collection, job_type, status, progress, files_count, \
     chunks_count, error, repo, branch, commit_sha, report, created_at, started_at, finished_at";

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| IndexError::Other(format!("invalid timestamp {s:?}: {e}")))
}

fn record_from_tuple(t: RecordTuple) -> Result<FileIndexRecord> {
    let chunks: BTreeMap<String, String> = serde_json::from_str(&t.5)?;
    Ok(FileIndexRecord {
        collection: t.0,
        file_path: t.1,
        content_hash: t.2,
        mtime: t.3,
        chunk_count: usize::try_from(t.4)?,
        chunks,
        indexed_at: parse_timestamp(&t.6)?,
    })
}

fn job_from_tuple(t: JobTuple) -> Result<IndexingJob> {
    let report: IndexReport = serde_json::from_str(&t.11)?;
    Ok(IndexingJob {
        job_id: t.0,
        collection: t.1,
        job_type: t.2.parse()?,
        status: t.3.parse()?,
        progress: u8::try_from(t.4)?,
        files_count: usize::try_from(t.5)?,
        chunks_count: usize::try_from(t.6)?,
        error: t.7,
        repo: t.8,
        branch: t.9,
        commit: t.10,
        report,
        created_at: parse_timestamp(&t.12)?,
        started_at: t.13.as_deref().map(parse_timestamp).transpose()?,
        finished_at: t.14.as_deref().map(parse_timestamp).transpose()?,
    })
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database on a single
    /// connection so every query sees the same data.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn open(path: &str) -> Result<Self> {
        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(opts)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running migrations on it.
    ///
    /// # Errors
    ///
    /// Returns an error if any migration fails.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("../../migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn write_job(&self, job: &IndexingJob, upsert: bool) -> Result<u64> {
        let verb = if upsert { "INSERT OR REPLACE" } else { "INSERT" };
        let sql = format!(
            "{verb} INTO indexing_jobs ({JOB_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let result = sqlx::query(&sql)
            .bind(&job.job_id)
            .bind(&job.collection)
            .bind(job.job_type.as_str())
            .bind(job.status.as_str())
            .bind(i64::from(job.progress))
            .bind(i64::try_from(job.files_count)?)
            .bind(i64::try_from(job.chunks_count)?)
            .bind(&job.error)
            .bind(&job.repo)
            .bind(&job.branch)
            .bind(&job.commit)
            .bind(serde_json::to_string(&job.report)?)
            .bind(timestamp(job.created_at))
            .bind(job.started_at.map(timestamp))
            .bind(job.finished_at.map(timestamp))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

impl LedgerStore for SqliteStore {
    fn get(
        &self,
        collection: &str,
        file_path: &str,
    ) -> BoxFuture<'_, Result<Option<FileIndexRecord>>> {
        let collection = collection.to_owned();
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let row: Option<RecordTuple> = sqlx::query_as(
                "SELECT collection, file_path, content_hash, mtime, chunk_count, chunks, indexed_at \
                 FROM file_index_records WHERE collection = ? AND file_path = ?",
            )
            .bind(&collection)
            .bind(&file_path)
            .fetch_optional(&self.pool)
            .await?;
            row.map(record_from_tuple).transpose()
        })
    }

    fn upsert(&self, record: FileIndexRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO file_index_records \
                 (collection, file_path, content_hash, mtime, chunk_count, chunks, indexed_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(collection, file_path) DO UPDATE SET \
                 content_hash = excluded.content_hash, \
                 mtime = excluded.mtime, \
                 chunk_count = excluded.chunk_count, \
                 chunks = excluded.chunks, \
                 indexed_at = excluded.indexed_at",
            )
            .bind(&record.collection)
            .bind(&record.file_path)
            .bind(&record.content_hash)
            .bind(record.mtime)
            .bind(i64::try_from(record.chunk_count)?)
            .bind(serde_json::to_string(&record.chunks)?)
            .bind(timestamp(record.indexed_at))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn remove(&self, collection: &str, file_path: &str) -> BoxFuture<'_, Result<bool>> {
        let collection = collection.to_owned();
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM file_index_records WHERE collection = ? AND file_path = ?",
            )
            .bind(&collection)
            .bind(&file_path)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn list(&self, collection: &str) -> BoxFuture<'_, Result<Vec<FileIndexRecord>>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let rows: Vec<RecordTuple> = sqlx::query_as(
                "SELECT collection, file_path, content_hash, mtime, chunk_count, chunks, indexed_at \
                 FROM file_index_records WHERE collection = ? ORDER BY file_path",
            )
            .bind(&collection)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(record_from_tuple).collect()
        })
    }

    fn clear(&self, collection: &str) -> BoxFuture<'_, Result<usize>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM file_index_records WHERE collection = ?")
                .bind(&collection)
                .execute(&self.pool)
                .await?;
            Ok(usize::try_from(result.rows_affected())?)
        })
    }

    fn summary(&self) -> BoxFuture<'_, Result<LedgerSummary>> {
        Box::pin(async move {
            let (files, chunks): (i64, i64) = sqlx::query_as(
                "SELECT COUNT(*), COALESCE(SUM(chunk_count), 0) FROM file_index_records",
            )
            .fetch_one(&self.pool)
            .await?;
            let collections: Vec<(String,)> = sqlx::query_as(
                "SELECT DISTINCT collection FROM file_index_records ORDER BY collection",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(LedgerSummary {
                files: usize::try_from(files)?,
                chunks: usize::try_from(chunks)?,
                collections: collections.into_iter().map(|(c,)| c).collect(),
            })
        })
    }
}

impl JobRegistry for SqliteStore {
    fn insert(&self, job: IndexingJob) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.write_job(&job, false).await?;
            Ok(())
        })
    }

    fn update(&self, job: IndexingJob) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let exists: Option<(String,)> =
                sqlx::query_as("SELECT job_id FROM indexing_jobs WHERE job_id = ?")
                    .bind(&job.job_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if exists.is_none() {
                return Err(IndexError::JobNotFound(job.job_id));
            }
            self.write_job(&job, true).await?;
            Ok(())
        })
    }

    fn get(&self, job_id: &str) -> BoxFuture<'_, Result<Option<IndexingJob>>> {
        let job_id = job_id.to_owned();
        Box::pin(async move {
            let sql = format!("SELECT {JOB_COLUMNS} FROM indexing_jobs WHERE job_id = ?");
            let row: Option<JobTuple> = sqlx::query_as(&sql)
                .bind(&job_id)
                .fetch_optional(&self.pool)
                .await?;
            row.map(job_from_tuple).transpose()
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<IndexingJob>>> {
        Box::pin(async move {
            let sql = format!("SELECT {JOB_COLUMNS} FROM indexing_jobs ORDER BY created_at, job_id");
            let rows: Vec<JobTuple> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
            rows.into_iter().map(job_from_tuple).collect()
        })
    }

    fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM indexing_jobs \
                 WHERE status IN ('completed', 'failed') \
                 AND finished_at IS NOT NULL AND finished_at < ?",
            )
            .bind(timestamp(cutoff))
            .execute(&self.pool)
            .await?;
            Ok(usize::try_from(result.rows_affected())?)
        })
    }
}
