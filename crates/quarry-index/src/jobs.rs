//! Indexing jobs: state machine, reports and the job registry.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BoxFuture;
use crate::error::{IndexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Full,
    Incremental,
}

impl JobType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            other => Err(IndexError::Other(format!("unknown job type: {other}"))),
        }
    }
}

/// Job lifecycle. Transitions only move forward:
/// `queued -> processing -> {completed, failed}`, plus `queued -> failed`
/// for jobs cancelled before they start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing | Self::Failed)
                | (Self::Processing, Self::Completed | Self::Failed)
        )
    }
}

impl std::str::FromStr for JobStatus {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(IndexError::Other(format!("unknown job status: {other}"))),
        }
    }
}

/// Summary of an indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_deleted: usize,
    pub chunks_indexed: usize,
    pub chunks_skipped: usize,
    pub chunks_deleted: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl IndexReport {
    /// No file or batch reported an error.
    #[must_use]
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingJob {
    pub job_id: String,
    pub collection: String,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Percentage of files processed, 0-100.
    pub progress: u8,
    pub files_count: usize,
    pub chunks_count: usize,
    pub error: Option<String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub report: IndexReport,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl IndexingJob {
    #[must_use]
    pub fn new(job_id: String, collection: String, job_type: JobType) -> Self {
        Self {
            job_id,
            collection,
            job_type,
            status: JobStatus::Queued,
            progress: 0,
            files_count: 0,
            chunks_count: 0,
            error: None,
            repo: None,
            branch: None,
            commit: None,
            report: IndexReport::default(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Move to `next`, stamping start/finish times.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidTransition`] for a backward or repeated
    /// transition.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(IndexError::InvalidTransition {
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        let now = Utc::now();
        if next == JobStatus::Processing {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Finish successfully; item-level errors stay in the report.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not processing.
    pub fn complete(&mut self, report: IndexReport) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100;
        self.files_count = report.files_indexed;
        self.chunks_count = report.chunks_indexed;
        self.report = report;
        Ok(())
    }

    /// Finish with a job-fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if the job already finished.
    pub fn fail(&mut self, error: String, report: IndexReport) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.files_count = report.files_indexed;
        self.chunks_count = report.chunks_indexed;
        self.error = Some(error);
        self.report = report;
        Ok(())
    }

    /// Update progress from processed/total file counts.
    pub fn set_progress(&mut self, done: usize, total: usize) {
        let pct = if total == 0 { 100 } else { done.min(total) * 100 / total };
        self.progress = u8::try_from(pct).unwrap_or(100);
    }
}

/// Durable storage for [`IndexingJob`]s.
pub trait JobRegistry: Send + Sync {
    fn insert(&self, job: IndexingJob) -> BoxFuture<'_, Result<()>>;

    /// Replace a stored job.
    fn update(&self, job: IndexingJob) -> BoxFuture<'_, Result<()>>;

    fn get(&self, job_id: &str) -> BoxFuture<'_, Result<Option<IndexingJob>>>;

    /// All jobs, oldest first.
    fn list(&self) -> BoxFuture<'_, Result<Vec<IndexingJob>>>;

    /// Purge finished jobs whose `finished_at` precedes `cutoff`.
    fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<usize>>;
}

#[derive(Debug, Default)]
pub struct InMemoryJobRegistry {
    jobs: RwLock<HashMap<String, IndexingJob>>,
}

impl InMemoryJobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> IndexError {
    IndexError::Other("job registry lock poisoned".into())
}

impl JobRegistry for InMemoryJobRegistry {
    fn insert(&self, job: IndexingJob) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut jobs = self.jobs.write().map_err(poisoned)?;
            jobs.insert(job.job_id.clone(), job);
            Ok(())
        })
    }

    fn update(&self, job: IndexingJob) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut jobs = self.jobs.write().map_err(poisoned)?;
            let Some(slot) = jobs.get_mut(&job.job_id) else {
                return Err(IndexError::JobNotFound(job.job_id));
            };
            *slot = job;
            Ok(())
        })
    }

    fn get(&self, job_id: &str) -> BoxFuture<'_, Result<Option<IndexingJob>>> {
        let job_id = job_id.to_owned();
        Box::pin(async move {
            let jobs = self.jobs.read().map_err(poisoned)?;
            Ok(jobs.get(&job_id).cloned())
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<IndexingJob>>> {
        Box::pin(async move {
            let jobs = self.jobs.read().map_err(poisoned)?;
            let mut out: Vec<_> = jobs.values().cloned().collect();
            out.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.job_id.cmp(&b.job_id))
            });
            Ok(out)
        })
    }

    fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let mut jobs = self.jobs.write().map_err(poisoned)?;
            let before = jobs.len();
            jobs.retain(|_, job| {
                !(job.status.is_terminal() && job.finished_at.is_some_and(|t| t < cutoff))
            });
            Ok(before - jobs.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn job(id: &str) -> IndexingJob {
        IndexingJob::new(id.into(), "repo_main".into(), JobType::Full)
    }

    #[test]
    fn forward_transitions() {
        let mut j = job("j1");
        assert_eq!(j.status, JobStatus::Queued);
        j.transition(JobStatus::Processing).unwrap();
        assert!(j.started_at.is_some());
        j.complete(IndexReport {
            files_indexed: 2,
            chunks_indexed: 5,
            ..IndexReport::default()
        })
        .unwrap();
        assert_eq!(j.status, JobStatus::Completed);
        assert_eq!((j.files_count, j.chunks_count, j.progress), (2, 5, 100));
        assert!(j.finished_at.is_some());
    }

    #[test]
    fn backward_transitions_rejected() {
        let mut j = job("j1");
        j.transition(JobStatus::Processing).unwrap();
        j.fail("boom".into(), IndexReport::default()).unwrap();
        let err = j.transition(JobStatus::Processing).unwrap_err();
        assert!(matches!(
            err,
            IndexError::InvalidTransition {
                from: "failed",
                to: "processing"
            }
        ));
        assert!(j.transition(JobStatus::Completed).is_err());
        assert!(j.transition(JobStatus::Queued).is_err());
    }

    #[test]
    fn queued_job_can_fail_directly() {
        let mut j = job("j1");
        j.fail("cancelled".into(), IndexReport::default()).unwrap();
        assert_eq!(j.status, JobStatus::Failed);
        assert!(j.started_at.is_none());
    }

    #[test]
    fn queued_cannot_complete() {
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn progress_percentage() {
        let mut j = job("j1");
        j.set_progress(1, 3);
        assert_eq!(j.progress, 33);
        j.set_progress(0, 0);
        assert_eq!(j.progress, 100);
    }

    #[test]
    fn report_success_tracks_errors() {
        let mut r = IndexReport::default();
        assert!(r.success());
        r.errors.push("a.py: boom".into());
        assert!(!r.success());
    }

    #[test]
    fn status_round_trip_through_str() {
        for s in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<JobStatus>().unwrap(), s);
        }
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[tokio::test]
    async fn in_memory_registry_purges_old_finished_jobs() {
        let reg = InMemoryJobRegistry::new();
        let mut old = job("old");
        old.transition(JobStatus::Processing).unwrap();
        old.complete(IndexReport::default()).unwrap();
        old.finished_at = Some(Utc::now() - Duration::hours(48));
        reg.insert(old).await.unwrap();
        reg.insert(job("queued")).await.unwrap();

        let removed = reg
            .remove_finished_before(Utc::now() - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(reg.get("old").await.unwrap().is_none());
        assert!(reg.get("queued").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_unknown_job_errors() {
        let reg = InMemoryJobRegistry::new();
        assert!(matches!(
            reg.update(job("ghost")).await,
            Err(IndexError::JobNotFound(_))
        ));
    }
}
