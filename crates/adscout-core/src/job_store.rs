use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{ActiveJobsFilter, Job, JobStatus, JobSummary, PhaseResult, StatusCounts, SubmitJobRequest};

/// Terminal update written when a job stops running.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFinish {
    pub status: JobStatus,
    pub summary: Option<JobSummary>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl JobFinish {
    pub fn completed(summary: JobSummary) -> Self {
        Self {
            status: JobStatus::Completed,
            message: Some(format!(
                "Completed: {} page(s) saved, {} winning ad(s)",
                summary.pages_saved, summary.winning_ads
            )),
            summary: Some(summary),
            error: None,
        }
    }

    pub fn no_results(summary: JobSummary, reason: impl Into<String>) -> Self {
        Self {
            status: JobStatus::NoResults,
            summary: Some(summary),
            message: Some(reason.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            summary: None,
            message: None,
            error: Some(error.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: JobStatus::Cancelled,
            summary: None,
            message: Some("Cancelled at phase boundary".into()),
            error: None,
        }
    }
}

/// Persistent job queue and phase-history log.
///
/// Implementations must claim atomically (`SELECT FOR UPDATE SKIP LOCKED` or
/// equivalent) so two workers never run the same job. Progress and terminal
/// updates only apply to jobs that are still `running`.
pub trait JobStore: Send + Sync + Clone + 'static {
    fn create_job(
        &self,
        request: SubmitJobRequest,
    ) -> impl Future<Output = Result<Job, AppError>> + Send;

    /// Atomically moves up to `limit` pending jobs to `running`, highest
    /// priority first, then oldest first.
    fn claim_pending(
        &self,
        worker_id: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;

    /// Resets `running` jobs last updated before `stale_before`, or owned by
    /// `worker_id` when given, back to `pending`. Returns the number of jobs reset.
    fn recover_interrupted(
        &self,
        stale_before: DateTime<Utc>,
        worker_id: Option<&str>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Refreshes `updated_at` on running jobs and returns the ids among them
    /// for which cancellation was requested.
    fn heartbeat(
        &self,
        job_ids: &[Uuid],
    ) -> impl Future<Output = Result<Vec<Uuid>, AppError>> + Send;

    fn update_progress(
        &self,
        job_id: Uuid,
        phase: u8,
        percent: u8,
        message: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn append_phase(
        &self,
        job_id: Uuid,
        result: PhaseResult,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Moves a running job to a terminal status. Returns `false` if the job
    /// was no longer running.
    fn finish_job(
        &self,
        job_id: Uuid,
        finish: JobFinish,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Atomically cancels a pending job. Returns `false` if it was not pending.
    fn cancel_pending(&self, job_id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Flags a running job for cooperative cancellation. Returns `false` if it was not running.
    fn request_cancel(&self, job_id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn get_job(&self, job_id: Uuid) -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    /// Jobs of any status, newest first.
    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;

    /// Pending and running jobs, oldest first.
    fn list_active(
        &self,
        filter: &ActiveJobsFilter,
    ) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;

    fn count_by_status(&self) -> impl Future<Output = Result<StatusCounts, AppError>> + Send;

    /// Hands a running job back to the queue (graceful shutdown).
    fn release_job(&self, job_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;
}
