//! Bounded worker pool that drains the job queue.
//!
//! The scheduler is constructed explicitly by the process entry point and
//! driven by [`JobScheduler::run`] until its shutdown token fires. All of its
//! in-memory state can be rebuilt from the [`JobStore`]: on startup it resets
//! jobs a crashed process left `running`, and it keeps its own jobs fresh
//! with a heartbeat so the periodic stale sweep never reclaims them.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{
    ActiveJobsFilter, CancelOutcome, Job, JobStatus, SchedulerConfig, StatusCounts,
    SubmitJobRequest,
};
use crate::job_store::{JobFinish, JobStore};
use crate::pipeline::PipelineOutcome;
use crate::progress::ProgressTracker;

/// Longest error message persisted on a failed job.
pub const MAX_ERROR_CHARS: usize = 500;

/// Executes one claimed job to completion.
///
/// `cancel` fires when cancellation was requested; runners check it at safe
/// points and return [`AppError::Cancelled`].
pub trait JobRunner: Send + Sync + Clone + 'static {
    fn run<J: JobStore>(
        &self,
        job: &Job,
        progress: &ProgressTracker<J>,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<PipelineOutcome, AppError>> + Send;
}

/// Events emitted by the scheduler for monitoring/logging.
#[derive(Debug, Clone)]
pub enum SchedulerEvent<'a> {
    Started {
        worker_id: &'a str,
        max_concurrent_jobs: usize,
    },
    Recovered {
        jobs_reset: u64,
    },
    JobDispatched {
        job: &'a Job,
    },
    JobFinished {
        job_id: Uuid,
        status: JobStatus,
    },
    ShuttingDown {
        worker_id: &'a str,
        in_flight: usize,
    },
    Stopped {
        worker_id: &'a str,
        jobs_released: u64,
    },
}

/// Trait for receiving scheduler events (decoupled logging).
pub trait SchedulerReporter: Send + Sync {
    fn report(&self, event: SchedulerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSchedulerReporter;

impl SchedulerReporter for TracingSchedulerReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        match event {
            SchedulerEvent::Started {
                worker_id,
                max_concurrent_jobs,
            } => {
                tracing::info!(%worker_id, max_concurrent_jobs, "Scheduler started");
            }
            SchedulerEvent::Recovered { jobs_reset } => {
                if jobs_reset > 0 {
                    tracing::warn!(jobs_reset, "Reset interrupted jobs to pending");
                }
            }
            SchedulerEvent::JobDispatched { job } => {
                tracing::info!(
                    job_id = %job.id,
                    keywords = job.keywords.len(),
                    priority = job.priority,
                    "Job dispatched"
                );
            }
            SchedulerEvent::JobFinished { job_id, status } => {
                tracing::info!(%job_id, %status, "Job finished");
            }
            SchedulerEvent::ShuttingDown {
                worker_id,
                in_flight,
            } => {
                tracing::info!(%worker_id, in_flight, "Scheduler shutting down");
            }
            SchedulerEvent::Stopped {
                worker_id,
                jobs_released,
            } => {
                tracing::info!(%worker_id, jobs_released, "Scheduler stopped");
            }
        }
    }
}

/// Point-in-time view of the scheduler and the queue behind it.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub worker_id: String,
    pub max_concurrent_jobs: usize,
    pub in_flight: usize,
    pub jobs: StatusCounts,
}

struct InFlight {
    handle: JoinHandle<JobStatus>,
    cancel: CancellationToken,
}

/// Polls the job store and runs up to `max_concurrent_jobs` jobs at once.
#[derive(Clone)]
pub struct JobScheduler<J: JobStore, R: JobRunner> {
    store: J,
    runner: R,
    config: SchedulerConfig,
    in_flight: Arc<Mutex<HashMap<Uuid, InFlight>>>,
}

impl<J: JobStore, R: JobRunner> JobScheduler<J, R> {
    pub fn new(store: J, runner: R, config: SchedulerConfig) -> Self {
        Self {
            store,
            runner,
            config,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &J {
        &self.store
    }

    /// Run the scheduler loop until `shutdown` is cancelled, then drain.
    pub async fn run<SR: SchedulerReporter>(
        &self,
        shutdown: CancellationToken,
        reporter: &SR,
    ) -> Result<(), AppError> {
        let worker_id = self.config.worker_id.as_str();
        reporter.report(SchedulerEvent::Started {
            worker_id,
            max_concurrent_jobs: self.config.max_concurrent_jobs,
        });

        let jobs_reset = self.recover(Some(worker_id)).await;
        reporter.report(SchedulerEvent::Recovered { jobs_reset });
        let mut last_sweep = Instant::now();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.reap(reporter).await;
            self.heartbeat().await;

            if last_sweep.elapsed() >= self.config.recovery_interval {
                let jobs_reset = self.recover(None).await;
                reporter.report(SchedulerEvent::Recovered { jobs_reset });
                last_sweep = Instant::now();
            }

            let mut delay = self.config.poll_interval;
            let capacity = self
                .config
                .max_concurrent_jobs
                .saturating_sub(self.in_flight_count());
            if capacity > 0 {
                match self.store.claim_pending(worker_id, capacity).await {
                    Ok(jobs) => {
                        for job in jobs {
                            reporter.report(SchedulerEvent::JobDispatched { job: &job });
                            self.dispatch(job);
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to claim jobs");
                        delay = self.config.poll_interval * 2;
                    }
                }
            }

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = shutdown.cancelled() => break,
            }
        }

        reporter.report(SchedulerEvent::ShuttingDown {
            worker_id,
            in_flight: self.in_flight_count(),
        });
        let jobs_released = self.drain(reporter).await;
        reporter.report(SchedulerEvent::Stopped {
            worker_id,
            jobs_released,
        });

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Control plane
    // -----------------------------------------------------------------------

    /// Validates and enqueues a job. Returns as soon as it is persisted.
    pub async fn submit_job(&self, request: SubmitJobRequest) -> Result<Job, AppError> {
        let job = self.store.create_job(request.normalized()?).await?;
        tracing::info!(job_id = %job.id, keywords = job.keywords.len(), "Job submitted");
        Ok(job)
    }

    /// Cancels a pending job outright, or asks a running one to stop at its
    /// next phase boundary.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<CancelOutcome, AppError> {
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(CancelOutcome::NotFound);
        };

        if job.status == JobStatus::Pending && self.store.cancel_pending(job_id).await? {
            tracing::info!(%job_id, "Pending job cancelled");
            return Ok(CancelOutcome::Cancelled);
        }
        // Pending jobs claimed in the meantime fall through to here.
        if !job.status.is_terminal() && self.store.request_cancel(job_id).await? {
            if let Some(entry) = self.lock_in_flight().get(&job_id) {
                entry.cancel.cancel();
            }
            tracing::info!(%job_id, "Cancellation requested for running job");
            return Ok(CancelOutcome::CancelRequested);
        }
        Ok(CancelOutcome::NotCancellable)
    }

    pub async fn get_job_status(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        self.store.get_job(job_id).await
    }

    pub async fn list_active_jobs(&self, filter: &ActiveJobsFilter) -> Result<Vec<Job>, AppError> {
        self.store.list_active(filter).await
    }

    pub async fn stats(&self) -> Result<SchedulerStats, AppError> {
        Ok(SchedulerStats {
            worker_id: self.config.worker_id.clone(),
            max_concurrent_jobs: self.config.max_concurrent_jobs,
            in_flight: self.in_flight_count(),
            jobs: self.store.count_by_status().await?,
        })
    }

    /// Number of jobs this process is currently running.
    pub fn in_flight_count(&self) -> usize {
        self.lock_in_flight().len()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<Uuid, InFlight>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("In-flight table mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    async fn recover(&self, worker_id: Option<&str>) -> u64 {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let stale_before = Utc::now() - stale_after;
        match self.store.recover_interrupted(stale_before, worker_id).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "Failed to recover interrupted jobs");
                0
            }
        }
    }

    async fn heartbeat(&self) {
        let ids: Vec<Uuid> = self.lock_in_flight().keys().copied().collect();
        if ids.is_empty() {
            return;
        }
        match self.store.heartbeat(&ids).await {
            Ok(flagged) => {
                let in_flight = self.lock_in_flight();
                for job_id in flagged {
                    if let Some(entry) = in_flight.get(&job_id)
                        && !entry.cancel.is_cancelled()
                    {
                        tracing::info!(%job_id, "Cancellation requested externally");
                        entry.cancel.cancel();
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "Heartbeat failed"),
        }
    }

    fn dispatch(&self, job: Job) {
        let job_id = job.id;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(execute_job(
            self.store.clone(),
            self.runner.clone(),
            job,
            cancel.clone(),
        ));
        self.lock_in_flight()
            .insert(job_id, InFlight { handle, cancel });
    }

    async fn reap<SR: SchedulerReporter>(&self, reporter: &SR) {
        let finished: Vec<(Uuid, InFlight)> = {
            let mut in_flight = self.lock_in_flight();
            let done: Vec<Uuid> = in_flight
                .iter()
                .filter(|(_, entry)| entry.handle.is_finished())
                .map(|(id, _)| *id)
                .collect();
            done.into_iter()
                .filter_map(|id| in_flight.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        for (job_id, entry) in finished {
            match entry.handle.await {
                Ok(status) => reporter.report(SchedulerEvent::JobFinished { job_id, status }),
                Err(e) => tracing::error!(%job_id, error = %e, "Job task did not complete"),
            }
        }
    }

    /// Waits up to `shutdown_timeout` for in-flight jobs, then stops the
    /// stragglers and hands them back to the queue.
    async fn drain<SR: SchedulerReporter>(&self, reporter: &SR) -> u64 {
        let entries: Vec<(Uuid, InFlight)> = self.lock_in_flight().drain().collect();
        let deadline = Instant::now() + self.config.shutdown_timeout;
        let mut released = 0;

        for (job_id, mut entry) in entries {
            match tokio::time::timeout_at(deadline, &mut entry.handle).await {
                Ok(Ok(status)) => reporter.report(SchedulerEvent::JobFinished { job_id, status }),
                Ok(Err(e)) => tracing::error!(%job_id, error = %e, "Job task did not complete"),
                Err(_) => {
                    entry.cancel.cancel();
                    entry.handle.abort();
                    match self.store.release_job(job_id).await {
                        Ok(()) => {
                            tracing::warn!(%job_id, "Job did not finish in time, released to queue");
                            released += 1;
                        }
                        Err(e) => tracing::error!(%job_id, error = %e, "Failed to release job"),
                    }
                }
            }
        }
        released
    }
}

/// Runs one job and writes its terminal status. Never panics.
async fn execute_job<J: JobStore, R: JobRunner>(
    store: J,
    runner: R,
    job: Job,
    cancel: CancellationToken,
) -> JobStatus {
    let job_id = job.id;
    let progress = ProgressTracker::new(store.clone(), job_id);

    let outcome = AssertUnwindSafe(runner.run(&job, &progress, &cancel))
        .catch_unwind()
        .await;

    let finish = match outcome {
        Ok(Ok(PipelineOutcome::Completed(summary))) => JobFinish::completed(summary),
        Ok(Ok(PipelineOutcome::NoResults {
            summary, reason, ..
        })) => JobFinish::no_results(summary, reason),
        Ok(Err(AppError::Cancelled)) => JobFinish::cancelled(),
        Ok(Err(e)) => {
            tracing::error!(%job_id, error = %e, "Job failed");
            JobFinish::failed(e.truncated_message(MAX_ERROR_CHARS))
        }
        Err(panic) => {
            let message = format!("Worker panicked: {}", panic_message(panic.as_ref()));
            tracing::error!(%job_id, %message, "Job panicked");
            JobFinish::failed(message.chars().take(MAX_ERROR_CHARS).collect::<String>())
        }
    };

    let status = finish.status;
    match store.finish_job(job_id, finish).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(%job_id, %status, "Job was no longer running, result dropped"),
        Err(e) => tracing::error!(%job_id, error = %e, "Failed to record job result"),
    }
    status
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testutil::{MemoryJobStore, RunnerBehavior, StaticRunner};

    fn config() -> SchedulerConfig {
        SchedulerConfig::default()
            .with_worker_id("test-worker")
            .with_max_concurrent_jobs(2)
            .with_poll_interval(Duration::from_millis(50))
            .with_shutdown_timeout(Duration::from_secs(1))
    }

    fn request(keyword: &str) -> SubmitJobRequest {
        SubmitJobRequest::new(vec![keyword.into()], vec!["FR".into()])
    }

    /// Runs the scheduler for `window` of (paused) time, then shuts it down.
    async fn run_for(scheduler: &JobScheduler<MemoryJobStore, StaticRunner>, window: Duration) {
        let shutdown = CancellationToken::new();
        let handle = {
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run(shutdown, &TracingSchedulerReporter).await })
        };
        tokio::time::sleep(window).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_submitted_job_to_completion() {
        let store = MemoryJobStore::new();
        let runner = StaticRunner::new(RunnerBehavior::Complete);
        let scheduler = JobScheduler::new(store.clone(), runner.clone(), config());

        let job = scheduler.submit_job(request("shoes")).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        run_for(&scheduler, Duration::from_millis(200)).await;

        let job = scheduler.get_job_status(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.worker_id.as_deref(), Some("test-worker"));
        assert_eq!(runner.ran(), vec![job.id]);
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_request() {
        let scheduler = JobScheduler::new(
            MemoryJobStore::new(),
            StaticRunner::new(RunnerBehavior::Complete),
            config(),
        );
        let err = scheduler
            .submit_job(SubmitJobRequest::new(vec!["  ".into()], vec!["FR".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_running_job_is_recovered_and_rerun() {
        let store = MemoryJobStore::new();
        let mut orphan = Job::from_request(request("lamps"));
        orphan.status = JobStatus::Running;
        orphan.worker_id = Some("dead-worker".into());
        orphan.updated_at = Utc::now() - chrono::Duration::hours(2);
        store.insert(orphan.clone());

        let runner = StaticRunner::new(RunnerBehavior::Complete);
        let scheduler = JobScheduler::new(store.clone(), runner.clone(), config());
        run_for(&scheduler, Duration::from_millis(200)).await;

        let job = store.get_job(orphan.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(runner.ran(), vec![orphan.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_running_job_of_other_worker_is_left_alone() {
        let store = MemoryJobStore::new();
        let mut busy = Job::from_request(request("lamps"));
        busy.status = JobStatus::Running;
        busy.worker_id = Some("other-worker".into());
        store.insert(busy.clone());

        let runner = StaticRunner::new(RunnerBehavior::Complete);
        let scheduler = JobScheduler::new(store.clone(), runner.clone(), config());
        run_for(&scheduler, Duration::from_millis(200)).await;

        let job = store.get_job(busy.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(runner.ran().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let store = MemoryJobStore::new();
        let runner = StaticRunner::new(RunnerBehavior::Sleep(Duration::from_secs(10)));
        let scheduler = JobScheduler::new(store.clone(), runner.clone(), config());
        for kw in ["a", "b", "c"] {
            scheduler.submit_job(request(kw)).await.unwrap();
        }

        let shutdown = CancellationToken::new();
        let handle = {
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run(shutdown, &TracingSchedulerReporter).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(scheduler.in_flight_count(), 2);
        let stats = scheduler.stats().await.unwrap();
        assert_eq!(stats.jobs.get(JobStatus::Running), 2);
        assert_eq!(stats.jobs.get(JobStatus::Pending), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let stats = scheduler.stats().await.unwrap();
        assert_eq!(stats.jobs.get(JobStatus::Completed), 3);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_results_outcome() {
        let store = MemoryJobStore::new();
        let scheduler = JobScheduler::new(
            store.clone(),
            StaticRunner::new(RunnerBehavior::NoResults),
            config(),
        );
        let job = scheduler.submit_job(request("void")).await.unwrap();
        run_for(&scheduler, Duration::from_millis(200)).await;

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::NoResults);
        assert!(job.error_message.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_message_is_truncated() {
        let store = MemoryJobStore::new();
        let scheduler = JobScheduler::new(
            store.clone(),
            StaticRunner::new(RunnerBehavior::Fail("x".repeat(2_000))),
            config(),
        );
        let job = scheduler.submit_job(request("boom")).await.unwrap();
        run_for(&scheduler, Duration::from_millis(200)).await;

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.unwrap().chars().count(), MAX_ERROR_CHARS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_runner_marks_job_failed() {
        let store = MemoryJobStore::new();
        let scheduler = JobScheduler::new(
            store.clone(),
            StaticRunner::new(RunnerBehavior::Panic),
            config(),
        );
        let job = scheduler.submit_job(request("boom")).await.unwrap();
        run_for(&scheduler, Duration::from_millis(200)).await;

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("runner exploded"));
    }

    #[tokio::test]
    async fn test_cancel_pending_and_terminal_jobs() {
        let store = MemoryJobStore::new();
        let scheduler = JobScheduler::new(
            store.clone(),
            StaticRunner::new(RunnerBehavior::Complete),
            config(),
        );
        let job = scheduler.submit_job(request("shoes")).await.unwrap();

        assert_eq!(
            scheduler.cancel_job(job.id).await.unwrap(),
            CancelOutcome::Cancelled
        );
        assert_eq!(
            scheduler.cancel_job(job.id).await.unwrap(),
            CancelOutcome::NotCancellable
        );
        assert_eq!(
            scheduler.cancel_job(Uuid::new_v4()).await.unwrap(),
            CancelOutcome::NotFound
        );
        assert!(scheduler
            .list_active_jobs(&ActiveJobsFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_running_job_cooperatively() {
        let store = MemoryJobStore::new();
        let scheduler = JobScheduler::new(
            store.clone(),
            StaticRunner::new(RunnerBehavior::BlockUntilCancelled),
            config(),
        );
        let job = scheduler.submit_job(request("shoes")).await.unwrap();

        let shutdown = CancellationToken::new();
        let handle = {
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run(shutdown, &TracingSchedulerReporter).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            store.get_job(job.id).await.unwrap().unwrap().status,
            JobStatus::Running
        );

        assert_eq!(
            scheduler.cancel_job(job.id).await.unwrap(),
            CancelOutcome::CancelRequested
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            store.get_job(job.id).await.unwrap().unwrap().status,
            JobStatus::Cancelled
        );

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancel_request_is_picked_up_by_heartbeat() {
        let store = MemoryJobStore::new();
        let scheduler = JobScheduler::new(
            store.clone(),
            StaticRunner::new(RunnerBehavior::BlockUntilCancelled),
            config(),
        );
        let job = scheduler.submit_job(request("shoes")).await.unwrap();

        let shutdown = CancellationToken::new();
        let handle = {
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run(shutdown, &TracingSchedulerReporter).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Another process flags the job directly in the store.
        assert!(store.request_cancel(job.id).await.unwrap());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            store.get_job(job.id).await.unwrap().unwrap().status,
            JobStatus::Cancelled
        );

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_stuck_jobs() {
        let store = MemoryJobStore::new();
        let scheduler = JobScheduler::new(
            store.clone(),
            StaticRunner::new(RunnerBehavior::Sleep(Duration::from_secs(3_600))),
            config(),
        );
        let job = scheduler.submit_job(request("slow")).await.unwrap();
        run_for(&scheduler, Duration::from_millis(100)).await;

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.worker_id.is_none());
        assert_eq!(scheduler.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_errors_do_not_stop_the_loop() {
        let store = MemoryJobStore::new();
        store.fail_next_claim(AppError::DatabaseError("connection refused".into()));
        let scheduler = JobScheduler::new(
            store.clone(),
            StaticRunner::new(RunnerBehavior::Complete),
            config(),
        );
        let job = scheduler.submit_job(request("shoes")).await.unwrap();
        run_for(&scheduler, Duration::from_millis(400)).await;

        assert_eq!(
            store.get_job(job.id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }
}
