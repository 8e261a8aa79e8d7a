use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use adscout_core::job::{Job, SubmitJobRequest};
use adscout_core::scheduler::SchedulerStats;

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateJobRequest {
    /// Search keywords, one archive query each
    pub keywords: Vec<String>,
    /// ISO country codes
    pub countries: Vec<String>,
    /// Ad language codes
    #[serde(default)]
    pub languages: Vec<String>,
    /// Minimum ads a page needs to be kept (default 1)
    pub min_ads: Option<u32>,
    /// Accepted CMS names; `Other` accepts unlisted platforms
    #[serde(default)]
    pub cms: Vec<String>,
    /// Higher runs first (default 0)
    pub priority: Option<i32>,
}

impl From<CreateJobRequest> for SubmitJobRequest {
    fn from(body: CreateJobRequest) -> Self {
        let request = SubmitJobRequest::new(body.keywords, body.countries)
            .with_languages(body.languages)
            .with_cms(body.cms);
        let request = match body.min_ads {
            Some(min) => request.with_min_ads(min),
            None => request,
        };
        match body.priority {
            Some(priority) => request.with_priority(priority),
            None => request,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    pub status: String,
    pub keywords: Vec<String>,
    pub countries: Vec<String>,
    pub languages: Vec<String>,
    pub min_ads: u32,
    pub cms: Vec<String>,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_phase: u8,
    pub progress_percent: u8,
    pub progress_message: Option<String>,
    /// One entry per completed phase
    pub phase_history: serde_json::Value,
    /// Aggregate counters, present once the job finished
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            status: job.status.to_string(),
            keywords: job.keywords,
            countries: job.countries,
            languages: job.languages,
            min_ads: job.filters.min_ads,
            cms: job.filters.cms,
            priority: job.priority,
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            current_phase: job.current_phase,
            progress_percent: job.progress_percent,
            progress_message: job.progress_message,
            phase_history: serde_json::to_value(&job.phase_history).unwrap_or_default(),
            result: job.result.and_then(|r| serde_json::to_value(r).ok()),
            error_message: job.error_message,
            worker_id: job.worker_id,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
    /// Only pending and running jobs, oldest first
    pub active: Option<bool>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CancelJobResponse {
    pub job_id: Uuid,
    /// `cancelled` for pending jobs, `cancel_requested` for running ones
    pub outcome: String,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StatsResponse {
    pub worker_id: String,
    pub max_concurrent_jobs: usize,
    pub in_flight: usize,
    /// Job count per status
    pub jobs: BTreeMap<String, u64>,
}

impl From<SchedulerStats> for StatsResponse {
    fn from(stats: SchedulerStats) -> Self {
        Self {
            worker_id: stats.worker_id,
            max_concurrent_jobs: stats.max_concurrent_jobs,
            in_flight: stats.in_flight,
            jobs: stats
                .jobs
                .0
                .into_iter()
                .map(|(status, count)| (status.to_string(), count))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
