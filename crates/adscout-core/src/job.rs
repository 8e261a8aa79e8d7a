use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Status of a search job.
///
/// Transitions are monotonic: `pending → running → terminal`. A running job
/// may also be handed back to `pending` by crash recovery or shutdown release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    NoResults,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::NoResults,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::NoResults => "no_results",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::NoResults | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "no_results" => Ok(JobStatus::NoResults),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Filters applied while the pipeline narrows the page set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilters {
    /// Minimum number of ads a page must have to survive phases 2 and 5.
    pub min_ads: u32,
    /// Accepted CMS names. Empty accepts every page; `Other` accepts unknown platforms.
    #[serde(default)]
    pub cms: Vec<String>,
}

impl Default for JobFilters {
    fn default() -> Self {
        Self {
            min_ads: 1,
            cms: Vec::new(),
        }
    }
}

/// Free-form statistics recorded for one phase.
pub type PhaseStats = BTreeMap<String, serde_json::Value>;

/// Append-only record of one completed phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: u8,
    pub name: String,
    pub duration_ms: u64,
    /// Human-readable duration, e.g. `"1m 05s"`.
    pub duration: String,
    pub summary: String,
    #[serde(default)]
    pub stats: PhaseStats,
}

/// Aggregate counters stored on a finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub ads_found: u64,
    pub unique_ads: u64,
    pub pages_found: u64,
    pub pages_after_filter: u64,
    pub pages_saved: u64,
    pub pages_new: u64,
    pub ads_saved: u64,
    pub winning_ads: u64,
    pub winning_new: u64,
    pub classified: u64,
    pub errors: u64,
    /// Page ids first seen by this job.
    #[serde(default)]
    pub new_page_ids: Vec<String>,
    /// Winning ad ids first seen by this job.
    #[serde(default)]
    pub new_winning_ad_ids: Vec<String>,
}

/// A keyword-search job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub keywords: Vec<String>,
    pub countries: Vec<String>,
    pub languages: Vec<String>,
    pub filters: JobFilters,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_phase: u8,
    pub progress_percent: u8,
    pub progress_message: Option<String>,
    pub phase_history: Vec<PhaseResult>,
    pub result: Option<JobSummary>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
}

impl Job {
    /// Builds a fresh pending job from a submission.
    pub fn from_request(request: SubmitJobRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            keywords: request.keywords,
            countries: request.countries,
            languages: request.languages,
            filters: request.filters,
            priority: request.priority,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            current_phase: 0,
            progress_percent: 0,
            progress_message: None,
            phase_history: Vec::new(),
            result: None,
            error_message: None,
            worker_id: None,
        }
    }
}

/// Request to create a new search job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub keywords: Vec<String>,
    pub countries: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub filters: JobFilters,
    #[serde(default)]
    pub priority: i32,
}

impl SubmitJobRequest {
    pub fn new(keywords: Vec<String>, countries: Vec<String>) -> Self {
        Self {
            keywords,
            countries,
            languages: Vec::new(),
            filters: JobFilters::default(),
            priority: 0,
        }
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    pub fn with_min_ads(mut self, min_ads: u32) -> Self {
        self.filters.min_ads = min_ads;
        self
    }

    pub fn with_cms(mut self, cms: Vec<String>) -> Self {
        self.filters.cms = cms;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Trims keywords/countries, drops blanks and duplicates, then checks
    /// the request is runnable.
    pub fn normalized(mut self) -> Result<Self, AppError> {
        self.keywords = dedup_trimmed(self.keywords, false);
        self.countries = dedup_trimmed(self.countries, true);
        self.languages = dedup_trimmed(self.languages, false);
        self.filters.cms = dedup_trimmed(self.filters.cms, false);

        if self.keywords.is_empty() {
            return Err(AppError::ValidationError(
                "at least one keyword is required".into(),
            ));
        }
        if self.countries.is_empty() {
            return Err(AppError::ValidationError(
                "at least one country is required".into(),
            ));
        }
        if self.filters.min_ads == 0 {
            return Err(AppError::ValidationError("min_ads must be at least 1".into()));
        }
        Ok(self)
    }
}

fn dedup_trimmed(values: Vec<String>, uppercase: bool) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value = if uppercase {
            trimmed.to_uppercase()
        } else {
            trimmed.to_string()
        };
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job was pending and is now `cancelled`.
    Cancelled,
    /// The job is running; it will stop at its next phase boundary.
    CancelRequested,
    /// The job already reached a terminal state.
    NotCancellable,
    NotFound,
}

/// Which active jobs to list.
#[derive(Debug, Clone, Default)]
pub struct ActiveJobsFilter {
    /// Restrict to `pending` or `running`. Terminal statuses yield nothing.
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

/// Number of jobs per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts(pub BTreeMap<JobStatus, u64>);

impl StatusCounts {
    pub fn get(&self, status: JobStatus) -> u64 {
        self.0.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }
}

/// Configuration for the job scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub worker_id: String,
    pub max_concurrent_jobs: usize,
    pub poll_interval: Duration,
    /// A `running` job whose last heartbeat is older than this is considered orphaned.
    pub stale_after: Duration,
    /// How often the stale-job sweep is repeated after startup.
    pub recovery_interval: Duration,
    /// Upper bound on waiting for in-flight jobs during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            max_concurrent_jobs: 2,
            poll_interval: Duration::from_secs(3),
            stale_after: Duration::from_secs(30 * 60),
            recovery_interval: Duration::from_secs(5 * 60),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
