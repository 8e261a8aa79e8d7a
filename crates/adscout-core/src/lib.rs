pub mod circuit_breaker;
pub mod credentials;
pub mod error;
pub mod job;
pub mod job_store;
pub mod models;
pub mod pager;
pub mod pipeline;
pub mod progress;
pub mod resilient;
pub mod scheduler;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStatus};
pub use credentials::{
    Credential, CredentialPool, CredentialPoolConfig, CredentialSpec, CredentialStats,
    RateLimitOutcome,
};
pub use error::{AppError, RateLimitSource};
pub use job::{
    ActiveJobsFilter, CancelOutcome, Job, JobFilters, JobStatus, JobSummary, PhaseResult,
    SchedulerConfig, StatusCounts, SubmitJobRequest,
};
pub use job_store::{JobFinish, JobStore};
pub use models::{Ad, CachedPage, Classification, CmsProbe, Page, WebsiteInfo, WinningAd};
pub use pager::{AdPager, AdSearchQuery, PageCursor, SearchTarget};
pub use pipeline::{PipelineConfig, PipelineExecutor, PipelineOutcome};
pub use progress::ProgressTracker;
pub use resilient::{ResilientHttpClient, RetryPolicy};
pub use scheduler::{
    JobRunner, JobScheduler, SchedulerEvent, SchedulerReporter, SchedulerStats,
    TracingSchedulerReporter,
};
pub use traits::{
    AdsSource, ContentClassifier, HttpRequest, HttpResponse, HttpTransport, PageClassifier,
    ResultStore, WebsiteAnalyzer,
};
