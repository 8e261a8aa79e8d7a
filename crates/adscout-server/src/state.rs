use adscout_client::ArchivePipeline;
use adscout_core::scheduler::JobScheduler;
use adscout_db::{Database, ResultRepository, SearchJobRepository};

/// Scheduler backed by PostgreSQL and the live ads archive.
pub type ServerScheduler = JobScheduler<SearchJobRepository, ArchivePipeline<ResultRepository>>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub db: Database,
    /// Same instance the embedded worker runs, so cancelling a job this
    /// process is executing also interrupts it locally.
    pub scheduler: ServerScheduler,
    pub api_key: String,
}
