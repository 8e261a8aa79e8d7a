//! The eight-phase search pipeline run for every job.

mod executor;
pub mod grouping;
pub mod website;
pub mod winning;

use std::fmt;
use std::time::Duration;

pub use executor::{PipelineExecutor, PipelineOutcome};
pub use winning::{DEFAULT_WINNING_CRITERIA, WinningCriterion};

/// Number of phases in a job.
pub const TOTAL_PHASES: u8 = 8;

/// Ordered pipeline phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    KeywordSearch = 1,
    GroupByPage = 2,
    WebsiteExtraction = 3,
    CmsDetection = 4,
    AdsCountReconciliation = 5,
    WebsiteEnrichment = 6,
    WinningAdDetection = 7,
    Persistence = 8,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::KeywordSearch,
        Phase::GroupByPage,
        Phase::WebsiteExtraction,
        Phase::CmsDetection,
        Phase::AdsCountReconciliation,
        Phase::WebsiteEnrichment,
        Phase::WinningAdDetection,
        Phase::Persistence,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::KeywordSearch => "Keyword search",
            Phase::GroupByPage => "Group by page",
            Phase::WebsiteExtraction => "Website extraction",
            Phase::CmsDetection => "CMS detection",
            Phase::AdsCountReconciliation => "Ads count reconciliation",
            Phase::WebsiteEnrichment => "Website enrichment",
            Phase::WinningAdDetection => "Winning ad detection",
            Phase::Persistence => "Persistence",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Phase {}/{}: {}", self.number(), TOTAL_PHASES, self.name())
    }
}

/// Tuning knobs for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Requested page size for keyword searches.
    pub page_size: u32,
    /// Pause between consecutive pages of one keyword.
    pub page_delay: Duration,
    pub cms_workers: usize,
    pub enrichment_workers: usize,
    /// Enrichment older than this is recomputed.
    pub website_cache_max_age: Duration,
    pub reconciliation_batch_size: usize,
    pub reconciliation_delay: Duration,
    pub classification_batch_size: usize,
    pub classification_delay: Duration,
    pub winning_criteria: Vec<WinningCriterion>,
    /// Minimum active ads for a page to be recorded in the tracking series.
    pub tracking_min_ads: u64,
    /// Backoff applied when every credential is cooling down.
    pub exhausted_backoff_base: Duration,
    pub exhausted_backoff_max: Duration,
    pub exhausted_max_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            page_delay: Duration::from_millis(300),
            cms_workers: 8,
            enrichment_workers: 8,
            website_cache_max_age: Duration::from_secs(24 * 60 * 60),
            reconciliation_batch_size: 10,
            reconciliation_delay: Duration::from_millis(500),
            classification_batch_size: 10,
            classification_delay: Duration::from_secs(2),
            winning_criteria: DEFAULT_WINNING_CRITERIA.to_vec(),
            tracking_min_ads: 10,
            exhausted_backoff_base: Duration::from_secs(5),
            exhausted_backoff_max: Duration::from_secs(120),
            exhausted_max_attempts: 5,
        }
    }
}

impl PipelineConfig {
    /// Wait before retrying a page after credential exhaustion number `attempt`
    /// (0-indexed): exponential, never shorter than the pool's own estimate.
    pub fn exhausted_backoff(&self, attempt: u32, retry_after: Duration) -> Duration {
        let exponential = self
            .exhausted_backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        exponential
            .max(retry_after)
            .min(self.exhausted_backoff_max)
    }
}

/// Global progress at the start of `phase`.
pub fn phase_percent(phase: Phase) -> u8 {
    (u32::from(phase.number() - 1) * 100 / u32::from(TOTAL_PHASES)) as u8
}

/// Global progress for `current` of `total` items done within `phase`.
pub fn step_percent(phase: Phase, current: usize, total: usize) -> u8 {
    let within = if total == 0 {
        0.0
    } else {
        (current.min(total) as f64) / (total as f64)
    };
    let percent = (f64::from(phase.number() - 1) + within) / f64::from(TOTAL_PHASES) * 100.0;
    percent.floor().clamp(0.0, 100.0) as u8
}
