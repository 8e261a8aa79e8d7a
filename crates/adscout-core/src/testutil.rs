//! Test utilities: in-memory and mock implementations of the core traits.
//!
//! All mocks use `Arc<Mutex<_>>` for interior mutability, so clones share
//! state and tests can assert on recorded calls.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{
    ActiveJobsFilter, Job, JobStatus, PhaseResult, StatusCounts, SubmitJobRequest,
};
use crate::job_store::{JobFinish, JobStore};
use crate::models::{
    Ad, CachedPage, Classification, ClassificationInput, CmsProbe, Page, PersistOutcome,
    PersistRequest, WebsiteInfo, WinningAd,
};
use crate::pager::{AdSearchQuery, PageCursor, SearchTarget};
use crate::pipeline::PipelineOutcome;
use crate::progress::ProgressTracker;
use crate::scheduler::JobRunner;
use crate::traits::{
    AdsSource, ContentClassifier, HttpRequest, HttpResponse, HttpTransport, PageClassifier,
    ResultStore, WebsiteAnalyzer,
};

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// Transport that replays queued responses and records every request.
#[derive(Clone)]
pub struct MockTransport {
    /// Each call pops the front. Once empty, `fallback` is returned.
    responses: Arc<Mutex<VecDeque<Result<HttpResponse, AppError>>>>,
    fallback: Option<HttpResponse>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl MockTransport {
    pub fn with_responses(responses: Vec<Result<HttpResponse, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            fallback: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answers every request with `response`.
    pub fn always(response: HttpResponse) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Some(response),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AppError> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(result), _) => result,
            (None, Some(response)) => Ok(response.clone()),
            (None, None) => Err(AppError::NetworkError("no mock response queued".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// MockAdsSource
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AdsSourceState {
    keyword_pages: HashMap<String, Vec<Vec<Ad>>>,
    keyword_errors: HashMap<String, VecDeque<AppError>>,
    page_ads: HashMap<String, Vec<Ad>>,
    search_calls: HashMap<String, usize>,
    batch_calls: Vec<Vec<String>>,
    batch_languages: Vec<Vec<String>>,
    in_flight: usize,
    peak_in_flight: usize,
}

/// Ads source serving canned pages per keyword and canned ads per page id.
///
/// Queued keyword errors are returned before any page, one per call,
/// leaving the cursor where it was.
#[derive(Clone)]
pub struct MockAdsSource {
    state: Arc<Mutex<AdsSourceState>>,
    usable_credentials: usize,
    search_delay: Duration,
}

impl Default for MockAdsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdsSource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AdsSourceState::default())),
            usable_credentials: 2,
            search_delay: Duration::ZERO,
        }
    }

    pub fn with_keyword_pages(self, keyword: &str, pages: Vec<Vec<Ad>>) -> Self {
        self.state
            .lock()
            .unwrap()
            .keyword_pages
            .insert(keyword.to_string(), pages);
        self
    }

    pub fn with_keyword_errors(self, keyword: &str, errors: Vec<AppError>) -> Self {
        self.state
            .lock()
            .unwrap()
            .keyword_errors
            .insert(keyword.to_string(), errors.into());
        self
    }

    pub fn with_page_ads(self, page_id: &str, ads: Vec<Ad>) -> Self {
        self.state
            .lock()
            .unwrap()
            .page_ads
            .insert(page_id.to_string(), ads);
        self
    }

    pub fn with_usable_credentials(mut self, n: usize) -> Self {
        self.usable_credentials = n;
        self
    }

    /// Holds every keyword page call open for `delay`, so overlapping calls are observable.
    pub fn with_search_delay(mut self, delay: Duration) -> Self {
        self.search_delay = delay;
        self
    }

    /// Number of `search_page` calls made for `keyword`, failed ones included.
    pub fn search_calls(&self, keyword: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .search_calls
            .get(keyword)
            .copied()
            .unwrap_or(0)
    }

    pub fn batch_calls(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().batch_calls.clone()
    }

    /// Languages passed with each batch call, in call order.
    pub fn batch_languages(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().batch_languages.clone()
    }

    /// Most keyword page calls that were ever in progress at once.
    pub fn peak_concurrent_searches(&self) -> usize {
        self.state.lock().unwrap().peak_in_flight
    }

    async fn keyword_page(&self, keyword: &str, cursor: &mut PageCursor) -> Result<Vec<Ad>, AppError> {
        {
            let mut state = self.state.lock().unwrap();
            *state.search_calls.entry(keyword.to_string()).or_default() += 1;
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
        }
        if !self.search_delay.is_zero() {
            tokio::time::sleep(self.search_delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        if let Some(err) = state
            .keyword_errors
            .get_mut(keyword)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        let pages = state.keyword_pages.get(keyword).cloned().unwrap_or_default();
        let index = cursor.pages_fetched as usize;
        let page = pages.get(index).cloned().unwrap_or_default();
        cursor.pages_fetched += 1;
        cursor.done = index + 1 >= pages.len();
        cursor.after = (!cursor.done).then(|| format!("cursor-{}", index + 1));
        Ok(page)
    }
}

impl AdsSource for MockAdsSource {
    async fn search_page(
        &self,
        query: &AdSearchQuery,
        cursor: &mut PageCursor,
    ) -> Result<Vec<Ad>, AppError> {
        match &query.target {
            SearchTarget::Terms(keyword) => self.keyword_page(keyword, cursor).await,
            SearchTarget::PageIds(ids) => {
                let state = self.state.lock().unwrap();
                let ads = ids
                    .iter()
                    .flat_map(|id| state.page_ads.get(id).cloned().unwrap_or_default())
                    .collect();
                cursor.pages_fetched += 1;
                cursor.done = true;
                Ok(ads)
            }
        }
    }

    async fn fetch_pages_batch(
        &self,
        page_ids: &[String],
        _countries: &[String],
        languages: &[String],
    ) -> Result<HashMap<String, Vec<Ad>>, AppError> {
        let mut state = self.state.lock().unwrap();
        state.batch_calls.push(page_ids.to_vec());
        state.batch_languages.push(languages.to_vec());
        Ok(page_ids
            .iter()
            .filter_map(|id| state.page_ads.get(id).map(|ads| (id.clone(), ads.clone())))
            .collect())
    }

    fn usable_credentials(&self) -> usize {
        self.usable_credentials
    }
}

// ---------------------------------------------------------------------------
// MockPageClassifier
// ---------------------------------------------------------------------------

/// CMS prober with per-site answers and a default for everything else.
#[derive(Clone)]
pub struct MockPageClassifier {
    default: Option<CmsProbe>,
    sites: Arc<Mutex<HashMap<String, CmsProbe>>>,
    pub probed: Arc<Mutex<Vec<String>>>,
}

impl MockPageClassifier {
    /// Reports every site as Shopify.
    pub fn shopify() -> Self {
        Self {
            default: Some(CmsProbe {
                cms: "Shopify".into(),
                is_shopify: true,
                confidence: 1.0,
            }),
            sites: Arc::new(Mutex::new(HashMap::new())),
            probed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fails every probe not configured with [`with_site`](Self::with_site).
    pub fn failing() -> Self {
        Self {
            default: None,
            sites: Arc::new(Mutex::new(HashMap::new())),
            probed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_site(self, url: &str, probe: CmsProbe) -> Self {
        self.sites.lock().unwrap().insert(url.to_string(), probe);
        self
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }
}

impl PageClassifier for MockPageClassifier {
    async fn probe(&self, url: &str) -> Result<CmsProbe, AppError> {
        self.probed.lock().unwrap().push(url.to_string());
        if let Some(probe) = self.sites.lock().unwrap().get(url) {
            return Ok(probe.clone());
        }
        self.default
            .clone()
            .ok_or_else(|| AppError::HttpError(format!("probe failed for {url}")))
    }
}

// ---------------------------------------------------------------------------
// MockWebsiteAnalyzer
// ---------------------------------------------------------------------------

/// Analyzer that describes every site by its URL.
#[derive(Clone, Default)]
pub struct MockWebsiteAnalyzer {
    error: Arc<Mutex<Option<AppError>>>,
    pub analyzed: Arc<Mutex<Vec<String>>>,
}

impl MockWebsiteAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next analysis with `error`.
    pub fn with_error(self, error: AppError) -> Self {
        *self.error.lock().unwrap() = Some(error);
        self
    }

    pub fn analyzed(&self) -> Vec<String> {
        self.analyzed.lock().unwrap().clone()
    }
}

impl WebsiteAnalyzer for MockWebsiteAnalyzer {
    async fn analyze(&self, url: &str) -> Result<WebsiteInfo, AppError> {
        self.analyzed.lock().unwrap().push(url.to_string());
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(WebsiteInfo {
            title: Some(format!("Store at {url}")),
            description: None,
            product_count: Some(24),
            currency: Some("EUR".into()),
            theme: None,
            text_sample: Some(format!("Products sold at {url}")),
        })
    }
}

// ---------------------------------------------------------------------------
// MockContentClassifier
// ---------------------------------------------------------------------------

/// Classifier that files everything under one category.
#[derive(Clone)]
pub struct MockContentClassifier {
    category: String,
    pub batches: Arc<Mutex<Vec<usize>>>,
}

impl MockContentClassifier {
    pub fn new(category: &str) -> Self {
        Self {
            category: category.to_string(),
            batches: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ContentClassifier for MockContentClassifier {
    async fn classify(
        &self,
        batch: &[ClassificationInput],
    ) -> Result<HashMap<String, Classification>, AppError> {
        self.batches.lock().unwrap().push(batch.len());
        Ok(batch
            .iter()
            .map(|item| {
                (
                    item.page_id.clone(),
                    Classification {
                        category: self.category.clone(),
                        subcategory: None,
                        confidence: 0.8,
                    },
                )
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryResultStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ResultState {
    blacklist: HashSet<String>,
    cache: HashMap<String, CachedPage>,
    pages: BTreeMap<String, Page>,
    ads: BTreeMap<String, Ad>,
    winning: BTreeMap<String, WinningAd>,
    persist_error: Option<AppError>,
}

/// Result store that keeps everything in memory and tracks what was new.
#[derive(Clone, Default)]
pub struct MemoryResultStore {
    state: Arc<Mutex<ResultState>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blacklist<'a>(self, page_ids: impl IntoIterator<Item = &'a str>) -> Self {
        self.state
            .lock()
            .unwrap()
            .blacklist
            .extend(page_ids.into_iter().map(str::to_string));
        self
    }

    pub fn with_cached(self, page: CachedPage) -> Self {
        self.state
            .lock()
            .unwrap()
            .cache
            .insert(page.page_id.clone(), page);
        self
    }

    /// Fails the next `persist` call with `error`.
    pub fn with_persist_error(self, error: AppError) -> Self {
        self.state.lock().unwrap().persist_error = Some(error);
        self
    }

    pub fn saved_pages(&self) -> Vec<Page> {
        self.state.lock().unwrap().pages.values().cloned().collect()
    }

    pub fn saved_ads(&self) -> Vec<Ad> {
        self.state.lock().unwrap().ads.values().cloned().collect()
    }

    pub fn saved_winning(&self) -> Vec<WinningAd> {
        self.state.lock().unwrap().winning.values().cloned().collect()
    }
}

impl ResultStore for MemoryResultStore {
    async fn blacklisted_page_ids(&self) -> Result<HashSet<String>, AppError> {
        Ok(self.state.lock().unwrap().blacklist.clone())
    }

    async fn cached_pages(&self, page_ids: &[String]) -> Result<HashMap<String, CachedPage>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(page_ids
            .iter()
            .filter_map(|id| state.cache.get(id).map(|c| (id.clone(), c.clone())))
            .collect())
    }

    async fn persist(&self, request: PersistRequest) -> Result<PersistOutcome, AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.persist_error.take() {
            return Err(e);
        }

        let mut outcome = PersistOutcome::default();
        for page in request.pages {
            outcome.pages_saved += 1;
            if page.effective_ads_count() >= request.tracking_min_ads {
                outcome.pages_tracked += 1;
            }
            match state.pages.get_mut(&page.page_id) {
                Some(existing) => {
                    existing.keywords.extend(page.keywords.iter().cloned());
                    existing.ad_ids.extend(page.ad_ids.iter().cloned());
                }
                None => {
                    outcome.new_page_ids.push(page.page_id.clone());
                    state.pages.insert(page.page_id.clone(), page);
                }
            }
        }
        for ad in request.ads {
            outcome.ads_saved += 1;
            outcome.snapshots_saved += 1;
            state.ads.insert(ad.id.clone(), ad);
        }
        for winning in request.winning_ads {
            outcome.winning_saved += 1;
            if !state.winning.contains_key(&winning.ad_id) {
                outcome.new_winning_ad_ids.push(winning.ad_id.clone());
            }
            state.winning.insert(winning.ad_id.clone(), winning);
        }
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// MemoryJobStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct JobState {
    jobs: Vec<Job>,
    cancel_requested: HashSet<Uuid>,
    claim_error: Option<AppError>,
}

/// Job store backed by an in-memory `Vec`, honoring the same state rules
/// as the Postgres store.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<Mutex<JobState>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `job` as-is, for seeding crash-recovery scenarios.
    pub fn insert(&self, job: Job) {
        self.state.lock().unwrap().jobs.push(job);
    }

    /// Fails the next `claim_pending` call with `error`.
    pub fn fail_next_claim(&self, error: AppError) {
        self.state.lock().unwrap().claim_error = Some(error);
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().unwrap().jobs.clone()
    }

    fn with_running<F>(&self, job_id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        let mut state = self.state.lock().unwrap();
        match state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Running)
        {
            Some(job) => {
                f(job);
                job.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }
}

impl JobStore for MemoryJobStore {
    async fn create_job(&self, request: SubmitJobRequest) -> Result<Job, AppError> {
        let job = Job::from_request(request.normalized()?);
        self.state.lock().unwrap().jobs.push(job.clone());
        Ok(job)
    }

    async fn claim_pending(&self, worker_id: &str, limit: usize) -> Result<Vec<Job>, AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.claim_error.take() {
            return Err(e);
        }
        let mut pending: Vec<usize> = state
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.status == JobStatus::Pending)
            .map(|(i, _)| i)
            .collect();
        pending.sort_by(|&a, &b| {
            let (ja, jb) = (&state.jobs[a], &state.jobs[b]);
            jb.priority
                .cmp(&ja.priority)
                .then(ja.created_at.cmp(&jb.created_at))
        });

        let now = Utc::now();
        let mut claimed = Vec::new();
        for i in pending.into_iter().take(limit) {
            let job = &mut state.jobs[i];
            job.status = JobStatus::Running;
            job.worker_id = Some(worker_id.to_string());
            job.started_at = Some(now);
            job.updated_at = now;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn recover_interrupted(
        &self,
        stale_before: DateTime<Utc>,
        worker_id: Option<&str>,
    ) -> Result<u64, AppError> {
        let mut state = self.state.lock().unwrap();
        let mut recovered = 0;
        for job in state.jobs.iter_mut().filter(|j| j.status == JobStatus::Running) {
            if job.updated_at < stale_before || (worker_id.is_some() && job.worker_id.as_deref() == worker_id) {
                job.status = JobStatus::Pending;
                job.worker_id = None;
                job.started_at = None;
                job.current_phase = 0;
                job.progress_percent = 0;
                job.progress_message = Some("Recovered after interruption".into());
                job.phase_history.clear();
                job.updated_at = Utc::now();
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn heartbeat(&self, job_ids: &[Uuid]) -> Result<Vec<Uuid>, AppError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let mut flagged = Vec::new();
        let requested = state.cancel_requested.clone();
        for job in state
            .jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Running && job_ids.contains(&j.id))
        {
            job.updated_at = now;
            if requested.contains(&job.id) {
                flagged.push(job.id);
            }
        }
        Ok(flagged)
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        phase: u8,
        percent: u8,
        message: &str,
    ) -> Result<(), AppError> {
        self.with_running(job_id, |job| {
            job.current_phase = phase;
            job.progress_percent = percent.min(100);
            job.progress_message = Some(message.to_string());
        });
        Ok(())
    }

    async fn append_phase(&self, job_id: Uuid, result: PhaseResult) -> Result<(), AppError> {
        self.with_running(job_id, |job| job.phase_history.push(result));
        Ok(())
    }

    async fn finish_job(&self, job_id: Uuid, finish: JobFinish) -> Result<bool, AppError> {
        let finished = self.with_running(job_id, |job| {
            job.status = finish.status;
            job.completed_at = Some(Utc::now());
            job.result = finish.summary;
            job.error_message = finish.error;
            if let Some(message) = finish.message {
                job.progress_message = Some(message);
            }
            if finish.status == JobStatus::Completed {
                job.progress_percent = 100;
            }
        });
        if finished {
            self.state.lock().unwrap().cancel_requested.remove(&job_id);
        }
        Ok(finished)
    }

    async fn cancel_pending(&self, job_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        match state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Pending)
        {
            Some(job) => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn request_cancel(&self, job_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        let running = state
            .jobs
            .iter()
            .any(|j| j.id == job_id && j.status == JobStatus::Running);
        if running {
            state.cancel_requested.insert(job_id);
        }
        Ok(running)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .jobs
            .iter()
            .find(|j| j.id == job_id)
            .cloned())
    }

    async fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, AppError> {
        let mut jobs: Vec<Job> = self
            .state
            .lock()
            .unwrap()
            .jobs
            .iter()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn list_active(&self, filter: &ActiveJobsFilter) -> Result<Vec<Job>, AppError> {
        let mut jobs: Vec<Job> = self
            .state
            .lock()
            .unwrap()
            .jobs
            .iter()
            .filter(|j| j.status.is_active())
            .filter(|j| filter.status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, AppError> {
        let mut counts = BTreeMap::new();
        for job in &self.state.lock().unwrap().jobs {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        Ok(StatusCounts(counts))
    }

    async fn release_job(&self, job_id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Running)
        {
            job.status = JobStatus::Pending;
            job.worker_id = None;
            job.started_at = None;
            job.current_phase = 0;
            job.progress_percent = 0;
            job.progress_message = Some("Released on shutdown".into());
            job.phase_history.clear();
            job.updated_at = Utc::now();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticRunner
// ---------------------------------------------------------------------------

/// What a [`StaticRunner`] does with each job.
#[derive(Debug, Clone)]
pub enum RunnerBehavior {
    Complete,
    NoResults,
    Fail(String),
    Panic,
    /// Sleeps until cancelled, then reports cancellation.
    BlockUntilCancelled,
    /// Sleeps for the given time, then completes.
    Sleep(Duration),
}

/// Job runner with scripted behavior that records the jobs it ran.
#[derive(Clone)]
pub struct StaticRunner {
    behavior: RunnerBehavior,
    pub ran: Arc<Mutex<Vec<Uuid>>>,
}

impl StaticRunner {
    pub fn new(behavior: RunnerBehavior) -> Self {
        Self {
            behavior,
            ran: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn ran(&self) -> Vec<Uuid> {
        self.ran.lock().unwrap().clone()
    }
}

impl JobRunner for StaticRunner {
    async fn run<J: JobStore>(
        &self,
        job: &Job,
        _progress: &ProgressTracker<J>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, AppError> {
        self.ran.lock().unwrap().push(job.id);
        match &self.behavior {
            RunnerBehavior::Complete => Ok(PipelineOutcome::Completed(Default::default())),
            RunnerBehavior::NoResults => Ok(PipelineOutcome::NoResults {
                summary: Default::default(),
                phase: 1,
                reason: "no ads found for any keyword".into(),
            }),
            RunnerBehavior::Fail(message) => Err(AppError::Generic(message.clone())),
            RunnerBehavior::Panic => panic!("runner exploded"),
            RunnerBehavior::BlockUntilCancelled => {
                cancel.cancelled().await;
                Err(AppError::Cancelled)
            }
            RunnerBehavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(PipelineOutcome::Completed(Default::default()))
            }
        }
    }
}
