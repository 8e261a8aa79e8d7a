use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::grouping::{group_by_page, most_frequent};
use super::website::{cms_matches, extract_website};
use super::{Phase, PipelineConfig, winning};
use crate::error::AppError;
use crate::job::{Job, JobSummary, PhaseStats};
use crate::job_store::JobStore;
use crate::models::{
    Ad, CachedPage, Classification, ClassificationInput, CmsProbe, Page, PersistRequest, SizeTier,
    UNKNOWN_CMS, WebsiteInfo, WinningAd,
};
use crate::pager::{AdPager, AdSearchQuery};
use crate::progress::ProgressTracker;
use crate::scheduler::JobRunner;
use crate::traits::{AdsSource, ContentClassifier, PageClassifier, ResultStore, WebsiteAnalyzer};

/// How a pipeline run ended, short of an error.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Completed(JobSummary),
    /// A phase left nothing to work on.
    NoResults {
        summary: JobSummary,
        phase: u8,
        reason: String,
    },
}

/// State threaded through the phases of one run.
struct RunState {
    summary: JobSummary,
    pages: BTreeMap<String, Page>,
    ads_by_page: BTreeMap<String, Vec<Ad>>,
    cache: HashMap<String, CachedPage>,
    winning: Vec<WinningAd>,
}

/// Runs the eight phases of a job against injected collaborators.
#[derive(Clone)]
pub struct PipelineExecutor<A, R, P, W, C>
where
    A: AdsSource,
    R: ResultStore,
    P: PageClassifier,
    W: WebsiteAnalyzer,
    C: ContentClassifier,
{
    ads: A,
    results: R,
    page_classifier: P,
    analyzer: W,
    classifier: C,
    config: PipelineConfig,
}

impl<A, R, P, W, C> PipelineExecutor<A, R, P, W, C>
where
    A: AdsSource,
    R: ResultStore,
    P: PageClassifier,
    W: WebsiteAnalyzer,
    C: ContentClassifier,
{
    pub fn new(
        ads: A,
        results: R,
        page_classifier: P,
        analyzer: W,
        classifier: C,
        config: PipelineConfig,
    ) -> Self {
        Self {
            ads,
            results,
            page_classifier,
            analyzer,
            classifier,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs every phase in order, checking `cancel` before each one.
    ///
    /// A phase with zero usable output ends the run as
    /// [`PipelineOutcome::NoResults`]. `Err` means the job failed or was cancelled.
    pub async fn execute<J: JobStore>(
        &self,
        job: &Job,
        progress: &ProgressTracker<J>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, AppError> {
        let mut state = RunState {
            summary: JobSummary::default(),
            pages: BTreeMap::new(),
            ads_by_page: BTreeMap::new(),
            cache: HashMap::new(),
            winning: Vec::new(),
        };

        match self.run_phases(job, progress, cancel, &mut state).await {
            Ok(()) => Ok(PipelineOutcome::Completed(state.summary)),
            Err(AppError::PhaseUnrecoverable { phase, reason }) => {
                tracing::info!(job_id = %job.id, phase, %reason, "No results");
                Ok(PipelineOutcome::NoResults {
                    summary: state.summary,
                    phase,
                    reason,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn run_phases<J: JobStore>(
        &self,
        job: &Job,
        progress: &ProgressTracker<J>,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<(), AppError> {
        checkpoint(cancel)?;
        let ads = self.keyword_search(job, progress, state).await?;

        checkpoint(cancel)?;
        self.group_by_page(job, progress, state, &ads).await?;
        drop(ads);

        checkpoint(cancel)?;
        self.website_extraction(progress, state).await;

        checkpoint(cancel)?;
        self.cms_detection(job, progress, state).await?;

        checkpoint(cancel)?;
        self.reconcile_ads_count(job, progress, state).await?;

        checkpoint(cancel)?;
        self.website_enrichment(progress, state).await;

        checkpoint(cancel)?;
        self.winning_ad_detection(progress, state).await;

        checkpoint(cancel)?;
        self.persist(job, progress, state).await
    }

    // -----------------------------------------------------------------------
    // Phase 1: keyword search
    // -----------------------------------------------------------------------

    async fn keyword_search<J: JobStore>(
        &self,
        job: &Job,
        progress: &ProgressTracker<J>,
        state: &mut RunState,
    ) -> Result<Vec<Ad>, AppError> {
        let phase = Phase::KeywordSearch;
        progress.start_phase(phase).await;

        let total = job.keywords.len();
        let concurrency = self.ads.usable_credentials().clamp(1, total.max(1));
        tracing::debug!(job_id = %job.id, concurrency, "Searching {} keyword(s)", total);

        let searches: Vec<_> = job
            .keywords
            .iter()
            .map(|keyword| self.search_keyword(job, keyword))
            .collect();
        let mut searches = stream::iter(searches).buffer_unordered(concurrency);

        let mut all_ads = Vec::new();
        let mut per_keyword = BTreeMap::new();
        let mut failed = 0u64;
        let mut done = 0;
        while let Some((keyword, result)) = searches.next().await {
            done += 1;
            let found = match result {
                Ok(ads) => ads,
                Err(AppError::NoCredentials) => return Err(AppError::NoCredentials),
                Err(e) => {
                    tracing::warn!(job_id = %job.id, keyword = %keyword, error = %e, "Keyword search failed");
                    failed += 1;
                    Vec::new()
                }
            };
            per_keyword.insert(keyword.clone(), json!(found.len()));
            progress
                .update_step(
                    phase,
                    "Keywords",
                    done,
                    total,
                    &format!("{keyword}: {} ads", found.len()),
                )
                .await;
            all_ads.extend(found);
        }

        state.summary.ads_found = all_ads.len() as u64;
        state.summary.errors += failed;

        let mut stats = PhaseStats::new();
        stats.insert("ads_found".into(), json!(all_ads.len()));
        stats.insert("keywords_failed".into(), json!(failed));
        stats.insert("per_keyword".into(), json!(per_keyword));
        progress
            .complete_phase(
                phase,
                format!("{} ads from {} keyword(s)", all_ads.len(), total),
                stats,
            )
            .await;

        if all_ads.is_empty() {
            return Err(unrecoverable(phase, "no ads found for any keyword"));
        }
        Ok(all_ads)
    }

    /// All ads for one keyword, backing off while every credential cools down.
    async fn search_keyword<'k>(
        &self,
        job: &Job,
        keyword: &'k String,
    ) -> (&'k String, Result<Vec<Ad>, AppError>) {
        let query = AdSearchQuery::keyword(keyword.as_str(), &job.countries, &job.languages);
        let mut pager = AdPager::new(self.ads.clone(), query, self.config.page_size)
            .with_page_delay(self.config.page_delay);

        let mut ads = Vec::new();
        let mut exhausted_attempts = 0u32;
        loop {
            match pager.next_page().await {
                Ok(Some(page)) => {
                    exhausted_attempts = 0;
                    ads.extend(page.into_iter().map(|mut ad| {
                        ad.keyword = Some(keyword.clone());
                        ad
                    }));
                }
                Ok(None) => break,
                Err(AppError::CredentialsExhausted { retry_after })
                    if exhausted_attempts < self.config.exhausted_max_attempts =>
                {
                    let delay = self.config.exhausted_backoff(exhausted_attempts, retry_after);
                    exhausted_attempts += 1;
                    tracing::warn!(
                        job_id = %job.id,
                        keyword = %keyword,
                        attempt = exhausted_attempts,
                        delay_secs = delay.as_secs(),
                        "All credentials cooling down, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (keyword, Err(e)),
            }
        }
        tracing::debug!(job_id = %job.id, keyword = %keyword, ads = ads.len(), "Keyword done");
        (keyword, Ok(ads))
    }

    // -----------------------------------------------------------------------
    // Phase 2: group by page
    // -----------------------------------------------------------------------

    async fn group_by_page<J: JobStore>(
        &self,
        job: &Job,
        progress: &ProgressTracker<J>,
        state: &mut RunState,
        ads: &[Ad],
    ) -> Result<(), AppError> {
        let phase = Phase::GroupByPage;
        progress.start_phase(phase).await;

        let blacklist = match self.results.blacklisted_page_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Blacklist unavailable, continuing without it");
                state.summary.errors += 1;
                HashSet::new()
            }
        };

        let grouping = group_by_page(ads, &blacklist, job.filters.min_ads);
        state.summary.unique_ads = grouping.unique_ads;
        state.summary.pages_found = grouping.pages_found;

        let mut stats = PhaseStats::new();
        stats.insert("unique_ads".into(), json!(grouping.unique_ads));
        stats.insert("pages_found".into(), json!(grouping.pages_found));
        stats.insert("blacklisted_pages".into(), json!(grouping.blacklisted_pages));
        stats.insert("blacklisted_ads".into(), json!(grouping.blacklisted_ads));
        stats.insert("pages_kept".into(), json!(grouping.pages.len()));
        stats.insert("min_ads".into(), json!(job.filters.min_ads));
        progress
            .complete_phase(
                phase,
                format!(
                    "{} of {} page(s) with at least {} ad(s)",
                    grouping.pages.len(),
                    grouping.pages_found,
                    job.filters.min_ads
                ),
                stats,
            )
            .await;

        if grouping.pages.is_empty() {
            return Err(unrecoverable(phase, "no page meets the minimum ad count"));
        }
        state.pages = grouping.pages;
        state.ads_by_page = grouping.ads_by_page;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phase 3: website extraction
    // -----------------------------------------------------------------------

    async fn website_extraction<J: JobStore>(&self, progress: &ProgressTracker<J>, state: &mut RunState) {
        let phase = Phase::WebsiteExtraction;
        progress.start_phase(phase).await;

        let page_ids: Vec<String> = state.pages.keys().cloned().collect();
        state.cache = match self.results.cached_pages(&page_ids).await {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(job_id = %progress.job_id(), error = %e, "Page cache unavailable");
                state.summary.errors += 1;
                HashMap::new()
            }
        };

        let (mut from_cache, mut extracted, mut missing) = (0u64, 0u64, 0u64);
        for (page_id, page) in state.pages.iter_mut() {
            let cached = state
                .cache
                .get(page_id)
                .and_then(|c| c.website.clone())
                .filter(|w| !w.is_empty());
            page.website = match cached {
                Some(website) => {
                    from_cache += 1;
                    Some(website)
                }
                None => {
                    let ads = state.ads_by_page.get(page_id).map(Vec::as_slice).unwrap_or(&[]);
                    let website = extract_website(ads);
                    if website.is_some() {
                        extracted += 1;
                    } else {
                        missing += 1;
                    }
                    website
                }
            };
        }

        let mut stats = PhaseStats::new();
        stats.insert("from_cache".into(), json!(from_cache));
        stats.insert("extracted".into(), json!(extracted));
        stats.insert("without_website".into(), json!(missing));
        progress
            .complete_phase(
                phase,
                format!("{} website(s), {} from cache", from_cache + extracted, from_cache),
                stats,
            )
            .await;
    }

    // -----------------------------------------------------------------------
    // Phase 4: CMS detection
    // -----------------------------------------------------------------------

    async fn cms_detection<J: JobStore>(
        &self,
        job: &Job,
        progress: &ProgressTracker<J>,
        state: &mut RunState,
    ) -> Result<(), AppError> {
        let phase = Phase::CmsDetection;
        progress.start_phase(phase).await;

        let mut to_probe: Vec<(String, String)> = Vec::new();
        let mut from_cache = 0u64;
        for (page_id, page) in state.pages.iter_mut() {
            if let Some(cms) = state.cache.get(page_id).and_then(CachedPage::known_cms) {
                page.is_shopify = cms.eq_ignore_ascii_case("shopify");
                page.cms = Some(cms.to_string());
                from_cache += 1;
            } else if let Some(website) = &page.website {
                to_probe.push((page_id.clone(), website.clone()));
            } else {
                page.cms = Some(UNKNOWN_CMS.to_string());
            }
        }

        let total = to_probe.len();
        let mut probes = stream::iter(to_probe)
            .map(|(page_id, website)| async move {
                let result = self.page_classifier.probe(&website).await;
                (page_id, website, result)
            })
            .buffer_unordered(self.config.cms_workers.max(1));

        let mut failures = 0u64;
        let mut done = 0;
        while let Some((page_id, website, result)) = probes.next().await {
            done += 1;
            let probe = result.unwrap_or_else(|e| {
                tracing::debug!(%website, error = %e, "CMS probe failed");
                failures += 1;
                CmsProbe::unknown()
            });
            progress
                .update_step(phase, "CMS", done, total, &format!("{website}: {}", probe.cms))
                .await;
            if let Some(page) = state.pages.get_mut(&page_id) {
                page.cms = Some(probe.cms);
                page.is_shopify = probe.is_shopify;
            }
        }
        drop(probes);
        state.summary.errors += failures;

        let before = state.pages.len();
        let filter = &job.filters.cms;
        state.pages.retain(|_, page| {
            cms_matches(filter, page.cms.as_deref().unwrap_or(UNKNOWN_CMS))
        });
        let kept: HashSet<&String> = state.pages.keys().collect();
        state.ads_by_page.retain(|page_id, _| kept.contains(page_id));

        let mut by_cms: BTreeMap<String, u64> = BTreeMap::new();
        for page in state.pages.values() {
            *by_cms
                .entry(page.cms.clone().unwrap_or_else(|| UNKNOWN_CMS.to_string()))
                .or_default() += 1;
        }
        let mut stats = PhaseStats::new();
        stats.insert("probed".into(), json!(total));
        stats.insert("from_cache".into(), json!(from_cache));
        stats.insert("probe_failures".into(), json!(failures));
        stats.insert("filtered_out".into(), json!(before - state.pages.len()));
        stats.insert("by_cms".into(), json!(by_cms));
        progress
            .complete_phase(
                phase,
                format!("{} of {} page(s) match the CMS filter", state.pages.len(), before),
                stats,
            )
            .await;

        if state.pages.is_empty() {
            return Err(unrecoverable(phase, "no page matches the CMS filter"));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phase 5: ads count reconciliation
    // -----------------------------------------------------------------------

    async fn reconcile_ads_count<J: JobStore>(
        &self,
        job: &Job,
        progress: &ProgressTracker<J>,
        state: &mut RunState,
    ) -> Result<(), AppError> {
        let phase = Phase::AdsCountReconciliation;
        progress.start_phase(phase).await;

        let page_ids: Vec<String> = state.pages.keys().cloned().collect();
        let batches: Vec<&[String]> = page_ids
            .chunks(self.config.reconciliation_batch_size.max(1))
            .collect();
        let total = batches.len();
        let mut failed_batches = 0u64;

        for (i, batch) in batches.into_iter().enumerate() {
            if i > 0 && !self.config.reconciliation_delay.is_zero() {
                tokio::time::sleep(self.config.reconciliation_delay).await;
            }
            match self
                .ads
                .fetch_pages_batch(batch, &job.countries, &job.languages)
                .await
            {
                Ok(mut found) => {
                    for page_id in batch {
                        let active = found.remove(page_id).unwrap_or_default();
                        let Some(page) = state.pages.get_mut(page_id) else {
                            continue;
                        };
                        page.ads_active_total = Some(active.len() as u64);
                        if !active.is_empty() {
                            if let Some(currency) =
                                most_frequent(active.iter().filter_map(|a| a.currency.as_deref()))
                            {
                                page.currency = Some(currency);
                            }
                            state.ads_by_page.insert(page_id.clone(), active);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, batch = i, error = %e, "Reconciliation batch failed");
                    failed_batches += 1;
                }
            }
            progress
                .update_step(phase, "Batches", i + 1, total, "")
                .await;
        }
        state.summary.errors += failed_batches;

        let before = state.pages.len();
        let min_ads = u64::from(job.filters.min_ads);
        let mut tiers: BTreeMap<&'static str, u64> = BTreeMap::new();
        state.pages.retain(|_, page| page.effective_ads_count() >= min_ads);
        for page in state.pages.values_mut() {
            let tier = SizeTier::from_active_ads(page.effective_ads_count());
            page.size_tier = Some(tier);
            *tiers.entry(tier.as_str()).or_default() += 1;
        }
        let kept: HashSet<&String> = state.pages.keys().collect();
        state.ads_by_page.retain(|page_id, _| kept.contains(page_id));
        state.summary.pages_after_filter = state.pages.len() as u64;

        let mut stats = PhaseStats::new();
        stats.insert("batches".into(), json!(total));
        stats.insert("failed_batches".into(), json!(failed_batches));
        stats.insert("filtered_out".into(), json!(before - state.pages.len()));
        stats.insert("size_tiers".into(), json!(tiers));
        progress
            .complete_phase(
                phase,
                format!("{} page(s) with at least {} active ad(s)", state.pages.len(), min_ads),
                stats,
            )
            .await;

        if state.pages.is_empty() {
            return Err(unrecoverable(phase, "no page keeps enough active ads"));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phase 6: website enrichment
    // -----------------------------------------------------------------------

    async fn website_enrichment<J: JobStore>(&self, progress: &ProgressTracker<J>, state: &mut RunState) {
        let phase = Phase::WebsiteEnrichment;
        progress.start_phase(phase).await;

        let now = Utc::now();
        let mut to_analyze: Vec<(String, String)> = Vec::new();
        let mut from_cache = 0u64;
        for (page_id, page) in state.pages.iter_mut() {
            let Some(website) = page.website.clone() else {
                continue;
            };
            match state.cache.get(page_id) {
                Some(cached) if cached.has_fresh_enrichment(self.config.website_cache_max_age, now) => {
                    from_cache += 1;
                    page.website_info = Some(WebsiteInfo {
                        product_count: cached.product_count,
                        currency: cached.currency.clone(),
                        ..Default::default()
                    });
                    page.classification = cached.category.clone().map(|category| Classification {
                        category,
                        subcategory: cached.subcategory.clone(),
                        confidence: 1.0,
                    });
                    page.enriched_at = cached.enriched_at;
                    if page.currency.is_none() {
                        page.currency = cached.currency.clone();
                    }
                }
                _ => to_analyze.push((page_id.clone(), website)),
            }
        }

        let total = to_analyze.len();
        let mut analyses = stream::iter(to_analyze)
            .map(|(page_id, website)| async move {
                let result = self.analyzer.analyze(&website).await;
                (page_id, website, result)
            })
            .buffer_unordered(self.config.enrichment_workers.max(1));

        let mut failures = 0u64;
        let mut done = 0;
        let mut to_classify = Vec::new();
        while let Some((page_id, website, result)) = analyses.next().await {
            done += 1;
            progress
                .update_step(phase, "Websites", done, total, &website)
                .await;
            let info = match result {
                Ok(info) => info,
                Err(e) => {
                    tracing::debug!(%website, error = %e, "Website analysis failed");
                    failures += 1;
                    continue;
                }
            };
            if let Some(text) = classification_text(&info) {
                to_classify.push(ClassificationInput {
                    page_id: page_id.clone(),
                    text,
                });
            }
            if let Some(page) = state.pages.get_mut(&page_id) {
                if page.currency.is_none() {
                    page.currency = info.currency.clone();
                }
                page.website_info = Some(info);
                page.enriched_at = Some(Utc::now());
            }
        }
        drop(analyses);

        to_classify.sort_by(|a, b| a.page_id.cmp(&b.page_id));
        let batch_size = self.config.classification_batch_size.max(1);
        let mut classified = 0u64;
        for (i, batch) in to_classify.chunks(batch_size).enumerate() {
            if i > 0 && !self.config.classification_delay.is_zero() {
                tokio::time::sleep(self.config.classification_delay).await;
            }
            match self.classifier.classify(batch).await {
                Ok(results) => {
                    for (page_id, classification) in results {
                        if let Some(page) = state.pages.get_mut(&page_id) {
                            page.classification = Some(classification);
                            classified += 1;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(batch = i, error = %e, "Classification batch failed");
                    failures += 1;
                }
            }
        }
        state.summary.errors += failures;
        state.summary.classified = classified;

        let mut stats = PhaseStats::new();
        stats.insert("analyzed".into(), json!(total));
        stats.insert("from_cache".into(), json!(from_cache));
        stats.insert("classified".into(), json!(classified));
        stats.insert("failures".into(), json!(failures));
        progress
            .complete_phase(
                phase,
                format!("{} site(s) analyzed, {} classified", total, classified),
                stats,
            )
            .await;
    }

    // -----------------------------------------------------------------------
    // Phase 7: winning ad detection
    // -----------------------------------------------------------------------

    async fn winning_ad_detection<J: JobStore>(&self, progress: &ProgressTracker<J>, state: &mut RunState) {
        let phase = Phase::WinningAdDetection;
        progress.start_phase(phase).await;

        let now = Utc::now().naive_utc();
        state.winning = state
            .ads_by_page
            .values()
            .flatten()
            .filter_map(|ad| winning::evaluate(ad, now, &self.config.winning_criteria))
            .collect();
        state.summary.winning_ads = state.winning.len() as u64;

        let pages_with_winners: HashSet<&str> =
            state.winning.iter().map(|w| w.page_id.as_str()).collect();
        let mut stats = PhaseStats::new();
        stats.insert("ads_checked".into(), json!(state.ads_by_page.values().map(Vec::len).sum::<usize>()));
        stats.insert("winning_ads".into(), json!(state.winning.len()));
        stats.insert("pages_with_winners".into(), json!(pages_with_winners.len()));
        progress
            .complete_phase(
                phase,
                format!("{} winning ad(s)", state.winning.len()),
                stats,
            )
            .await;
    }

    // -----------------------------------------------------------------------
    // Phase 8: persistence
    // -----------------------------------------------------------------------

    async fn persist<J: JobStore>(
        &self,
        job: &Job,
        progress: &ProgressTracker<J>,
        state: &mut RunState,
    ) -> Result<(), AppError> {
        let phase = Phase::Persistence;
        progress.start_phase(phase).await;

        let request = PersistRequest {
            job_id: job.id,
            countries: job.countries.clone(),
            pages: state.pages.values().cloned().collect(),
            ads: state.ads_by_page.values().flatten().cloned().collect(),
            winning_ads: std::mem::take(&mut state.winning),
            tracking_min_ads: self.config.tracking_min_ads,
        };
        let outcome = self.results.persist(request).await?;

        let summary = &mut state.summary;
        summary.pages_saved = outcome.pages_saved;
        summary.pages_new = outcome.new_page_ids.len() as u64;
        summary.ads_saved = outcome.ads_saved;
        summary.winning_new = outcome.new_winning_ad_ids.len() as u64;
        summary.new_page_ids = outcome.new_page_ids;
        summary.new_winning_ad_ids = outcome.new_winning_ad_ids;

        let mut stats = PhaseStats::new();
        stats.insert("pages_saved".into(), json!(summary.pages_saved));
        stats.insert("pages_new".into(), json!(summary.pages_new));
        stats.insert("ads_saved".into(), json!(summary.ads_saved));
        stats.insert("winning_saved".into(), json!(outcome.winning_saved));
        stats.insert("winning_new".into(), json!(summary.winning_new));
        stats.insert("snapshots_saved".into(), json!(outcome.snapshots_saved));
        stats.insert("pages_tracked".into(), json!(outcome.pages_tracked));
        progress
            .complete_phase(
                phase,
                format!(
                    "{} page(s) saved ({} new), {} winning ad(s) saved",
                    summary.pages_saved, summary.pages_new, outcome.winning_saved
                ),
                stats,
            )
            .await;
        Ok(())
    }
}

impl<A, R, P, W, C> JobRunner for PipelineExecutor<A, R, P, W, C>
where
    A: AdsSource + 'static,
    R: ResultStore + 'static,
    P: PageClassifier + 'static,
    W: WebsiteAnalyzer + 'static,
    C: ContentClassifier + 'static,
{
    async fn run<J: JobStore>(
        &self,
        job: &Job,
        progress: &ProgressTracker<J>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, AppError> {
        self.execute(job, progress, cancel).await
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), AppError> {
    if cancel.is_cancelled() {
        Err(AppError::Cancelled)
    } else {
        Ok(())
    }
}

fn unrecoverable(phase: Phase, reason: &str) -> AppError {
    AppError::PhaseUnrecoverable {
        phase: phase.number(),
        reason: reason.to_string(),
    }
}

fn classification_text(info: &WebsiteInfo) -> Option<String> {
    if let Some(sample) = info.text_sample.as_deref().filter(|s| !s.trim().is_empty()) {
        return Some(sample.to_string());
    }
    let joined = [info.title.as_deref(), info.description.as_deref()]
        .into_iter()
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" - ");
    (!joined.is_empty()).then_some(joined)
}
