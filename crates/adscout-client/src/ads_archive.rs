//! Client for the ads-archive Graph API endpoint.
//!
//! Pagination, credential rotation and upstream error classification live
//! here; retries and circuit breaking are delegated to
//! [`ResilientHttpClient`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use adscout_core::circuit_breaker::CircuitBreaker;
use adscout_core::credentials::{
    Credential, CredentialPool, CredentialPoolConfig, CredentialSpec, RateLimitOutcome,
};
use adscout_core::error::{AppError, RateLimitSource};
use adscout_core::models::Ad;
use adscout_core::pager::{AdPager, AdSearchQuery, PageCursor, SearchTarget};
use adscout_core::resilient::{ResilientHttpClient, RetryPolicy};
use adscout_core::traits::{AdsSource, HttpRequest, HttpResponse, HttpTransport};
use futures::Stream;
use serde::Deserialize;
use url::Url;

use crate::transport::ReqwestTransport;

/// Upstream error codes that signal a soft rate limit.
pub const RATE_LIMIT_CODES: [i64; 5] = [4, 17, 32, 613, 80004];

/// Upstream error code for an invalid or expired access token.
const INVALID_TOKEN_CODE: i64 = 190;

const DEFAULT_FIELDS: &[&str] = &[
    "id",
    "page_id",
    "page_name",
    "ad_creation_time",
    "ad_delivery_start_time",
    "ad_creative_bodies",
    "ad_creative_link_captions",
    "ad_creative_link_titles",
    "ad_snapshot_url",
    "eu_total_reach",
    "languages",
    "publisher_platforms",
    "currency",
];

/// Connection and pagination settings for the ads archive.
#[derive(Debug, Clone)]
pub struct AdsArchiveConfig {
    pub base_url: String,
    pub api_version: String,
    pub page_size: u32,
    /// Page size is never halved below this.
    pub min_page_size: u32,
    pub request_timeout: Duration,
    pub fields: Vec<String>,
    /// Most page ids sent in one batch request.
    pub max_batch_size: usize,
}

impl Default for AdsArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.facebook.com".into(),
            api_version: "v24.0".into(),
            page_size: 1000,
            min_page_size: 100,
            request_timeout: Duration::from_secs(20),
            fields: DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
            max_batch_size: 10,
        }
    }
}

impl AdsArchiveConfig {
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}/ads_archive",
            self.base_url.trim_end_matches('/'),
            self.api_version
        )
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ArchiveEnvelope {
    #[serde(default)]
    data: Vec<Ad>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    cursors: Option<Cursors>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Cursors {
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: UpstreamErrorBody,
}

#[derive(Debug, Deserialize)]
struct UpstreamErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

/// One decoded page of results.
#[derive(Debug)]
struct ArchivePage {
    ads: Vec<Ad>,
    /// Cursor for the following page; `None` when this was the last one.
    after: Option<String>,
}

fn is_rate_limit(code: Option<i64>, message: &str) -> bool {
    let message = message.to_lowercase();
    code.is_some_and(|c| RATE_LIMIT_CODES.contains(&c))
        || message.contains("rate limit")
        || message.contains("too many calls")
}

fn is_page_size_error(message: &str) -> bool {
    message.to_lowercase().contains("reduce the amount of data")
}

/// Turns a raw response into a page or a typed upstream error.
///
/// `limit` is the page size that was requested; `http_cooldown` is the
/// cooldown attached to a 429 that outlived its retries.
fn decode_page(
    response: &HttpResponse,
    limit: u32,
    http_cooldown: Duration,
) -> Result<ArchivePage, AppError> {
    if let Ok(ErrorEnvelope { error }) = serde_json::from_str::<ErrorEnvelope>(&response.body) {
        if is_rate_limit(error.code, &error.message) {
            return Err(AppError::RateLimited {
                origin: RateLimitSource::Upstream,
                cooldown: Duration::ZERO,
            });
        }
        if is_page_size_error(&error.message) {
            return Err(AppError::PageSizeTooLarge { limit });
        }
        if response.status == 429 {
            return Err(AppError::RateLimited {
                origin: RateLimitSource::Http,
                cooldown: http_cooldown,
            });
        }
        return Err(AppError::UpstreamError {
            status_code: response.status,
            code: error.code,
            message: error.message,
        });
    }

    if response.status == 429 {
        return Err(AppError::RateLimited {
            origin: RateLimitSource::Http,
            cooldown: http_cooldown,
        });
    }
    if !response.is_success() {
        let message: String = response.body.chars().take(200).collect();
        return Err(AppError::UpstreamError {
            status_code: response.status,
            code: None,
            message,
        });
    }

    let envelope: ArchiveEnvelope = response.json()?;
    let after = envelope.paging.and_then(next_cursor);
    Ok(ArchivePage {
        ads: envelope.data,
        after,
    })
}

/// The `after` cursor for the next page, if upstream announced one.
fn next_cursor(paging: Paging) -> Option<String> {
    let next = paging.next?;
    paging
        .cursors
        .and_then(|c| c.after)
        .or_else(|| {
            Url::parse(&next).ok().and_then(|url| {
                url.query_pairs()
                    .find(|(k, _)| k == "after")
                    .map(|(_, v)| v.into_owned())
            })
        })
        .filter(|after| !after.is_empty())
}

fn json_list(items: &[String]) -> String {
    serde_json::Value::from(items.to_vec()).to_string()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Paginated ads-archive access over a shared credential pool.
#[derive(Clone)]
pub struct AdsArchiveClient<T: HttpTransport> {
    http: ResilientHttpClient<T>,
    pool: CredentialPool,
    config: AdsArchiveConfig,
}

impl<T: HttpTransport> AdsArchiveClient<T> {
    pub fn new(http: ResilientHttpClient<T>, pool: CredentialPool, config: AdsArchiveConfig) -> Self {
        Self { http, pool, config }
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn config(&self) -> &AdsArchiveConfig {
        &self.config
    }

    /// Lazy stream of every active ad matching `keyword`.
    pub fn search_ads(
        &self,
        keyword: &str,
        countries: &[String],
        languages: &[String],
    ) -> impl Stream<Item = Result<Ad, AppError>> + Send
    where
        T: 'static,
    {
        AdPager::new(
            self.clone(),
            AdSearchQuery::keyword(keyword, countries, languages),
            self.config.page_size,
        )
        .into_stream()
    }

    /// Every active ad of one page.
    pub async fn fetch_ads_for_page(
        &self,
        page_id: &str,
        countries: &[String],
    ) -> Result<Vec<Ad>, AppError> {
        self.fetch_all(&AdSearchQuery::pages(vec![page_id.to_string()], countries))
            .await
    }

    fn build_request(
        &self,
        query: &AdSearchQuery,
        cursor: &PageCursor,
        credential: &Credential,
    ) -> HttpRequest {
        let mut request = HttpRequest::get(self.config.endpoint())
            .with_proxy(credential.proxy.clone())
            .with_timeout(self.config.request_timeout)
            .with_query("access_token", credential.token.as_str())
            .with_query("ad_type", "ALL")
            .with_query(
                "ad_active_status",
                if query.active_only { "ACTIVE" } else { "ALL" },
            )
            .with_query("ad_reached_countries", json_list(&query.countries))
            .with_query("fields", self.config.fields.join(","))
            .with_query("limit", cursor.limit.to_string());

        request = match &query.target {
            SearchTarget::Terms(terms) => request.with_query("search_terms", terms.as_str()),
            SearchTarget::PageIds(ids) => request.with_query("search_page_ids", json_list(ids)),
        };
        if !query.languages.is_empty() {
            request = request.with_query("languages", json_list(&query.languages));
        }
        if let Some(after) = &cursor.after {
            request = request.with_query("after", after.as_str());
        }
        request
    }

    /// Fetches the page at `cursor`, rotating credentials and shrinking the
    /// page size as upstream demands. Advances `cursor` only on success.
    async fn fetch_page(
        &self,
        query: &AdSearchQuery,
        cursor: &mut PageCursor,
    ) -> Result<Vec<Ad>, AppError> {
        loop {
            let credential = self.pool.acquire()?;
            let request = self.build_request(query, cursor, &credential);
            let outcome = match self.http.execute(request).await {
                Ok(response) => decode_page(&response, cursor.limit, self.http.policy().max_delay),
                Err(e) => Err(e),
            };
            self.pool.record_call(credential.index, outcome.is_ok());

            match outcome {
                Ok(page) => {
                    cursor.pages_fetched += 1;
                    cursor.done = page.after.is_none();
                    cursor.after = page.after;
                    tracing::debug!(
                        query = %query.label(),
                        credential = %credential.name,
                        page = cursor.pages_fetched,
                        ads = page.ads.len(),
                        "Fetched ads page"
                    );
                    return Ok(page.ads);
                }
                Err(AppError::RateLimited { origin, cooldown }) => {
                    let cooldown = match origin {
                        RateLimitSource::Upstream => self.pool.config().rate_limit_cooldown,
                        RateLimitSource::Http => cooldown,
                    };
                    match self.pool.mark_rate_limited(credential.index, cooldown) {
                        RateLimitOutcome::Switched(next) => {
                            tracing::info!(
                                query = %query.label(),
                                %origin,
                                from = %credential.name,
                                to = %next.name,
                                "Rate limited, retrying page with next credential"
                            );
                        }
                        RateLimitOutcome::Exhausted { retry_after } => {
                            return Err(AppError::CredentialsExhausted { retry_after });
                        }
                    }
                }
                Err(AppError::PageSizeTooLarge { limit }) if limit > self.config.min_page_size => {
                    cursor.limit = (limit / 2).max(self.config.min_page_size);
                    tracing::warn!(
                        query = %query.label(),
                        from = limit,
                        to = cursor.limit,
                        "Page size rejected, halving"
                    );
                }
                Err(AppError::UpstreamError {
                    code: Some(INVALID_TOKEN_CODE),
                    ..
                }) => {
                    self.pool.deactivate(credential.index, "invalid or expired token");
                }
                Err(e) => {
                    tracing::warn!(
                        query = %query.label(),
                        credential = %credential.name,
                        error = %e,
                        "Ads page request failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn fetch_all(&self, query: &AdSearchQuery) -> Result<Vec<Ad>, AppError> {
        let mut cursor = PageCursor::new(self.config.page_size);
        let mut ads = Vec::new();
        while !cursor.done {
            ads.extend(self.fetch_page(query, &mut cursor).await?);
        }
        Ok(ads)
    }
}

impl AdsArchiveClient<ReqwestTransport> {
    /// reqwest-backed client with the default retry policy and circuit breaker.
    pub fn with_credentials(
        specs: Vec<CredentialSpec>,
        config: AdsArchiveConfig,
    ) -> Result<Self, AppError> {
        let http = ResilientHttpClient::new(
            ReqwestTransport::new()?,
            CircuitBreaker::default(),
            RetryPolicy::default(),
        );
        let pool = CredentialPool::new(specs, CredentialPoolConfig::default());
        tracing::info!(credentials = pool.len(), "Ads archive client ready");
        Ok(Self::new(http, pool, config))
    }
}

impl<T: HttpTransport> AdsSource for AdsArchiveClient<T> {
    async fn search_page(
        &self,
        query: &AdSearchQuery,
        cursor: &mut PageCursor,
    ) -> Result<Vec<Ad>, AppError> {
        self.fetch_page(query, cursor).await
    }

    async fn fetch_pages_batch(
        &self,
        page_ids: &[String],
        countries: &[String],
        languages: &[String],
    ) -> Result<HashMap<String, Vec<Ad>>, AppError> {
        let mut grouped: HashMap<String, Vec<Ad>> = HashMap::new();
        for chunk in page_ids.chunks(self.config.max_batch_size.max(1)) {
            let wanted: HashSet<&str> = chunk.iter().map(String::as_str).collect();
            let ads = self
                .fetch_all(&AdSearchQuery::pages(chunk.to_vec(), countries).with_languages(languages))
                .await?;
            for ad in ads {
                if wanted.contains(ad.page_id.as_str()) {
                    grouped.entry(ad.page_id.clone()).or_default().push(ad);
                }
            }
        }
        Ok(grouped)
    }

    fn usable_credentials(&self) -> usize {
        self.pool.usable_count()
    }
}
