use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::AppError;
use crate::models::{
    Ad, CachedPage, Classification, ClassificationInput, CmsProbe, PersistOutcome, PersistRequest,
    WebsiteInfo,
};
use crate::pager::{AdSearchQuery, PageCursor};

/// A single outbound GET request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    /// Proxy URL the request must be routed through, if any.
    pub proxy: Option<String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            proxy: None,
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Host the circuit breaker keys on.
    pub fn host(&self) -> Result<String, AppError> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| AppError::HttpError(format!("Invalid URL '{}': {e}", self.url)))?;
        parsed
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| AppError::HttpError(format!("URL '{}' has no host", self.url)))
    }
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Performs one HTTP request with no retry logic of its own.
///
/// Transport failures (connect, DNS, timeout) are reported as `Err`; any
/// response from the server, whatever its status, is `Ok`.
pub trait HttpTransport: Send + Sync + Clone {
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, AppError>> + Send;
}

/// Paginated access to the ads archive.
pub trait AdsSource: Send + Sync + Clone {
    /// Fetches the page of ads at `cursor` and advances it.
    ///
    /// Sets `cursor.done` once upstream reports no further page. May shrink
    /// `cursor.limit` when upstream rejects the page size.
    fn search_page(
        &self,
        query: &AdSearchQuery,
        cursor: &mut PageCursor,
    ) -> impl Future<Output = Result<Vec<Ad>, AppError>> + Send;

    /// Fetches active ads for up to ten pages in one request, grouped by page id.
    fn fetch_pages_batch(
        &self,
        page_ids: &[String],
        countries: &[String],
        languages: &[String],
    ) -> impl Future<Output = Result<HashMap<String, Vec<Ad>>, AppError>> + Send;

    /// Number of credentials that are not cooling down right now.
    fn usable_credentials(&self) -> usize;
}

/// Identifies the e-commerce platform of a website.
pub trait PageClassifier: Send + Sync + Clone {
    fn probe(&self, url: &str) -> impl Future<Output = Result<CmsProbe, AppError>> + Send;
}

/// Extracts enrichment fields from a website.
pub trait WebsiteAnalyzer: Send + Sync + Clone {
    fn analyze(&self, url: &str) -> impl Future<Output = Result<WebsiteInfo, AppError>> + Send;
}

/// Batch thematic classifier. Callers pace batches; implementations need not.
pub trait ContentClassifier: Send + Sync + Clone {
    /// Returns classifications keyed by page id. Items it could not classify are absent.
    fn classify(
        &self,
        batch: &[ClassificationInput],
    ) -> impl Future<Output = Result<HashMap<String, Classification>, AppError>> + Send;
}

/// Read/write access to pages, ads, and winning ads.
pub trait ResultStore: Send + Sync + Clone {
    fn blacklisted_page_ids(&self) -> impl Future<Output = Result<HashSet<String>, AppError>> + Send;

    fn cached_pages(
        &self,
        page_ids: &[String],
    ) -> impl Future<Output = Result<HashMap<String, CachedPage>, AppError>> + Send;

    /// Upserts pages (merging keywords/countries), inserts ad snapshots, and
    /// upserts winning ads, reporting which entities were new.
    fn persist(
        &self,
        request: PersistRequest,
    ) -> impl Future<Output = Result<PersistOutcome, AppError>> + Send;
}

/// Classifier that never recognises a platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPageClassifier;

impl PageClassifier for NullPageClassifier {
    async fn probe(&self, _url: &str) -> Result<CmsProbe, AppError> {
        Ok(CmsProbe::unknown())
    }
}

/// Analyzer that extracts nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullWebsiteAnalyzer;

impl WebsiteAnalyzer for NullWebsiteAnalyzer {
    async fn analyze(&self, _url: &str) -> Result<WebsiteInfo, AppError> {
        Ok(WebsiteInfo::default())
    }
}

/// Classifier that classifies nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullContentClassifier;

impl ContentClassifier for NullContentClassifier {
    async fn classify(
        &self,
        _batch: &[ClassificationInput],
    ) -> Result<HashMap<String, Classification>, AppError> {
        Ok(HashMap::new())
    }
}
