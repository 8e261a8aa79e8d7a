//! Lazy pagination over an [`AdsSource`].

use std::time::Duration;

use futures::stream::{self, Stream, TryStreamExt};

use crate::error::AppError;
use crate::models::Ad;
use crate::traits::AdsSource;

/// What a search is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchTarget {
    Terms(String),
    PageIds(Vec<String>),
}

/// One ads-archive query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdSearchQuery {
    pub target: SearchTarget,
    pub countries: Vec<String>,
    pub languages: Vec<String>,
    /// Restrict to ads that are currently delivering.
    pub active_only: bool,
}

impl AdSearchQuery {
    pub fn keyword(keyword: impl Into<String>, countries: &[String], languages: &[String]) -> Self {
        Self {
            target: SearchTarget::Terms(keyword.into()),
            countries: countries.to_vec(),
            languages: languages.to_vec(),
            active_only: true,
        }
    }

    pub fn pages(page_ids: Vec<String>, countries: &[String]) -> Self {
        Self {
            target: SearchTarget::PageIds(page_ids),
            countries: countries.to_vec(),
            languages: Vec::new(),
            active_only: true,
        }
    }

    pub fn with_languages(mut self, languages: &[String]) -> Self {
        self.languages = languages.to_vec();
        self
    }

    /// Keyword for logs, or a short page-id summary.
    pub fn label(&self) -> String {
        match &self.target {
            SearchTarget::Terms(terms) => terms.clone(),
            SearchTarget::PageIds(ids) => format!("{} page id(s)", ids.len()),
        }
    }
}

/// Position within a paginated result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    /// Opaque upstream cursor; `None` means the first page.
    pub after: Option<String>,
    /// Requested page size. Shrinks when upstream rejects it.
    pub limit: u32,
    pub done: bool,
    pub pages_fetched: u32,
}

impl PageCursor {
    pub fn new(limit: u32) -> Self {
        Self {
            after: None,
            limit,
            done: false,
            pages_fetched: 0,
        }
    }
}

/// Walks every page of a query, one request at a time.
///
/// A failed page leaves the cursor untouched, so calling
/// [`next_page`](Self::next_page) again retries the same page.
pub struct AdPager<S: AdsSource> {
    source: S,
    query: AdSearchQuery,
    cursor: PageCursor,
    page_delay: Duration,
}

impl<S: AdsSource> AdPager<S> {
    pub fn new(source: S, query: AdSearchQuery, page_size: u32) -> Self {
        Self {
            source,
            query,
            cursor: PageCursor::new(page_size),
            page_delay: Duration::ZERO,
        }
    }

    /// Pause inserted before every page after the first.
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn query(&self) -> &AdSearchQuery {
        &self.query
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    /// Returns the next page, or `None` once upstream is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Ad>>, AppError> {
        if self.cursor.done {
            return Ok(None);
        }
        if self.cursor.pages_fetched > 0 && !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
        let ads = self.source.search_page(&self.query, &mut self.cursor).await?;
        Ok(Some(ads))
    }

    /// Drains every page into one vector.
    pub async fn collect_all(mut self) -> Result<Vec<Ad>, AppError> {
        let mut all = Vec::new();
        while let Some(ads) = self.next_page().await? {
            all.extend(ads);
        }
        Ok(all)
    }

    /// Lazy stream of individual ads. Ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Ad, AppError>> + Send
    where
        S: 'static,
    {
        stream::unfold(Some(self), |state| async move {
            let mut pager = state?;
            match pager.next_page().await {
                Ok(Some(ads)) => Some((Ok(ads), Some(pager))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .map_ok(|ads| stream::iter(ads.into_iter().map(Ok::<Ad, AppError>)))
        .try_flatten()
    }
}
