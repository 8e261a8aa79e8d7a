use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// CMS value used when a site could not be identified.
pub const UNKNOWN_CMS: &str = "Unknown";

/// Raw ad record as returned by the ads archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ad {
    pub id: String,
    pub page_id: String,
    #[serde(default)]
    pub page_name: Option<String>,
    #[serde(default)]
    pub ad_creation_time: Option<String>,
    /// ISO date or datetime at which delivery started.
    #[serde(default)]
    pub ad_delivery_start_time: Option<String>,
    #[serde(default)]
    pub ad_creative_bodies: Vec<String>,
    #[serde(default)]
    pub ad_creative_link_captions: Vec<String>,
    #[serde(default)]
    pub ad_creative_link_titles: Vec<String>,
    #[serde(default)]
    pub ad_creative_link_url: Option<String>,
    #[serde(default)]
    pub ad_snapshot_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_reach")]
    pub eu_total_reach: Option<u64>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub publisher_platforms: Vec<String>,
    #[serde(default)]
    pub currency: Option<String>,
    /// Search keyword that surfaced this ad. Set locally, never sent upstream.
    #[serde(default)]
    pub keyword: Option<String>,
}

impl Ad {
    /// Minimal ad, mostly useful for tests and fixtures.
    pub fn new(id: impl Into<String>, page_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            page_id: page_id.into(),
            page_name: None,
            ad_creation_time: None,
            ad_delivery_start_time: None,
            ad_creative_bodies: Vec::new(),
            ad_creative_link_captions: Vec::new(),
            ad_creative_link_titles: Vec::new(),
            ad_creative_link_url: None,
            ad_snapshot_url: None,
            eu_total_reach: None,
            languages: Vec::new(),
            publisher_platforms: Vec::new(),
            currency: None,
            keyword: None,
        }
    }

    pub fn with_page_name(mut self, name: impl Into<String>) -> Self {
        self.page_name = Some(name.into());
        self
    }

    pub fn with_start_time(mut self, start: impl Into<String>) -> Self {
        self.ad_delivery_start_time = Some(start.into());
        self
    }

    pub fn with_reach(mut self, reach: u64) -> Self {
        self.eu_total_reach = Some(reach);
        self
    }

    pub fn with_link_url(mut self, url: impl Into<String>) -> Self {
        self.ad_creative_link_url = Some(url.into());
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.ad_creative_link_captions.push(caption.into());
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// Parses the delivery start time, accepting plain dates and RFC 3339 datetimes.
    pub fn delivery_start(&self) -> Option<NaiveDateTime> {
        let raw = self.ad_delivery_start_time.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.naive_utc());
        }
        // Upstream also sends "+0000" offsets without a colon.
        if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
            return Some(dt.naive_utc());
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
            return Some(dt);
        }
        NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    }
}

/// Accepts reach as a number, a numeric string, or a `{lower_bound, upper_bound}` object.
fn lenient_reach<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| reach_from_value(&v)))
}

fn reach_from_value(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Object(map) => map
            .get("lower_bound")
            .or_else(|| map.get("upper_bound"))
            .and_then(reach_from_value),
        _ => None,
    }
}

/// Result of probing a website for its e-commerce platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmsProbe {
    pub cms: String,
    pub is_shopify: bool,
    pub confidence: f32,
}

impl CmsProbe {
    pub fn unknown() -> Self {
        Self {
            cms: UNKNOWN_CMS.to_string(),
            is_shopify: false,
            confidence: 0.0,
        }
    }
}

/// Fields extracted from a page's website.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebsiteInfo {
    pub title: Option<String>,
    pub description: Option<String>,
    pub product_count: Option<u32>,
    pub currency: Option<String>,
    pub theme: Option<String>,
    /// Text handed to the content classifier.
    pub text_sample: Option<String>,
}

/// Thematic classification of a website.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub subcategory: Option<String>,
    pub confidence: f32,
}

/// One item submitted to the content classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationInput {
    pub page_id: String,
    pub text: String,
}

/// Advertiser size bucket derived from the authoritative active-ad count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SizeTier {
    XS,
    S,
    M,
    L,
    XL,
    XXL,
}

impl SizeTier {
    pub fn from_active_ads(count: u64) -> Self {
        match count {
            50.. => SizeTier::XXL,
            30.. => SizeTier::XL,
            20.. => SizeTier::L,
            10.. => SizeTier::M,
            5.. => SizeTier::S,
            _ => SizeTier::XS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeTier::XS => "XS",
            SizeTier::S => "S",
            SizeTier::M => "M",
            SizeTier::L => "L",
            SizeTier::XL => "XL",
            SizeTier::XXL => "XXL",
        }
    }
}

/// Advertiser aggregate built from one or more ads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub page_id: String,
    pub name: Option<String>,
    /// Distinct ad ids collected by the keyword search.
    pub ad_ids: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
    pub website: Option<String>,
    pub cms: Option<String>,
    pub is_shopify: bool,
    /// Authoritative count from reconciliation.
    pub ads_active_total: Option<u64>,
    pub size_tier: Option<SizeTier>,
    pub currency: Option<String>,
    pub website_info: Option<WebsiteInfo>,
    pub classification: Option<Classification>,
    /// When `website_info`/`classification` were produced, possibly by an earlier job.
    pub enriched_at: Option<DateTime<Utc>>,
}

impl Page {
    pub fn new(page_id: impl Into<String>) -> Self {
        Self {
            page_id: page_id.into(),
            name: None,
            ad_ids: BTreeSet::new(),
            keywords: BTreeSet::new(),
            website: None,
            cms: None,
            is_shopify: false,
            ads_active_total: None,
            size_tier: None,
            currency: None,
            website_info: None,
            classification: None,
            enriched_at: None,
        }
    }

    /// Number of distinct ads found by the search for this page.
    pub fn ads_found_search(&self) -> u64 {
        self.ad_ids.len() as u64
    }

    /// Active-ad count, falling back to the search count when reconciliation
    /// returned nothing.
    pub fn effective_ads_count(&self) -> u64 {
        match self.ads_active_total {
            Some(n) if n > 0 => n,
            _ => self.ads_found_search(),
        }
    }
}

/// Cached knowledge about a page from earlier jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPage {
    pub page_id: String,
    pub website: Option<String>,
    pub cms: Option<String>,
    pub product_count: Option<u32>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub currency: Option<String>,
    pub enriched_at: Option<DateTime<Utc>>,
}

impl CachedPage {
    /// CMS is reused whenever it was identified.
    pub fn known_cms(&self) -> Option<&str> {
        self.cms
            .as_deref()
            .filter(|cms| !cms.is_empty() && *cms != UNKNOWN_CMS)
    }

    /// Enrichment is reused only when recent and complete.
    pub fn has_fresh_enrichment(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let Some(enriched_at) = self.enriched_at else {
            return false;
        };
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return false;
        };
        now - enriched_at < max_age && self.product_count.is_some() && self.category.is_some()
    }
}

/// An ad that met a performance threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinningAd {
    pub ad_id: String,
    pub page_id: String,
    pub age_days: u32,
    pub reach: u64,
    /// e.g. `"4d/16000"`.
    pub matched_criteria: String,
    pub ad: Ad,
}

/// Everything phase 8 writes for one job.
#[derive(Debug, Clone)]
pub struct PersistRequest {
    pub job_id: Uuid,
    pub countries: Vec<String>,
    pub pages: Vec<Page>,
    pub ads: Vec<Ad>,
    pub winning_ads: Vec<WinningAd>,
    /// Pages with fewer active ads stay out of the tracking series.
    pub tracking_min_ads: u64,
}

/// What phase 8 wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub pages_saved: u64,
    pub new_page_ids: Vec<String>,
    pub ads_saved: u64,
    pub winning_saved: u64,
    pub new_winning_ad_ids: Vec<String>,
    /// Rows appended to the ad snapshot history.
    pub snapshots_saved: u64,
    /// Pages that got a point in the active-ads time series.
    pub pages_tracked: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reach_accepts_several_shapes() {
        let ad: Ad =
            serde_json::from_str(r#"{"id":"1","page_id":"p","eu_total_reach":16000}"#).unwrap();
        assert_eq!(ad.eu_total_reach, Some(16000));

        let ad: Ad =
            serde_json::from_str(r#"{"id":"1","page_id":"p","eu_total_reach":"2500"}"#).unwrap();
        assert_eq!(ad.eu_total_reach, Some(2500));

        let ad: Ad = serde_json::from_str(
            r#"{"id":"1","page_id":"p","eu_total_reach":{"lower_bound":"1000","upper_bound":"4999"}}"#,
        )
        .unwrap();
        assert_eq!(ad.eu_total_reach, Some(1000));

        let ad: Ad = serde_json::from_str(r#"{"id":"1","page_id":"p"}"#).unwrap();
        assert_eq!(ad.eu_total_reach, None);
    }

    #[test]
    fn test_delivery_start_parsing() {
        let date = Ad::new("1", "p").with_start_time("2024-01-01");
        assert_eq!(
            date.delivery_start().unwrap().date(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );

        let rfc = Ad::new("1", "p").with_start_time("2024-01-01T10:00:00+00:00");
        assert!(rfc.delivery_start().is_some());

        let compact = Ad::new("1", "p").with_start_time("2024-01-01T10:00:00+0000");
        assert!(compact.delivery_start().is_some());

        assert!(Ad::new("1", "p").with_start_time("garbage").delivery_start().is_none());
        assert!(Ad::new("1", "p").delivery_start().is_none());
    }

    #[test]
    fn test_size_tiers() {
        assert_eq!(SizeTier::from_active_ads(0), SizeTier::XS);
        assert_eq!(SizeTier::from_active_ads(4), SizeTier::XS);
        assert_eq!(SizeTier::from_active_ads(5), SizeTier::S);
        assert_eq!(SizeTier::from_active_ads(10), SizeTier::M);
        assert_eq!(SizeTier::from_active_ads(20), SizeTier::L);
        assert_eq!(SizeTier::from_active_ads(30), SizeTier::XL);
        assert_eq!(SizeTier::from_active_ads(50), SizeTier::XXL);
    }

    #[test]
    fn test_page_counts_follow_ad_ids() {
        let mut page = Page::new("p1");
        page.ad_ids.insert("a".into());
        page.ad_ids.insert("a".into());
        page.ad_ids.insert("b".into());
        assert_eq!(page.ads_found_search(), 2);
        assert_eq!(page.effective_ads_count(), 2);

        page.ads_active_total = Some(7);
        assert_eq!(page.effective_ads_count(), 7);

        page.ads_active_total = Some(0);
        assert_eq!(page.effective_ads_count(), 2);
    }

    #[test]
    fn test_cache_freshness_rules() {
        let now = Utc::now();
        let mut cached = CachedPage {
            page_id: "p1".into(),
            website: Some("https://shop.example".into()),
            cms: Some("Shopify".into()),
            product_count: Some(12),
            category: Some("Fashion".into()),
            subcategory: None,
            currency: None,
            enriched_at: Some(now - chrono::Duration::hours(2)),
        };
        let day = Duration::from_secs(86_400);
        assert!(cached.has_fresh_enrichment(day, now));

        cached.enriched_at = Some(now - chrono::Duration::days(2));
        assert!(!cached.has_fresh_enrichment(day, now));

        cached.enriched_at = Some(now);
        cached.category = None;
        assert!(!cached.has_fresh_enrichment(day, now));
    }

    #[test]
    fn test_unknown_cms_is_not_reused() {
        let cached = CachedPage {
            page_id: "p1".into(),
            website: None,
            cms: Some(UNKNOWN_CMS.into()),
            product_count: None,
            category: None,
            subcategory: None,
            currency: None,
            enriched_at: None,
        };
        assert_eq!(cached.known_cms(), None);
    }
}
