//! Website URL heuristics and CMS filter matching.

use crate::models::Ad;
use crate::pipeline::grouping::most_frequent;

/// Domains that host the ad itself rather than the advertiser's shop.
const SOCIAL_DOMAINS: &[&str] = &[
    "facebook.com",
    "fb.com",
    "fb.me",
    "instagram.com",
    "messenger.com",
    "whatsapp.com",
    "m.me",
];

/// Platforms the CMS filter knows by name. Anything else counts as `Other`.
pub const KNOWN_CMS: &[&str] = &[
    "Shopify",
    "WooCommerce",
    "PrestaShop",
    "Magento",
    "BigCommerce",
    "Wix",
    "Squarespace",
    "Custom",
];

/// Filter token accepting any platform outside [`KNOWN_CMS`].
pub const OTHER_CMS: &str = "Other";

/// Candidate website for a page, as `https://host`.
///
/// Prefers an explicit creative link; otherwise the most frequent domain
/// mentioned in link captions and titles.
pub fn extract_website(ads: &[Ad]) -> Option<String> {
    let from_links = ads
        .iter()
        .filter_map(|ad| ad.ad_creative_link_url.as_deref())
        .filter_map(domain_of);
    if let Some(domain) = most_frequent(from_links.collect::<Vec<_>>().iter().map(String::as_str)) {
        return Some(format!("https://{domain}"));
    }

    let mentioned: Vec<String> = ads
        .iter()
        .flat_map(|ad| {
            ad.ad_creative_link_captions
                .iter()
                .chain(ad.ad_creative_link_titles.iter())
        })
        .filter_map(|text| domain_of(text))
        .collect();
    most_frequent(mentioned.iter().map(String::as_str)).map(|domain| format!("https://{domain}"))
}

/// Extracts a bare, lowercase, non-social domain from a URL or caption.
pub fn domain_of(text: &str) -> Option<String> {
    let lowered = text.trim().to_lowercase();
    let without_scheme = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(&lowered);
    let host = without_scheme
        .split(|c: char| c == '/' || c == '?' || c == '#' || c.is_whitespace())
        .next()?
        .split(':')
        .next()?;
    let host = host.strip_prefix("www.").unwrap_or(host);

    let (_, tld) = host.rsplit_once('.')?;
    let valid_chars = host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !valid_chars || tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    if host.split('.').any(str::is_empty) {
        return None;
    }
    let social = SOCIAL_DOMAINS
        .iter()
        .any(|s| host == *s || host.ends_with(&format!(".{s}")));
    if social {
        return None;
    }
    Some(host.to_string())
}

/// Whether a page running `cms` passes the job's CMS filter.
pub fn cms_matches(filter: &[String], cms: &str) -> bool {
    if filter.is_empty() {
        return true;
    }
    let is_known = KNOWN_CMS.iter().any(|k| k.eq_ignore_ascii_case(cms));
    filter.iter().any(|wanted| {
        wanted.eq_ignore_ascii_case(cms) || (wanted.eq_ignore_ascii_case(OTHER_CMS) && !is_known)
    })
}
