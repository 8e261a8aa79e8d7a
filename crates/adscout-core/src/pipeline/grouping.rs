//! Deduplication and per-page aggregation of raw ads.
//!
//! Output is independent of input order: pages and their ads live in
//! ordered maps, and ad-level ties (name, currency) are broken
//! lexicographically.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::{Ad, Page};

/// Aggregated result of phase 2.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grouping {
    /// Pages meeting `min_ads`, keyed by page id.
    pub pages: BTreeMap<String, Page>,
    /// Deduplicated ads of every surviving page, sorted by ad id.
    pub ads_by_page: BTreeMap<String, Vec<Ad>>,
    pub unique_ads: u64,
    /// Distinct non-blacklisted pages before the `min_ads` filter.
    pub pages_found: u64,
    pub blacklisted_pages: u64,
    pub blacklisted_ads: u64,
}

/// Dedups `ads` by id, drops blacklisted pages, aggregates per page, and
/// keeps pages with at least `min_ads` distinct ads.
pub fn group_by_page(ads: &[Ad], blacklist: &HashSet<String>, min_ads: u32) -> Grouping {
    // Copies of one ad differ only by the keyword that found them; keep the
    // copy with the smallest keyword and fold every keyword into the page.
    let mut unique: BTreeMap<&str, (Ad, Vec<String>)> = BTreeMap::new();
    for ad in ads {
        if ad.id.is_empty() || ad.page_id.is_empty() {
            continue;
        }
        let entry = unique
            .entry(ad.id.as_str())
            .or_insert_with(|| (ad.clone(), Vec::new()));
        if ad.keyword < entry.0.keyword {
            entry.0 = ad.clone();
        }
        if let Some(keyword) = &ad.keyword {
            entry.1.push(keyword.clone());
        }
    }

    let mut grouping = Grouping {
        unique_ads: unique.len() as u64,
        ..Default::default()
    };
    let mut blacklisted_pages: HashSet<&str> = HashSet::new();
    let mut by_page: BTreeMap<String, Vec<(Ad, Vec<String>)>> = BTreeMap::new();

    for (_, (ad, keywords)) in unique {
        if blacklist.contains(&ad.page_id) {
            grouping.blacklisted_ads += 1;
            continue;
        }
        by_page
            .entry(ad.page_id.clone())
            .or_default()
            .push((ad, keywords));
    }
    for ad in ads {
        if blacklist.contains(&ad.page_id) {
            blacklisted_pages.insert(ad.page_id.as_str());
        }
    }
    grouping.blacklisted_pages = blacklisted_pages.len() as u64;
    grouping.pages_found = by_page.len() as u64;

    for (page_id, entries) in by_page {
        if (entries.len() as u64) < u64::from(min_ads) {
            continue;
        }
        let mut page = Page::new(page_id.clone());
        for (ad, keywords) in &entries {
            page.ad_ids.insert(ad.id.clone());
            page.keywords.extend(keywords.iter().cloned());
        }
        let page_ads: Vec<Ad> = entries.into_iter().map(|(ad, _)| ad).collect();
        page.name = most_frequent(page_ads.iter().filter_map(|a| a.page_name.as_deref()));
        page.currency = most_frequent(page_ads.iter().filter_map(|a| a.currency.as_deref()));

        grouping.ads_by_page.insert(page_id.clone(), page_ads);
        grouping.pages.insert(page_id, page);
    }

    grouping
}

/// Most frequent non-blank value; ties go to the lexicographically smallest.
pub fn most_frequent<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        let value = value.trim();
        if !value.is_empty() {
            *counts.entry(value).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then_with(|| b.cmp(a)))
        .map(|(value, _)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad(id: &str, page: &str, keyword: &str) -> Ad {
        let mut ad = Ad::new(id, page).with_page_name(format!("Page {page}"));
        ad.keyword = Some(keyword.to_string());
        ad
    }

    fn keyword_scenario() -> Vec<Ad> {
        vec![
            ad("1", "p1", "a"),
            ad("2", "p1", "a"),
            ad("3", "p1", "a"),
            ad("4", "p2", "a"),
            ad("5", "p3", "a"),
            ad("6", "p4", "b"),
            ad("7", "p4", "b"),
        ]
    }

    #[test]
    fn test_min_ads_filter_keeps_only_large_pages() {
        let grouping = group_by_page(&keyword_scenario(), &HashSet::new(), 3);

        assert_eq!(grouping.pages.len(), 1);
        let page = &grouping.pages["p1"];
        assert_eq!(page.ads_found_search(), 3);
        assert_eq!(grouping.pages_found, 4);
        assert_eq!(grouping.unique_ads, 7);
    }

    #[test]
    fn test_duplicates_merge_keywords() {
        let ads = vec![ad("1", "p1", "a"), ad("1", "p1", "b"), ad("2", "p1", "b")];
        let grouping = group_by_page(&ads, &HashSet::new(), 1);

        let page = &grouping.pages["p1"];
        assert_eq!(page.ads_found_search(), 2);
        assert_eq!(page.keywords.iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(grouping.ads_by_page["p1"].len(), 2);
    }

    #[test]
    fn test_permuted_input_yields_identical_grouping() {
        let ads = keyword_scenario();
        let baseline = group_by_page(&ads, &HashSet::new(), 1);

        let mut reversed = ads.clone();
        reversed.reverse();
        let mut rotated = ads.clone();
        rotated.rotate_left(3);

        for permuted in [reversed, rotated] {
            let grouping = group_by_page(&permuted, &HashSet::new(), 1);
            assert_eq!(grouping, baseline);
        }
    }

    #[test]
    fn test_blacklisted_pages_are_dropped() {
        let blacklist: HashSet<String> = ["p1".to_string()].into();
        let grouping = group_by_page(&keyword_scenario(), &blacklist, 1);

        assert!(!grouping.pages.contains_key("p1"));
        assert_eq!(grouping.blacklisted_pages, 1);
        assert_eq!(grouping.blacklisted_ads, 3);
        assert_eq!(grouping.pages.len(), 3);
    }

    #[test]
    fn test_name_and_currency_resolution() {
        let ads = vec![
            Ad::new("1", "p1").with_page_name("Shop B").with_currency("EUR"),
            Ad::new("2", "p1").with_page_name("Shop A").with_currency("EUR"),
            Ad::new("3", "p1").with_page_name("Shop B").with_currency("USD"),
        ];
        let grouping = group_by_page(&ads, &HashSet::new(), 1);
        let page = &grouping.pages["p1"];
        assert_eq!(page.name.as_deref(), Some("Shop B"));
        assert_eq!(page.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_most_frequent_tie_break() {
        assert_eq!(most_frequent(["b", "a"].into_iter()), Some("a".to_string()));
        assert_eq!(most_frequent(["", "  "].into_iter()), None);
    }
}
