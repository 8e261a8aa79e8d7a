use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::models::{Ad, WinningAd};

/// An ad no older than `max_age_days` reaching at least `min_reach` people is winning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinningCriterion {
    pub max_age_days: u32,
    pub min_reach: u64,
}

impl WinningCriterion {
    pub const fn new(max_age_days: u32, min_reach: u64) -> Self {
        Self {
            max_age_days,
            min_reach,
        }
    }
}

/// Thresholds in ascending age order.
pub const DEFAULT_WINNING_CRITERIA: [WinningCriterion; 8] = [
    WinningCriterion::new(4, 15_000),
    WinningCriterion::new(5, 20_000),
    WinningCriterion::new(6, 30_000),
    WinningCriterion::new(7, 40_000),
    WinningCriterion::new(8, 50_000),
    WinningCriterion::new(15, 100_000),
    WinningCriterion::new(22, 200_000),
    WinningCriterion::new(29, 400_000),
];

/// Age in whole days at `now`; future start dates count as zero.
pub fn age_days(start: NaiveDateTime, now: NaiveDateTime) -> u32 {
    let days = (now - start).num_days();
    u32::try_from(days.max(0)).unwrap_or(u32::MAX)
}

/// Checks `ad` against `criteria`, reporting the first matching threshold.
///
/// Ads without a parseable delivery start time are never winning.
pub fn evaluate(ad: &Ad, now: NaiveDateTime, criteria: &[WinningCriterion]) -> Option<WinningAd> {
    let start = ad.delivery_start()?;
    let age = age_days(start, now);
    let reach = ad.eu_total_reach.unwrap_or(0);

    criteria
        .iter()
        .find(|c| age <= c.max_age_days && reach >= c.min_reach)
        .map(|_| WinningAd {
            ad_id: ad.id.clone(),
            page_id: ad.page_id.clone(),
            age_days: age,
            reach,
            matched_criteria: format!("{age}d/{reach}"),
            ad: ad.clone(),
        })
}
