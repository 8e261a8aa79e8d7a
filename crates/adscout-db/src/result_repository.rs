use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};

use adscout_core::error::AppError;
use adscout_core::models::{CachedPage, PersistOutcome, PersistRequest};
use adscout_core::traits::ResultStore;

/// Pages, ads, winning ads and the page blacklist in PostgreSQL, with the
/// per-job history tables written alongside.
#[derive(Clone)]
pub struct ResultRepository {
    pool: Pool<Postgres>,
}

impl ResultRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Excludes a page from every future job.
    pub async fn blacklist_page(&self, page_id: &str, reason: Option<&str>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO page_blacklist (page_id, reason)
            VALUES ($1, $2)
            ON CONFLICT (page_id) DO UPDATE SET reason = EXCLUDED.reason
            "#,
        )
        .bind(page_id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Returns `true` if the page was blacklisted.
    pub async fn unblacklist_page(&self, page_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(r#"DELETE FROM page_blacklist WHERE page_id = $1"#)
            .bind(page_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct CachedPageRow {
    page_id: String,
    website: Option<String>,
    cms: Option<String>,
    product_count: Option<i32>,
    category: Option<String>,
    subcategory: Option<String>,
    currency: Option<String>,
    enriched_at: Option<DateTime<Utc>>,
}

impl From<CachedPageRow> for CachedPage {
    fn from(row: CachedPageRow) -> Self {
        CachedPage {
            page_id: row.page_id,
            website: row.website,
            cms: row.cms,
            product_count: row.product_count.and_then(|n| u32::try_from(n).ok()),
            category: row.category,
            subcategory: row.subcategory,
            currency: row.currency,
            enriched_at: row.enriched_at,
        }
    }
}

impl ResultStore for ResultRepository {
    async fn blacklisted_page_ids(&self) -> Result<HashSet<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(r#"SELECT page_id FROM page_blacklist"#)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn cached_pages(&self, page_ids: &[String]) -> Result<HashMap<String, CachedPage>, AppError> {
        if page_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, CachedPageRow>(
            r#"
            SELECT page_id, website, cms, product_count, category, subcategory, currency, enriched_at
            FROM pages
            WHERE page_id = ANY($1)
            "#,
        )
        .bind(page_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| (row.page_id.clone(), row.into()))
            .collect())
    }

    async fn persist(&self, request: PersistRequest) -> Result<PersistOutcome, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut outcome = PersistOutcome::default();
        let page_ids: HashSet<&str> = request.pages.iter().map(|p| p.page_id.as_str()).collect();

        for page in &request.pages {
            let keywords: Vec<String> = page.keywords.iter().cloned().collect();
            let ad_ids: Vec<String> = page.ad_ids.iter().cloned().collect();
            let info = page.website_info.as_ref();
            let classification = page.classification.as_ref();

            let (inserted,): (bool,) = sqlx::query_as(
                r#"
                INSERT INTO pages (
                    page_id, name, website, cms, is_shopify, ads_active_total, size_tier,
                    currency, product_count, category, subcategory, website_info,
                    keywords, countries, ad_ids, enriched_at, last_job_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                ON CONFLICT (page_id) DO UPDATE SET
                    name = COALESCE(EXCLUDED.name, pages.name),
                    website = COALESCE(EXCLUDED.website, pages.website),
                    cms = COALESCE(EXCLUDED.cms, pages.cms),
                    is_shopify = EXCLUDED.is_shopify,
                    ads_active_total = COALESCE(EXCLUDED.ads_active_total, pages.ads_active_total),
                    size_tier = COALESCE(EXCLUDED.size_tier, pages.size_tier),
                    currency = COALESCE(EXCLUDED.currency, pages.currency),
                    product_count = COALESCE(EXCLUDED.product_count, pages.product_count),
                    category = COALESCE(EXCLUDED.category, pages.category),
                    subcategory = COALESCE(EXCLUDED.subcategory, pages.subcategory),
                    website_info = COALESCE(EXCLUDED.website_info, pages.website_info),
                    keywords = ARRAY(
                        SELECT DISTINCT k FROM unnest(pages.keywords || EXCLUDED.keywords) AS k ORDER BY k
                    ),
                    countries = ARRAY(
                        SELECT DISTINCT c FROM unnest(pages.countries || EXCLUDED.countries) AS c ORDER BY c
                    ),
                    ad_ids = ARRAY(
                        SELECT DISTINCT a FROM unnest(pages.ad_ids || EXCLUDED.ad_ids) AS a ORDER BY a
                    ),
                    enriched_at = COALESCE(EXCLUDED.enriched_at, pages.enriched_at),
                    last_seen_at = NOW(),
                    last_job_id = EXCLUDED.last_job_id
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(&page.page_id)
            .bind(&page.name)
            .bind(&page.website)
            .bind(&page.cms)
            .bind(page.is_shopify)
            .bind(page.ads_active_total.map(|n| n.min(i64::MAX as u64) as i64))
            .bind(page.size_tier.map(|t| t.as_str()))
            .bind(&page.currency)
            .bind(info.and_then(|i| i.product_count).map(|n| n.min(i32::MAX as u32) as i32))
            .bind(classification.map(|c| c.category.as_str()))
            .bind(classification.and_then(|c| c.subcategory.as_deref()))
            .bind(info.map(Json))
            .bind(keywords)
            .bind(&request.countries)
            .bind(ad_ids)
            .bind(page.enriched_at)
            .bind(request.job_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            outcome.pages_saved += 1;
            if inserted {
                outcome.new_page_ids.push(page.page_id.clone());
            }

            let ads_count = page.effective_ads_count().min(i64::MAX as u64) as i64;
            sqlx::query(
                r#"
                INSERT INTO page_search_history (job_id, page_id, was_new, ads_count_at_discovery, keyword_matched)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (job_id, page_id) DO NOTHING
                "#,
            )
            .bind(request.job_id)
            .bind(&page.page_id)
            .bind(inserted)
            .bind(ads_count)
            .bind(page.keywords.iter().next().cloned())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            if page.effective_ads_count() >= request.tracking_min_ads {
                sqlx::query(
                    r#"
                    INSERT INTO page_tracking (page_id, job_id, name, ads_active_total)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (page_id, job_id) DO UPDATE SET
                        ads_active_total = EXCLUDED.ads_active_total,
                        scanned_at = NOW()
                    "#,
                )
                .bind(&page.page_id)
                .bind(request.job_id)
                .bind(&page.name)
                .bind(ads_count)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

                outcome.pages_tracked += 1;
            }
        }

        for ad in &request.ads {
            if !page_ids.contains(ad.page_id.as_str()) {
                tracing::debug!(ad_id = %ad.id, page_id = %ad.page_id, "Skipping ad of unsaved page");
                continue;
            }
            sqlx::query(
                r#"
                INSERT INTO ads (ad_id, page_id, keyword, delivery_start_time, eu_total_reach, data, last_job_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (ad_id) DO UPDATE SET
                    keyword = COALESCE(EXCLUDED.keyword, ads.keyword),
                    delivery_start_time = COALESCE(EXCLUDED.delivery_start_time, ads.delivery_start_time),
                    eu_total_reach = COALESCE(EXCLUDED.eu_total_reach, ads.eu_total_reach),
                    data = EXCLUDED.data,
                    last_seen_at = NOW(),
                    last_job_id = EXCLUDED.last_job_id
                "#,
            )
            .bind(&ad.id)
            .bind(&ad.page_id)
            .bind(&ad.keyword)
            .bind(&ad.ad_delivery_start_time)
            .bind(ad.eu_total_reach.map(|n| n.min(i64::MAX as u64) as i64))
            .bind(Json(ad))
            .bind(request.job_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            outcome.ads_saved += 1;

            sqlx::query(
                r#"
                INSERT INTO ad_snapshots (ad_id, page_id, job_id, keyword, eu_total_reach, data)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&ad.id)
            .bind(&ad.page_id)
            .bind(request.job_id)
            .bind(&ad.keyword)
            .bind(ad.eu_total_reach.map(|n| n.min(i64::MAX as u64) as i64))
            .bind(Json(ad))
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            outcome.snapshots_saved += 1;
        }

        for winning in &request.winning_ads {
            if !page_ids.contains(winning.page_id.as_str()) {
                continue;
            }
            let (inserted,): (bool,) = sqlx::query_as(
                r#"
                INSERT INTO winning_ads (ad_id, page_id, age_days, reach, matched_criteria, data, job_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (ad_id) DO UPDATE SET
                    age_days = EXCLUDED.age_days,
                    reach = EXCLUDED.reach,
                    matched_criteria = EXCLUDED.matched_criteria,
                    data = EXCLUDED.data,
                    updated_at = NOW(),
                    job_id = EXCLUDED.job_id
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(&winning.ad_id)
            .bind(&winning.page_id)
            .bind(winning.age_days.min(i32::MAX as u32) as i32)
            .bind(winning.reach.min(i64::MAX as u64) as i64)
            .bind(&winning.matched_criteria)
            .bind(Json(&winning.ad))
            .bind(request.job_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            outcome.winning_saved += 1;
            if inserted {
                outcome.new_winning_ad_ids.push(winning.ad_id.clone());
            }

            sqlx::query(
                r#"
                INSERT INTO winning_ad_search_history (
                    job_id, ad_id, was_new, reach_at_discovery, age_days_at_discovery, matched_criteria
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (job_id, ad_id) DO NOTHING
                "#,
            )
            .bind(request.job_id)
            .bind(&winning.ad_id)
            .bind(inserted)
            .bind(winning.reach.min(i64::MAX as u64) as i64)
            .bind(winning.age_days.min(i32::MAX as u32) as i32)
            .bind(&winning.matched_criteria)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(
            job_id = %request.job_id,
            pages = outcome.pages_saved,
            pages_new = outcome.new_page_ids.len(),
            ads = outcome.ads_saved,
            winning = outcome.winning_saved,
            snapshots = outcome.snapshots_saved,
            tracked = outcome.pages_tracked,
            "Persisted job results"
        );
        Ok(outcome)
    }
}
