use adscout_core::job::SubmitJobRequest;
use adscout_core::job_store::JobStore;
use adscout_core::models::{
    Ad, Classification, Page, PersistRequest, SizeTier, WebsiteInfo, WinningAd,
};
use adscout_core::traits::ResultStore;
use adscout_db::{ResultRepository, SearchJobRepository};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::integration::common::setup_test_db;

async fn job_id(pool: &PgPool) -> Uuid {
    SearchJobRepository::new(pool.clone())
        .create_job(SubmitJobRequest::new(vec!["shoes".into()], vec!["FR".into()]))
        .await
        .unwrap()
        .id
}

fn page(page_id: &str, keyword: &str, ad_ids: &[&str]) -> Page {
    let mut page = Page::new(page_id);
    page.name = Some(format!("Shop {page_id}"));
    page.website = Some(format!("https://{page_id}.example"));
    page.cms = Some("Shopify".into());
    page.is_shopify = true;
    page.keywords.insert(keyword.to_string());
    page.ad_ids.extend(ad_ids.iter().map(|id| id.to_string()));
    page
}

fn request(job_id: Uuid, pages: Vec<Page>, ads: Vec<Ad>, winning: Vec<WinningAd>) -> PersistRequest {
    PersistRequest {
        job_id,
        countries: vec!["FR".into()],
        pages,
        ads,
        winning_ads: winning,
        tracking_min_ads: 10,
    }
}

#[tokio::test]
async fn persist_reports_new_pages_and_merges_arrays() {
    let (pool, _container) = setup_test_db().await;
    let repo = ResultRepository::new(pool.clone());
    let first_job = job_id(&pool).await;

    let outcome = repo
        .persist(request(
            first_job,
            vec![page("p1", "shoes", &["a1", "a2"])],
            vec![Ad::new("a1", "p1"), Ad::new("a2", "p1")],
            vec![],
        ))
        .await
        .unwrap();
    assert_eq!(outcome.pages_saved, 1);
    assert_eq!(outcome.new_page_ids, vec!["p1"]);
    assert_eq!(outcome.ads_saved, 2);

    let second_job = job_id(&pool).await;
    let mut again = page("p1", "boots", &["a2", "a3"]);
    again.name = None;
    let mut second = request(second_job, vec![again, page("p2", "boots", &["b1"])], vec![], vec![]);
    second.countries = vec!["BE".into()];
    let outcome = repo.persist(second).await.unwrap();
    assert_eq!(outcome.pages_saved, 2);
    assert_eq!(outcome.new_page_ids, vec!["p2"]);

    let (name, keywords, countries, ad_ids): (Option<String>, Vec<String>, Vec<String>, Vec<String>) =
        sqlx::query_as("SELECT name, keywords, countries, ad_ids FROM pages WHERE page_id = 'p1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(name.as_deref(), Some("Shop p1"));
    assert_eq!(keywords, vec!["boots", "shoes"]);
    assert_eq!(countries, vec!["BE", "FR"]);
    assert_eq!(ad_ids, vec!["a1", "a2", "a3"]);
}

#[tokio::test]
async fn persist_skips_ads_of_unsaved_pages() {
    let (pool, _container) = setup_test_db().await;
    let repo = ResultRepository::new(pool.clone());
    let job = job_id(&pool).await;

    let outcome = repo
        .persist(request(
            job,
            vec![page("p1", "shoes", &["a1"])],
            vec![Ad::new("a1", "p1"), Ad::new("x1", "gone")],
            vec![],
        ))
        .await
        .unwrap();
    assert_eq!(outcome.ads_saved, 1);
}

#[tokio::test]
async fn winning_ads_are_new_only_once() {
    let (pool, _container) = setup_test_db().await;
    let repo = ResultRepository::new(pool.clone());
    let job = job_id(&pool).await;

    let ad = Ad::new("a1", "p1").with_reach(16_000);
    let winning = WinningAd {
        ad_id: "a1".into(),
        page_id: "p1".into(),
        age_days: 3,
        reach: 16_000,
        matched_criteria: "4d/15000".into(),
        ad: ad.clone(),
    };

    let first = repo
        .persist(request(
            job,
            vec![page("p1", "shoes", &["a1"])],
            vec![ad.clone()],
            vec![winning.clone()],
        ))
        .await
        .unwrap();
    assert_eq!(first.winning_saved, 1);
    assert_eq!(first.new_winning_ad_ids, vec!["a1"]);

    let second = repo
        .persist(request(
            job,
            vec![page("p1", "shoes", &["a1"])],
            vec![ad],
            vec![WinningAd {
                reach: 21_000,
                matched_criteria: "5d/20000".into(),
                ..winning
            }],
        ))
        .await
        .unwrap();
    assert_eq!(second.winning_saved, 1);
    assert!(second.new_winning_ad_ids.is_empty());

    let (reach, criteria): (i64, String) =
        sqlx::query_as("SELECT reach, matched_criteria FROM winning_ads WHERE ad_id = 'a1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(reach, 21_000);
    assert_eq!(criteria, "5d/20000");
}

#[tokio::test]
async fn cached_pages_expose_enrichment() {
    let (pool, _container) = setup_test_db().await;
    let repo = ResultRepository::new(pool.clone());
    let job = job_id(&pool).await;

    let mut enriched = page("p1", "shoes", &["a1"]);
    enriched.ads_active_total = Some(12);
    enriched.size_tier = Some(SizeTier::M);
    enriched.currency = Some("EUR".into());
    enriched.website_info = Some(WebsiteInfo {
        title: Some("Shop".into()),
        product_count: Some(24),
        ..Default::default()
    });
    enriched.classification = Some(Classification {
        category: "Fashion".into(),
        subcategory: Some("Shoes".into()),
        confidence: 0.9,
    });
    enriched.enriched_at = Some(Utc::now());

    let mut bare = page("p2", "shoes", &["b1"]);
    bare.cms = Some("Unknown".into());

    repo.persist(request(job, vec![enriched, bare], vec![], vec![]))
        .await
        .unwrap();

    let cached = repo
        .cached_pages(&["p1".into(), "p2".into(), "p3".into()])
        .await
        .unwrap();
    assert_eq!(cached.len(), 2);

    let p1 = &cached["p1"];
    assert_eq!(p1.website.as_deref(), Some("https://p1.example"));
    assert_eq!(p1.cms.as_deref(), Some("Shopify"));
    assert_eq!(p1.product_count, Some(24));
    assert_eq!(p1.category.as_deref(), Some("Fashion"));
    assert_eq!(p1.currency.as_deref(), Some("EUR"));
    assert!(p1.has_fresh_enrichment(std::time::Duration::from_secs(3600), Utc::now()));

    let p2 = &cached["p2"];
    assert_eq!(p2.known_cms(), None);
    assert!(p2.enriched_at.is_none());

    assert!(repo.cached_pages(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn blacklist_round_trip() {
    let (pool, _container) = setup_test_db().await;
    let repo = ResultRepository::new(pool);

    assert!(repo.blacklisted_page_ids().await.unwrap().is_empty());
    repo.blacklist_page("p9", Some("reseller")).await.unwrap();
    repo.blacklist_page("p9", None).await.unwrap();

    let ids = repo.blacklisted_page_ids().await.unwrap();
    assert_eq!(ids.len(), 1);
    assert!(ids.contains("p9"));

    assert!(repo.unblacklist_page("p9").await.unwrap());
    assert!(!repo.unblacklist_page("p9").await.unwrap());
}

#[tokio::test]
async fn every_persist_appends_an_ad_snapshot() {
    let (pool, _container) = setup_test_db().await;
    let repo = ResultRepository::new(pool.clone());

    for reach in [1_000, 4_000] {
        let job = job_id(&pool).await;
        let outcome = repo
            .persist(request(
                job,
                vec![page("p1", "shoes", &["a1"])],
                vec![Ad::new("a1", "p1").with_reach(reach)],
                vec![],
            ))
            .await
            .unwrap();
        assert_eq!(outcome.snapshots_saved, 1);
    }

    let (ads,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ads WHERE ad_id = 'a1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(ads, 1);

    let reaches: Vec<(Option<i64>,)> = sqlx::query_as(
        "SELECT eu_total_reach FROM ad_snapshots WHERE ad_id = 'a1' ORDER BY id",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(reaches, vec![(Some(1_000),), (Some(4_000),)]);
}

#[tokio::test]
async fn tracking_series_skips_pages_below_threshold() {
    let (pool, _container) = setup_test_db().await;
    let repo = ResultRepository::new(pool.clone());
    let job = job_id(&pool).await;

    let mut large = page("p1", "shoes", &["a1"]);
    large.ads_active_total = Some(25);
    let mut small = page("p2", "shoes", &["b1"]);
    small.ads_active_total = Some(3);

    let outcome = repo
        .persist(request(job, vec![large, small], vec![], vec![]))
        .await
        .unwrap();
    assert_eq!(outcome.pages_tracked, 1);

    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT page_id, ads_active_total FROM page_tracking WHERE job_id = $1")
            .bind(job)
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(rows, vec![("p1".to_string(), 25)]);
}

#[tokio::test]
async fn search_history_has_one_row_per_job() {
    let (pool, _container) = setup_test_db().await;
    let repo = ResultRepository::new(pool.clone());
    let ad = Ad::new("a1", "p1").with_reach(16_000);
    let winning = WinningAd {
        ad_id: "a1".into(),
        page_id: "p1".into(),
        age_days: 3,
        reach: 16_000,
        matched_criteria: "4d/15000".into(),
        ad: ad.clone(),
    };

    let first_job = job_id(&pool).await;
    for _ in 0..2 {
        repo.persist(request(
            first_job,
            vec![page("p1", "shoes", &["a1"])],
            vec![ad.clone()],
            vec![winning.clone()],
        ))
        .await
        .unwrap();
    }
    let second_job = job_id(&pool).await;
    repo.persist(request(
        second_job,
        vec![page("p1", "boots", &["a1"])],
        vec![ad.clone()],
        vec![winning],
    ))
    .await
    .unwrap();

    let pages: Vec<(Uuid, bool, Option<String>)> = sqlx::query_as(
        "SELECT job_id, was_new, keyword_matched FROM page_search_history WHERE page_id = 'p1' ORDER BY found_at",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(
        pages,
        vec![
            (first_job, true, Some("shoes".to_string())),
            (second_job, false, Some("boots".to_string())),
        ]
    );

    let winners: Vec<(Uuid, bool, i64)> = sqlx::query_as(
        "SELECT job_id, was_new, reach_at_discovery FROM winning_ad_search_history WHERE ad_id = 'a1' ORDER BY found_at",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(winners, vec![(first_job, true, 16_000), (second_job, false, 16_000)]);
}
