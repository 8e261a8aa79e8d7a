use adscout_core::job::{ActiveJobsFilter, JobStatus, JobSummary, PhaseResult, SubmitJobRequest};
use adscout_core::job_store::{JobFinish, JobStore};
use adscout_core::AppError;
use adscout_db::SearchJobRepository;
use chrono::Utc;

use crate::integration::common::{age_job, setup_test_db};

fn request(keyword: &str) -> SubmitJobRequest {
    SubmitJobRequest::new(vec![keyword.to_string()], vec!["fr".to_string()])
}

fn phase(n: u8) -> PhaseResult {
    PhaseResult {
        phase: n,
        name: format!("phase {n}"),
        duration_ms: 1200,
        duration: "1.2s".into(),
        summary: "ok".into(),
        stats: Default::default(),
    }
}

#[tokio::test]
async fn create_job_normalizes_and_defaults() {
    let (pool, _container) = setup_test_db().await;
    let repo = SearchJobRepository::new(pool);

    let job = repo
        .create_job(
            SubmitJobRequest::new(
                vec![" shoes ".into(), "shoes".into(), "".into()],
                vec!["fr".into(), "be".into()],
            )
            .with_min_ads(3)
            .with_cms(vec!["Shopify".into()]),
        )
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.keywords, vec!["shoes"]);
    assert_eq!(job.countries, vec!["FR", "BE"]);
    assert_eq!(job.filters.min_ads, 3);
    assert_eq!(job.filters.cms, vec!["Shopify"]);
    assert_eq!(job.current_phase, 0);
    assert!(job.phase_history.is_empty());
    assert!(job.worker_id.is_none());
    assert!(job.result.is_none());
}

#[tokio::test]
async fn create_job_rejects_invalid_request() {
    let (pool, _container) = setup_test_db().await;
    let repo = SearchJobRepository::new(pool);

    let err = repo
        .create_job(SubmitJobRequest::new(vec!["  ".into()], vec!["FR".into()]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
}

#[tokio::test]
async fn claim_respects_priority_then_age_and_limit() {
    let (pool, _container) = setup_test_db().await;
    let repo = SearchJobRepository::new(pool);

    let old = repo.create_job(request("old")).await.unwrap();
    let _young = repo.create_job(request("young")).await.unwrap();
    let urgent = repo
        .create_job(request("urgent").with_priority(10))
        .await
        .unwrap();

    let claimed = repo.claim_pending("worker-1", 2).await.unwrap();
    let ids: Vec<_> = claimed.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![urgent.id, old.id]);
    for job in &claimed {
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.worker_id.as_deref(), Some("worker-1"));
        assert!(job.started_at.is_some());
    }

    let rest = repo.claim_pending("worker-2", 5).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert!(repo.claim_pending("worker-2", 5).await.unwrap().is_empty());
    assert!(repo.claim_pending("worker-2", 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_claims_never_share_a_job() {
    let (pool, _container) = setup_test_db().await;
    let repo = SearchJobRepository::new(pool);
    for i in 0..6 {
        repo.create_job(request(&format!("kw{i}"))).await.unwrap();
    }

    let (a, b) = tokio::join!(repo.claim_pending("a", 4), repo.claim_pending("b", 4));
    let mut ids: Vec<_> = a.unwrap().into_iter().chain(b.unwrap()).map(|j| j.id).collect();
    assert_eq!(ids.len(), 6);
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 6);
}

#[tokio::test]
async fn progress_and_phase_history_apply_to_running_jobs_only() {
    let (pool, _container) = setup_test_db().await;
    let repo = SearchJobRepository::new(pool);

    let pending = repo.create_job(request("pending")).await.unwrap();
    repo.update_progress(pending.id, 3, 40, "ignored").await.unwrap();
    let unchanged = repo.get_job(pending.id).await.unwrap().unwrap();
    assert_eq!(unchanged.current_phase, 0);

    let running = repo.claim_pending("w", 1).await.unwrap().remove(0);
    repo.update_progress(running.id, 2, 150, "Pages: 3/10 - p1").await.unwrap();
    repo.append_phase(running.id, phase(1)).await.unwrap();
    repo.append_phase(running.id, phase(2)).await.unwrap();

    let job = repo.get_job(running.id).await.unwrap().unwrap();
    assert_eq!(job.current_phase, 2);
    assert_eq!(job.progress_percent, 100);
    assert_eq!(job.progress_message.as_deref(), Some("Pages: 3/10 - p1"));
    let phases: Vec<u8> = job.phase_history.iter().map(|p| p.phase).collect();
    assert_eq!(phases, vec![1, 2]);
}

#[tokio::test]
async fn finish_job_is_terminal() {
    let (pool, _container) = setup_test_db().await;
    let repo = SearchJobRepository::new(pool);

    repo.create_job(request("shoes")).await.unwrap();
    let job = repo.claim_pending("w", 1).await.unwrap().remove(0);

    let summary = JobSummary {
        ads_found: 7,
        pages_saved: 1,
        ..Default::default()
    };
    assert!(repo.finish_job(job.id, JobFinish::completed(summary.clone())).await.unwrap());

    let done = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress_percent, 100);
    assert_eq!(done.result, Some(summary));
    assert!(done.completed_at.is_some());

    // A second terminal write is refused.
    assert!(!repo.finish_job(job.id, JobFinish::failed("late")).await.unwrap());
    let still = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(still.status, JobStatus::Completed);
    assert!(still.error_message.is_none());
}

#[tokio::test]
async fn failed_job_keeps_error_message() {
    let (pool, _container) = setup_test_db().await;
    let repo = SearchJobRepository::new(pool);

    repo.create_job(request("shoes")).await.unwrap();
    let job = repo.claim_pending("w", 1).await.unwrap().remove(0);
    repo.finish_job(job.id, JobFinish::failed("No API credentials configured"))
        .await
        .unwrap();

    let failed = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("No API credentials configured"));
}

#[tokio::test]
async fn recovery_resets_stale_and_owned_jobs() {
    let (pool, _container) = setup_test_db().await;
    let repo = SearchJobRepository::new(pool.clone());

    for kw in ["a", "b", "c"] {
        repo.create_job(request(kw)).await.unwrap();
    }
    let mine = repo.claim_pending("me", 1).await.unwrap().remove(0);
    let stale = repo.claim_pending("dead", 1).await.unwrap().remove(0);
    let live = repo.claim_pending("other", 1).await.unwrap().remove(0);
    repo.append_phase(stale.id, phase(1)).await.unwrap();
    age_job(&pool, stale.id, 45).await;

    let cutoff = Utc::now() - chrono::Duration::minutes(30);
    assert_eq!(repo.recover_interrupted(cutoff, Some("me")).await.unwrap(), 2);

    let recovered = repo.get_job(stale.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, JobStatus::Pending);
    assert!(recovered.worker_id.is_none());
    assert!(recovered.phase_history.is_empty());
    assert_eq!(
        recovered.progress_message.as_deref(),
        Some("Recovered after interruption")
    );
    assert_eq!(
        repo.get_job(mine.id).await.unwrap().unwrap().status,
        JobStatus::Pending
    );
    assert_eq!(
        repo.get_job(live.id).await.unwrap().unwrap().status,
        JobStatus::Running
    );

    // Periodic sweep only looks at staleness.
    assert_eq!(repo.recover_interrupted(cutoff, None).await.unwrap(), 0);
}

#[tokio::test]
async fn heartbeat_refreshes_and_reports_cancel_requests() {
    let (pool, _container) = setup_test_db().await;
    let repo = SearchJobRepository::new(pool.clone());

    repo.create_job(request("a")).await.unwrap();
    repo.create_job(request("b")).await.unwrap();
    let jobs = repo.claim_pending("w", 2).await.unwrap();
    let (first, second) = (jobs[0].id, jobs[1].id);
    age_job(&pool, first, 45).await;

    assert!(repo.request_cancel(second).await.unwrap());
    let flagged = repo.heartbeat(&[first, second]).await.unwrap();
    assert_eq!(flagged, vec![second]);

    // The heartbeat made the aged job fresh again.
    let cutoff = Utc::now() - chrono::Duration::minutes(30);
    assert_eq!(repo.recover_interrupted(cutoff, None).await.unwrap(), 0);
    assert!(repo.heartbeat(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_rules() {
    let (pool, _container) = setup_test_db().await;
    let repo = SearchJobRepository::new(pool);

    let pending = repo.create_job(request("a")).await.unwrap();
    assert!(!repo.request_cancel(pending.id).await.unwrap());
    assert!(repo.cancel_pending(pending.id).await.unwrap());
    assert!(!repo.cancel_pending(pending.id).await.unwrap());

    let cancelled = repo.get_job(pending.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    repo.create_job(request("b")).await.unwrap();
    let running = repo.claim_pending("w", 1).await.unwrap().remove(0);
    assert!(!repo.cancel_pending(running.id).await.unwrap());
    assert!(repo.request_cancel(running.id).await.unwrap());
    assert!(repo.finish_job(running.id, JobFinish::cancelled()).await.unwrap());
    assert_eq!(
        repo.get_job(running.id).await.unwrap().unwrap().status,
        JobStatus::Cancelled
    );
}

#[tokio::test]
async fn release_job_returns_it_to_the_queue() {
    let (pool, _container) = setup_test_db().await;
    let repo = SearchJobRepository::new(pool);

    repo.create_job(request("a")).await.unwrap();
    let job = repo.claim_pending("w", 1).await.unwrap().remove(0);
    repo.append_phase(job.id, phase(1)).await.unwrap();
    repo.release_job(job.id).await.unwrap();

    let released = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(released.status, JobStatus::Pending);
    assert!(released.phase_history.is_empty());
    assert_eq!(repo.claim_pending("w2", 1).await.unwrap()[0].id, job.id);
}

#[tokio::test]
async fn listing_and_counts() {
    let (pool, _container) = setup_test_db().await;
    let repo = SearchJobRepository::new(pool);

    let first = repo.create_job(request("a")).await.unwrap();
    let second = repo.create_job(request("b")).await.unwrap();
    let third = repo.create_job(request("c")).await.unwrap();
    repo.cancel_pending(third.id).await.unwrap();
    let running = repo.claim_pending("w", 1).await.unwrap().remove(0);
    assert_eq!(running.id, first.id);

    let active = repo.list_active(&ActiveJobsFilter::default()).await.unwrap();
    let ids: Vec<_> = active.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);

    let pending_only = repo
        .list_active(&ActiveJobsFilter {
            status: Some(JobStatus::Pending),
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(pending_only.len(), 1);
    assert_eq!(pending_only[0].id, second.id);

    let terminal = repo
        .list_active(&ActiveJobsFilter {
            status: Some(JobStatus::Cancelled),
            limit: None,
        })
        .await
        .unwrap();
    assert!(terminal.is_empty());

    let limited = repo
        .list_active(&ActiveJobsFilter {
            status: None,
            limit: Some(1),
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);

    let newest = repo.list_jobs(None, 10).await.unwrap();
    assert_eq!(newest[0].id, third.id);
    assert_eq!(
        repo.list_jobs(Some(JobStatus::Cancelled), 10).await.unwrap().len(),
        1
    );

    let counts = repo.count_by_status().await.unwrap();
    assert_eq!(counts.get(JobStatus::Pending), 1);
    assert_eq!(counts.get(JobStatus::Running), 1);
    assert_eq!(counts.get(JobStatus::Cancelled), 1);
    assert_eq!(counts.get(JobStatus::Completed), 0);
    assert_eq!(counts.total(), 3);
}
