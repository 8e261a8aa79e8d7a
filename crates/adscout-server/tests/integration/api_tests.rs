use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::integration::common::{TEST_API_KEY, setup_test_app};

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn authed_get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .body(Body::empty())
        .unwrap()
}

fn authed_delete(uri: &str) -> Request<Body> {
    Request::delete(uri)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .body(Body::empty())
        .unwrap()
}

fn authed_post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn create_job(router: &Router, keyword: &str) -> String {
    let (status, json) = send(
        router,
        authed_post(
            "/v1/jobs",
            serde_json::json!({ "keywords": [keyword], "countries": ["fr"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    json["job_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
}

#[tokio::test]
async fn openapi_document_is_public() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        Request::get("/api-docs/openapi.json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["paths"]["/v1/jobs/{id}"].is_object());
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        Request::get("/v1/jobs").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthorized");
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let app = setup_test_app().await;

    let (status, _) = send(
        &app.router,
        Request::get("/v1/jobs")
            .header("authorization", "Bearer wrong-key")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_and_get_job() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        authed_post(
            "/v1/jobs",
            serde_json::json!({
                "keywords": [" running shoes ", "running shoes", "boots"],
                "countries": ["fr", "BE"],
                "languages": ["fr"],
                "min_ads": 3,
                "cms": ["Shopify"],
                "priority": 5
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["status"], "pending");
    let job_id = json["job_id"].as_str().unwrap();

    let (status, json) = send(&app.router, authed_get(&format!("/v1/jobs/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], job_id);
    assert_eq!(json["status"], "pending");
    assert_eq!(json["keywords"], serde_json::json!(["running shoes", "boots"]));
    assert_eq!(json["countries"], serde_json::json!(["FR", "BE"]));
    assert_eq!(json["min_ads"], 3);
    assert_eq!(json["cms"], serde_json::json!(["Shopify"]));
    assert_eq!(json["priority"], 5);
    assert_eq!(json["progress_percent"], 0);
    assert_eq!(json["phase_history"], serde_json::json!([]));
    assert!(json["result"].is_null());
}

#[tokio::test]
async fn invalid_job_is_rejected() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        authed_post(
            "/v1/jobs",
            serde_json::json!({ "keywords": ["  "], "countries": ["FR"] }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");

    let (status, _) = send(
        &app.router,
        authed_post(
            "/v1/jobs",
            serde_json::json!({ "keywords": ["shoes"], "countries": ["FR"], "min_ads": 0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_unknown_job_returns_404() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        authed_get(&format!("/v1/jobs/{}", uuid::Uuid::new_v4())),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn list_jobs_filters_by_status_and_activity() {
    let app = setup_test_app().await;

    let first = create_job(&app.router, "shoes").await;
    let second = create_job(&app.router, "boots").await;
    let third = create_job(&app.router, "hats").await;

    sqlx::query("UPDATE search_jobs SET status = 'completed', completed_at = NOW() WHERE id = $1::uuid")
        .bind(&third)
        .execute(&app.pool)
        .await
        .unwrap();

    let (status, json) = send(&app.router, authed_get("/v1/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 3);

    let (_, json) = send(&app.router, authed_get("/v1/jobs?status=completed")).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["jobs"][0]["id"], third.as_str());

    let (_, json) = send(&app.router, authed_get("/v1/jobs?active=true")).await;
    assert_eq!(json["total"], 2);
    assert_eq!(json["jobs"][0]["id"], first.as_str());
    assert_eq!(json["jobs"][1]["id"], second.as_str());

    let (_, json) = send(&app.router, authed_get("/v1/jobs?active=true&limit=1")).await;
    assert_eq!(json["total"], 1);

    let (status, json) = send(&app.router, authed_get("/v1/jobs?status=sleeping")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn cancel_pending_job_then_conflict() {
    let app = setup_test_app().await;
    let job_id = create_job(&app.router, "shoes").await;

    let (status, json) = send(&app.router, authed_delete(&format!("/v1/jobs/{job_id}"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["outcome"], "cancelled");

    let (_, json) = send(&app.router, authed_get(&format!("/v1/jobs/{job_id}"))).await;
    assert_eq!(json["status"], "cancelled");

    let (status, json) = send(&app.router, authed_delete(&format!("/v1/jobs/{job_id}"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "conflict");
}

#[tokio::test]
async fn cancel_running_job_is_cooperative() {
    let app = setup_test_app().await;
    let job_id = create_job(&app.router, "shoes").await;

    sqlx::query(
        "UPDATE search_jobs SET status = 'running', worker_id = 'elsewhere', started_at = NOW() WHERE id = $1::uuid",
    )
    .bind(&job_id)
    .execute(&app.pool)
    .await
    .unwrap();

    let (status, json) = send(&app.router, authed_delete(&format!("/v1/jobs/{job_id}"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["outcome"], "cancel_requested");

    let (job_status, requested): (String, bool) =
        sqlx::query_as("SELECT status, cancel_requested FROM search_jobs WHERE id = $1::uuid")
            .bind(&job_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(job_status, "running");
    assert!(requested);
}

#[tokio::test]
async fn cancel_unknown_job_returns_404() {
    let app = setup_test_app().await;

    let (status, _) = send(
        &app.router,
        authed_delete(&format!("/v1/jobs/{}", uuid::Uuid::new_v4())),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stats_report_queue_counts() {
    let app = setup_test_app().await;
    create_job(&app.router, "shoes").await;
    create_job(&app.router, "boots").await;

    let (status, json) = send(&app.router, authed_get("/v1/stats")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["worker_id"], "test-worker");
    assert_eq!(json["max_concurrent_jobs"], 2);
    assert_eq!(json["in_flight"], 0);
    assert_eq!(json["jobs"]["pending"], 2);
}
