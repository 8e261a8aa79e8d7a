use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

use adscout_client::{AdsArchiveConfig, archive_pipeline};
use adscout_core::job::SchedulerConfig;
use adscout_core::pipeline::PipelineConfig;
use adscout_core::scheduler::JobScheduler;
use adscout_db::Database;
use adscout_server::routes;
use adscout_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

pub struct TestApp {
    pub router: Router,
    pub pool: PgPool,
    _container: ContainerAsync<GenericImage>,
}

/// Spin up a PostgreSQL container and return the router wired to it.
///
/// No worker loop runs, so submitted jobs stay `pending`.
pub async fn setup_test_app() -> TestApp {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "adscout_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/adscout_test");
    let pool = retry_connect(&url).await;

    let db = Database::from_pool(pool.clone());
    db.migrate().await.expect("Failed to run migrations");

    let runner = archive_pipeline(
        Vec::new(),
        AdsArchiveConfig::default(),
        db.result_repo(),
        PipelineConfig::default(),
    )
    .expect("Failed to build pipeline");
    let scheduler = JobScheduler::new(
        db.job_repo(),
        runner,
        SchedulerConfig::default().with_worker_id("test-worker"),
    );

    let state = Arc::new(AppState {
        db,
        scheduler,
        api_key: TEST_API_KEY.to_string(),
    });

    TestApp {
        router: routes::router(state),
        pool,
        _container: container,
    }
}

async fn retry_connect(url: &str) -> PgPool {
    for _ in 0..30 {
        if let Ok(pool) = PgPoolOptions::new().max_connections(5).connect(url).await {
            return pool;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to test database");
}
