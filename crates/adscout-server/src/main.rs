use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use adscout_client::{AdsArchiveConfig, archive_pipeline};
use adscout_core::credentials::CredentialSpec;
use adscout_core::job::SchedulerConfig;
use adscout_core::pipeline::PipelineConfig;
use adscout_core::scheduler::{JobScheduler, TracingSchedulerReporter};
use adscout_db::{Database, DatabaseConfig};
use adscout_server::routes;
use adscout_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("adscout=info".parse()?))
        .with_target(false)
        .init();

    let api_key =
        std::env::var("ADSCOUT_SERVER_API_KEY").context("ADSCOUT_SERVER_API_KEY must be set")?;
    let port = std::env::var("ADSCOUT_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let db = Database::connect(&DatabaseConfig::from_env()?).await?;
    db.migrate().await?;

    let credentials =
        CredentialSpec::parse_list(&std::env::var("ADSCOUT_ACCESS_TOKENS").unwrap_or_default())?;
    let archive = AdsArchiveConfig {
        api_version: std::env::var("ADSCOUT_API_VERSION")
            .unwrap_or_else(|_| AdsArchiveConfig::default().api_version),
        ..AdsArchiveConfig::default()
    };
    let runner = archive_pipeline(credentials, archive, db.result_repo(), PipelineConfig::default())?;
    let scheduler = JobScheduler::new(db.job_repo(), runner, scheduler_config_from_env());

    let shutdown = CancellationToken::new();
    let worker = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown, &TracingSchedulerReporter).await })
    };

    let state = Arc::new(AppState {
        db,
        scheduler,
        api_key,
    });

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    worker.await??;
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C");
    }
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}

fn scheduler_config_from_env() -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    if let Some(max) = env_parse::<usize>("ADSCOUT_MAX_CONCURRENT_JOBS") {
        config = config.with_max_concurrent_jobs(max);
    }
    if let Some(secs) = env_parse::<u64>("ADSCOUT_POLL_INTERVAL") {
        config = config.with_poll_interval(Duration::from_secs(secs.max(1)));
    }
    if let Ok(id) = std::env::var("ADSCOUT_WORKER_ID") {
        config = config.with_worker_id(id);
    }
    config
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
