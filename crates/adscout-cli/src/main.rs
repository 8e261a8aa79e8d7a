use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use adscout_client::{AdsArchiveConfig, ArchivePipeline, archive_pipeline};
use adscout_core::credentials::CredentialSpec;
use adscout_core::job::{ActiveJobsFilter, CancelOutcome, Job, JobStatus, SchedulerConfig, SubmitJobRequest};
use adscout_core::job_store::JobStore;
use adscout_core::pipeline::PipelineConfig;
use adscout_core::scheduler::{JobScheduler, TracingSchedulerReporter};
use adscout_db::{Database, DatabaseConfig, ResultRepository, SearchJobRepository};

type Scheduler = JobScheduler<SearchJobRepository, ArchivePipeline<ResultRepository>>;

#[derive(Parser)]
#[command(name = "adscout", version, about = "Ads archive keyword intelligence")]
struct Cli {
    #[command(flatten)]
    archive: ArchiveArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ArchiveArgs {
    /// Comma-separated access tokens: `token`, `name=token`, or `token|proxy_url`
    #[arg(long, env = "ADSCOUT_ACCESS_TOKENS", default_value = "", hide_env_values = true)]
    access_tokens: String,

    /// Graph API version
    #[arg(long, env = "ADSCOUT_API_VERSION", default_value = "v24.0")]
    api_version: String,

    /// Ads requested per page
    #[arg(long, env = "ADSCOUT_PAGE_SIZE", default_value_t = 1000)]
    page_size: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job scheduler until interrupted
    Worker {
        /// Jobs executed concurrently by this process
        #[arg(long, env = "ADSCOUT_MAX_CONCURRENT_JOBS", default_value_t = 2)]
        max_jobs: usize,

        /// Seconds between queue polls
        #[arg(long, env = "ADSCOUT_POLL_INTERVAL", default_value_t = 3)]
        poll_interval: u64,

        /// Seconds to wait for in-flight jobs on shutdown
        #[arg(long, env = "ADSCOUT_SHUTDOWN_TIMEOUT", default_value_t = 60)]
        shutdown_timeout: u64,

        /// Stable worker identifier (random if omitted)
        #[arg(long, env = "ADSCOUT_WORKER_ID")]
        worker_id: Option<String>,
    },

    /// Queue a new keyword-search job
    Submit {
        /// Search keyword (repeatable)
        #[arg(short, long = "keyword", required = true)]
        keywords: Vec<String>,

        /// ISO country code (repeatable)
        #[arg(short, long = "country", required = true)]
        countries: Vec<String>,

        /// Ad language code (repeatable)
        #[arg(short, long = "language")]
        languages: Vec<String>,

        /// Minimum ads per page
        #[arg(long, default_value_t = 1)]
        min_ads: u32,

        /// Accepted CMS (repeatable; `Other` accepts unlisted platforms)
        #[arg(long = "cms")]
        cms: Vec<String>,

        /// Higher runs first
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },

    /// Show a job's status, progress, and phase history
    Status {
        /// Job ID
        id: Uuid,

        /// Print the raw job as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Cancel a pending job, or ask a running one to stop
    Cancel {
        /// Job ID
        id: Uuid,
    },

    /// List jobs
    List {
        /// Only pending and running jobs
        #[arg(long, default_value_t = false)]
        active: bool,

        /// Filter by status
        #[arg(short, long)]
        status: Option<String>,

        /// Number of jobs to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("adscout=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = connect_db().await?;

    match cli.command {
        Commands::Worker {
            max_jobs,
            poll_interval,
            shutdown_timeout,
            worker_id,
        } => {
            let mut config = SchedulerConfig::default()
                .with_max_concurrent_jobs(max_jobs)
                .with_poll_interval(Duration::from_secs(poll_interval.max(1)))
                .with_shutdown_timeout(Duration::from_secs(shutdown_timeout));
            if let Some(id) = worker_id {
                config = config.with_worker_id(id);
            }
            let scheduler = build_scheduler(&db, &cli.archive, config)?;
            cmd_worker(scheduler).await?;
        }
        Commands::Submit {
            keywords,
            countries,
            languages,
            min_ads,
            cms,
            priority,
        } => {
            let request = SubmitJobRequest::new(keywords, countries)
                .with_languages(languages)
                .with_min_ads(min_ads)
                .with_cms(cms)
                .with_priority(priority);
            let scheduler = build_scheduler(&db, &cli.archive, SchedulerConfig::default())?;
            let job = scheduler.submit_job(request).await?;
            println!("{}", job.id);
        }
        Commands::Status { id, json } => {
            let scheduler = build_scheduler(&db, &cli.archive, SchedulerConfig::default())?;
            let job = scheduler
                .get_job_status(id)
                .await?
                .with_context(|| format!("Job not found: {id}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            } else {
                print_job(&job);
            }
        }
        Commands::Cancel { id } => {
            let scheduler = build_scheduler(&db, &cli.archive, SchedulerConfig::default())?;
            match scheduler.cancel_job(id).await? {
                CancelOutcome::Cancelled => println!("Job {id} cancelled"),
                CancelOutcome::CancelRequested => {
                    println!("Job {id} is running; it will stop at the next phase boundary")
                }
                CancelOutcome::NotCancellable => {
                    anyhow::bail!("Job {id} already finished and cannot be cancelled")
                }
                CancelOutcome::NotFound => anyhow::bail!("Job not found: {id}"),
            }
        }
        Commands::List {
            active,
            status,
            limit,
        } => {
            let status = status
                .map(|s| s.parse::<JobStatus>().map_err(anyhow::Error::msg))
                .transpose()?;
            cmd_list(&db.job_repo(), active, status, limit).await?;
        }
    }

    Ok(())
}

async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

fn build_scheduler(db: &Database, archive: &ArchiveArgs, config: SchedulerConfig) -> Result<Scheduler> {
    let credentials = CredentialSpec::parse_list(&archive.access_tokens)
        .context("Invalid ADSCOUT_ACCESS_TOKENS")?;
    let archive = AdsArchiveConfig {
        api_version: archive.api_version.clone(),
        page_size: archive.page_size,
        ..AdsArchiveConfig::default()
    };
    let runner = archive_pipeline(credentials, archive, db.result_repo(), PipelineConfig::default())?;
    Ok(JobScheduler::new(db.job_repo(), runner, config))
}

async fn cmd_worker(scheduler: Scheduler) -> Result<()> {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for CTRL+C");
        }
        tracing::info!("Shutdown signal received");
        signal.cancel();
    });

    scheduler.run(shutdown, &TracingSchedulerReporter).await?;
    Ok(())
}

async fn cmd_list(
    repo: &SearchJobRepository,
    active: bool,
    status: Option<JobStatus>,
    limit: usize,
) -> Result<()> {
    let jobs = if active {
        repo.list_active(&ActiveJobsFilter {
            status,
            limit: Some(limit),
        })
        .await?
    } else {
        repo.list_jobs(status, limit).await?
    };

    if jobs.is_empty() {
        println!("No jobs found");
    }
    for job in &jobs {
        println!(
            "  {}  {:<10}  {:>3}%  {}  [{}]",
            job.id,
            job.status,
            job.progress_percent,
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
            job.keywords.join(", "),
        );
    }

    let counts = repo.count_by_status().await?;
    let summary: Vec<String> = JobStatus::ALL
        .iter()
        .filter(|s| counts.get(**s) > 0)
        .map(|s| format!("{s}: {}", counts.get(*s)))
        .collect();
    println!("\nQueue: {}", if summary.is_empty() { "empty".to_string() } else { summary.join(", ") });
    Ok(())
}

fn print_job(job: &Job) {
    println!("Job {}", job.id);
    println!("  status:    {}", job.status);
    println!("  keywords:  {}", job.keywords.join(", "));
    println!("  countries: {}", job.countries.join(", "));
    println!(
        "  progress:  {}% (phase {}) {}",
        job.progress_percent,
        job.current_phase,
        job.progress_message.as_deref().unwrap_or("")
    );
    if let Some(worker) = &job.worker_id {
        println!("  worker:    {worker}");
    }
    if let Some(error) = &job.error_message {
        println!("  error:     {error}");
    }
    if !job.phase_history.is_empty() {
        println!("\n  Phases:");
        for phase in &job.phase_history {
            println!(
                "    {}. {:<24} {:>8}  {}",
                phase.phase, phase.name, phase.duration, phase.summary
            );
        }
    }
    if let Some(result) = &job.result {
        println!(
            "\n  ads found {} | pages {} -> {} saved ({} new) | winning {} ({} new) | errors {}",
            result.ads_found,
            result.pages_found,
            result.pages_saved,
            result.pages_new,
            result.winning_ads,
            result.winning_new,
            result.errors,
        );
    }
}
