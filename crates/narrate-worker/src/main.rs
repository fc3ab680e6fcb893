//! Narration pipeline worker binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use narrate_models::{JobKind, ProjectConfig, ProjectId};
use narrate_worker::{
    PipelineContext, PipelineService, ProcessLock, Scheduler, WorkerConfig, WorkerError,
};

#[derive(Debug, Parser)]
#[command(name = "narrate-worker", version, about = "Turn long texts into narrated videos")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Recover, then run the scheduler until Ctrl-C, picking up jobs
    /// requested by other invocations
    Run,
    /// Create a project from a text file
    Create {
        name: String,
        text_file: PathBuf,
        #[arg(long)]
        description: Option<String>,
        /// Target length of each output video, in seconds
        #[arg(long)]
        target_duration: Option<f64>,
        #[arg(long)]
        voice: Option<String>,
        /// Custom background image
        #[arg(long)]
        background: Option<PathBuf>,
        /// Run audio and video generation right away (or hand them to a
        /// running worker)
        #[arg(long)]
        start: bool,
    },
    /// Synthesize audio (and then videos) for a project
    ///
    /// Hands the job to the running worker instead if there is one.
    StartAudio { project_id: i64 },
    /// Render videos for a project whose audio is complete
    ///
    /// Hands the job to the running worker instead if there is one.
    StartVideo { project_id: i64 },
    /// Print a project's progress as JSON
    Status { project_id: i64 },
    /// Reconcile state after an unclean shutdown and exit
    Recover,
}

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(e) = run(Cli::parse()).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Colored output for dev, JSON for production.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

fn init_metrics() -> Result<()> {
    let Ok(addr) = std::env::var("METRICS_ADDR") else {
        return Ok(());
    };
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid METRICS_ADDR '{}'", addr))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    info!("Serving metrics on http://{}/metrics", addr);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    init_metrics()?;

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);
    let lock_path = ProcessLock::path_for(&config.database_path);
    let poll_interval = config.poll_interval;

    let ctx = Arc::new(PipelineContext::open(config).context("failed to open state store")?);
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&ctx)));
    let service = PipelineService::new(ctx, Arc::clone(&scheduler));

    match cli.command {
        Command::Run => {
            let _lock = ProcessLock::acquire(&lock_path, "run")?;
            service.recover().await?;
            scheduler.start();

            let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(100)));
            let shutdown = tokio::signal::ctrl_c();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = ticker.tick() => {
                        if let Err(e) = service.adopt_pending_jobs().await {
                            error!("Failed to pick up requested jobs: {}", e);
                        }
                    }
                }
            }
            info!("Received shutdown signal");
            scheduler.shutdown().await;
        }
        Command::Create {
            name,
            text_file,
            description,
            target_duration,
            voice,
            background,
            start,
        } => {
            let text = tokio::fs::read_to_string(&text_file)
                .await
                .with_context(|| format!("failed to read {}", text_file.display()))?;
            let mut project_config = ProjectConfig::default();
            if let Some(secs) = target_duration {
                project_config = project_config.with_target_duration(secs);
            }
            if let Some(voice) = voice {
                project_config = project_config.with_voice(voice);
            }
            if let Some(path) = background {
                project_config = project_config.with_custom_background(path);
            }

            let project = service
                .create_project(&name, description.as_deref(), &text, project_config)
                .await?;
            println!("{}", serde_json::to_string_pretty(&project)?);

            if start {
                start_stage(&service, &lock_path, project.id, JobKind::AudioSynthesis).await?;
            }
        }
        Command::StartAudio { project_id } => {
            start_stage(&service, &lock_path, ProjectId(project_id), JobKind::AudioSynthesis)
                .await?;
        }
        Command::StartVideo { project_id } => {
            start_stage(&service, &lock_path, ProjectId(project_id), JobKind::VideoGeneration)
                .await?;
        }
        Command::Status { project_id } => {
            let progress = service.project_progress(ProjectId(project_id))?;
            println!("{}", serde_json::to_string_pretty(&progress)?);
        }
        Command::Recover => {
            let _lock = ProcessLock::acquire(&lock_path, "recover")?;
            let report = service.recover().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Run one stage to completion here, or hand it to the worker holding the lock.
async fn start_stage(
    service: &PipelineService,
    lock_path: &Path,
    project_id: ProjectId,
    kind: JobKind,
) -> Result<()> {
    let lock = match ProcessLock::acquire(lock_path, kind.as_str()) {
        Ok(lock) => lock,
        Err(WorkerError::Locked { pid, .. }) => {
            let job = service.request_job(project_id, kind)?;
            info!("Worker process {} will run {} job {}", pid, kind, job.id);
            println!("{}", serde_json::to_string_pretty(&job)?);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    service.recover().await?;
    match service.context().submit(project_id, kind).await {
        Ok(job) => println!("{}", serde_json::to_string_pretty(&job)?),
        // Recovery re-queued an earlier request for the same stage
        Err(e) if e.is_duplicate() => info!("{} job for project {} already queued", kind, project_id),
        Err(e) => return Err(e.into()),
    }
    run_until_idle(service).await;
    drop(lock);
    Ok(())
}

/// Dispatch until every queued job (its follow-ups and any job handed off
/// meanwhile) is done, or Ctrl-C.
async fn run_until_idle(service: &PipelineService) {
    let scheduler = service.scheduler();
    scheduler.start();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = scheduler.wait_idle() => match service.adopt_pending_jobs().await {
                Ok(adopted) if adopted.requeued > 0 => continue,
                Ok(_) => {
                    info!("All jobs finished");
                    break;
                }
                Err(e) => {
                    error!("Failed to pick up requested jobs: {}", e);
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
        }
    }
    scheduler.shutdown().await;
}
