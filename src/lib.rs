//! Transcode Pipeline - a bounded, retrying video transcoding job pipeline.
//!
//! Jobs are pulled from a Redis queue by a pool that runs at most N of them at
//! once. Each job probes its source, transcodes up to M quality presets in
//! parallel, extracts thumbnails, writes an HLS manifest, and reports the
//! result to the video record service.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod report;
pub mod storage;
pub mod validation;
pub mod worker;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::cli::{Cli, Commands, RunArgs};
use crate::config::AppConfig;
use crate::engine::FfmpegEngine;
use crate::notify::{run_queue_sampler, DiscordNotifier, Metrics, MetricsServer, Notifiers};
use crate::pipeline::{JobProcessor, PipelineSettings};
use crate::queue::{JobDescriptor, JobQueue, RedisJobQueue};
use crate::report::http::HttpReporter;
use crate::storage::LocalStorage;
use crate::validation::report::format_report;
use crate::validation::{validate_config, SystemCapabilities};
use crate::worker::{JobRunner, PoolSettings, ReportPolicy, WorkerPool};

/// Runs the transcoding pipeline with the provided CLI arguments.
pub async fn run(cli: Cli) -> Result<()> {
    let level = match cli.log_level_override() {
        Some(level) => level.to_string(),
        None => config::load_from_path(&cli.config)
            .map(|c| c.global.log_level)
            .unwrap_or_else(|_| "info".to_string()),
    };
    setup_logging(&level)?;

    match cli.command {
        Commands::Run(args) => run_pipeline(args, &cli.config).await,
        Commands::ConfigValidate => check_config(&cli.config),
        Commands::ConfigShow => show_config(&cli.config),
        Commands::Enqueue { file } => enqueue_job(&cli.config, &file).await,
        Commands::QueueList => list_queue(&cli.config).await,
        Commands::QueueClear => clear_queue(&cli.config).await,
        Commands::RetryDeadLetter { video_id } => retry_dead_letter(&cli.config, &video_id).await,
    }
}

/// Initializes the tracing subscriber for structured logging.
fn setup_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .json()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

fn load(config_path: &Path) -> Result<AppConfig> {
    let config = config::load_from_path(config_path).context("Failed to load configuration")?;
    let capabilities = SystemCapabilities::detect(&config.engine.ffmpeg_path);
    config::load_and_validate(config_path, &capabilities)
}

async fn connect_queue(config: &AppConfig) -> Result<RedisJobQueue> {
    let queue = RedisJobQueue::new(
        &config.global.redis.url(),
        &config.global.worker.consumer_name,
    )
    .await?;
    info!(
        host = %config.global.redis.host,
        port = config.global.redis.port,
        "Connected to Redis"
    );
    Ok(queue)
}

/// Runs the worker pool until a shutdown signal, then drains.
async fn run_pipeline(args: RunArgs, config_path: &Path) -> Result<()> {
    info!("Starting transcoding pipeline");

    let mut config = load(config_path)?;
    if let Some(concurrency) = args.concurrency {
        config.global.worker.max_concurrent_jobs = concurrency.get();
    }

    let redis_queue = connect_queue(&config).await?;
    if let Err(e) = config::cache::publish_fingerprint(redis_queue.connection(), &config.presets).await {
        warn!(error = %e, "Failed to publish preset catalog fingerprint");
    }

    if args.skip_recovery {
        info!("Skipping in-flight recovery");
    } else {
        let recovered = redis_queue.recover_in_flight().await?;
        if recovered > 0 {
            warn!(recovered, "Returned jobs left in flight by a previous run");
        }
    }
    let queue: Arc<dyn JobQueue> = Arc::new(redis_queue);

    let background = CancellationToken::new();
    let tasks = TaskTracker::new();
    let notifiers = build_notifiers(&config, &queue, &background, &tasks)?;

    let processor = JobProcessor::new(
        Arc::new(FfmpegEngine::new(&config.engine)),
        Arc::new(LocalStorage::from_config(&config.storage)),
        PipelineSettings {
            catalog: config.presets.clone(),
            max_parallel_presets: config.global.worker.max_parallel_presets,
            stage_timeout: config.global.worker.stage_timeout(),
            max_thumbnails: config.global.worker.max_thumbnails,
            temp_dir: config.global.temp_dir.clone(),
        },
    );
    let runner = JobRunner::new(
        queue.clone(),
        Arc::new(processor),
        Arc::new(HttpReporter::new(&config.reporter)?),
        notifiers.clone(),
        ReportPolicy {
            attempts: config.global.retry.report_attempts,
            backoff: config.global.retry.report_backoff(),
        },
    );
    let pool = WorkerPool::new(
        queue,
        Arc::new(runner),
        PoolSettings::from_config(&config.global.worker),
        notifiers,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone(), pool.abort_handle()));

    info!(
        max_concurrent_jobs = config.global.worker.max_concurrent_jobs,
        max_parallel_presets = config.global.worker.max_parallel_presets,
        "Transcoding pipeline is running. Press Ctrl+C to stop."
    );
    pool.run(shutdown).await;

    background.cancel();
    tasks.close();
    tasks.wait().await;

    info!("Transcoding pipeline stopped");
    Ok(())
}

/// Starts the metrics server and queue sampler, and the Discord notifier if configured.
fn build_notifiers(
    config: &AppConfig,
    queue: &Arc<dyn JobQueue>,
    background: &CancellationToken,
    tasks: &TaskTracker,
) -> Result<Notifiers> {
    let mut notifiers = Notifiers::default();

    let prometheus = &config.global.prometheus;
    if prometheus.enabled {
        let metrics = Arc::new(Metrics::new()?);

        let server = MetricsServer::new(metrics.clone(), prometheus.port);
        let token = background.clone();
        tasks.spawn(async move {
            if let Err(e) = server.start(token).await {
                error!(error = %e, "Prometheus server failed");
            }
        });

        tasks.spawn(run_queue_sampler(
            queue.clone(),
            metrics.clone(),
            Duration::from_secs(prometheus.sample_interval_seconds),
            background.clone(),
        ));

        info!(port = prometheus.port, "Prometheus metrics server started");
        notifiers.metrics = Some(metrics);
    }

    if let Some(discord) = &config.global.notifications.discord {
        notifiers.discord = Some(Arc::new(DiscordNotifier::new(discord)?));
        info!("Discord notifications enabled");
    }

    Ok(notifiers)
}

/// First signal starts the drain; a second aborts in-flight jobs.
async fn watch_signals(shutdown: CancellationToken, abort: CancellationToken) {
    if let Err(e) = shutdown_signal().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received, finishing in-flight jobs (signal again to abort)");
    shutdown.cancel();

    if shutdown_signal().await.is_ok() {
        warn!("Second shutdown signal received, aborting in-flight jobs");
        abort.cancel();
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Validates the configuration file and prints every issue.
fn check_config(config_path: &Path) -> Result<()> {
    let config = config::load_from_path(config_path)?;
    let capabilities = SystemCapabilities::detect(&config.engine.ffmpeg_path);
    let result = validate_config(&config, &capabilities);

    print!("{}", format_report(&result));
    if !result.is_valid() {
        anyhow::bail!(error::ConfigError::ValidationFailed {
            error_count: result.error_count()
        });
    }

    println!("{} preset(s):", config.presets.len());
    for preset in &config.presets {
        println!(
            "  - {} ({}x{}, {} kbps video, {} kbps audio)",
            preset.name, preset.width, preset.height, preset.video_bitrate_kbps, preset.audio_bitrate_kbps
        );
    }
    Ok(())
}

/// Displays the parsed configuration.
fn show_config(config_path: &Path) -> Result<()> {
    let config = load(config_path)?;
    println!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

/// Reads a job descriptor from `file`, applying the configured retry limit
/// when the file does not carry one.
fn read_job(file: &Path, default_max_retries: u32) -> Result<JobDescriptor> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read job file {}", file.display()))?;
    let mut value: serde_json::Value =
        serde_json::from_str(&content).context("Job file is not valid JSON")?;

    if let Some(fields) = value.as_object_mut() {
        fields
            .entry("maxRetries")
            .or_insert_with(|| default_max_retries.into());
    }

    let job: JobDescriptor = serde_json::from_value(value).context("Job file is not a job descriptor")?;
    if job.video_id.trim().is_empty() {
        anyhow::bail!("Job file has an empty videoId");
    }
    Ok(job)
}

async fn enqueue_job(config_path: &Path, file: &Path) -> Result<()> {
    let config = load(config_path)?;
    let job = read_job(file, config.global.retry.max_retries)?;

    let queue = connect_queue(&config).await?;
    queue.enqueue(&job).await?;
    println!("Enqueued job {} ({}).", job.video_id, job.original_file_name);
    Ok(())
}

/// Lists pending and dead-lettered jobs.
async fn list_queue(config_path: &Path) -> Result<()> {
    let config = load(config_path)?;
    let queue = connect_queue(&config).await?;

    let jobs = queue.list_pending().await?;
    if jobs.is_empty() {
        println!("Queue is empty.");
    } else {
        println!("Queue ({} jobs):", jobs.len());
        for job in jobs {
            println!(
                "  {} - {} (attempt {} of {})",
                job.video_id,
                job.original_file_name,
                job.attempt(),
                job.max_retries + 1
            );
        }
    }

    let dead_letter = queue.list_dead_letter().await?;
    if !dead_letter.is_empty() {
        println!("\nDead letter queue ({} jobs):", dead_letter.len());
        for job in dead_letter {
            println!(
                "  {} - {} ({})",
                job.video_id,
                job.original_file_name,
                job.last_error.as_deref().unwrap_or("Unknown error")
            );
        }
    }

    Ok(())
}

/// Clears all pending jobs.
async fn clear_queue(config_path: &Path) -> Result<()> {
    let config = load(config_path)?;
    let queue = connect_queue(&config).await?;

    let count = queue.clear().await?;
    println!("Cleared {} job(s) from queue.", count);
    Ok(())
}

/// Returns a dead-lettered job to the queue.
async fn retry_dead_letter(config_path: &Path, video_id: &str) -> Result<()> {
    let config = load(config_path)?;
    let queue = connect_queue(&config).await?;

    queue.retry_dead_letter(video_id).await?;
    println!("Job {} moved from dead letter queue to main queue.", video_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn job_file(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    const JOB: &str = r#"{
        "videoId": "v1",
        "userId": "u1",
        "sourceUrl": "file:///uploads/v1.mp4",
        "originalFileName": "holiday.mp4"
    }"#;

    #[test]
    fn job_without_limit_gets_configured_retries() {
        let file = job_file(JOB);
        let job = read_job(file.path(), 5).unwrap();

        assert_eq!(job.video_id, "v1");
        assert_eq!(job.max_retries, 5);
        assert_eq!(job.retry_count, 0);
        assert!(job.options.generate_variants);
    }

    #[test]
    fn job_limit_in_file_wins() {
        let file = job_file(&JOB.replace("\"userId\"", "\"maxRetries\": 1, \"userId\""));
        assert_eq!(read_job(file.path(), 5).unwrap().max_retries, 1);
    }

    #[test]
    fn empty_video_id_is_rejected() {
        let file = job_file(&JOB.replace("\"v1\"", "\"  \""));
        assert!(read_job(file.path(), 3).is_err());
    }
}
