//! Fakes shared by the integration scenarios.

#![allow(dead_code)]

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use transcode_pipeline::config::model::default_presets;
use transcode_pipeline::engine::{CodecSelection, TranscodeOutput, TranscodingEngine};
use transcode_pipeline::error::{EngineError, ReportError, StorageError};
use transcode_pipeline::notify::Notifiers;
use transcode_pipeline::pipeline::{JobProcessor, PipelineSettings, ProcessingResult, VideoMetadata};
use transcode_pipeline::queue::{InMemoryJobQueue, JobDescriptor, ProcessingOptions, QualityPreset};
use transcode_pipeline::report::ResultReporter;
use transcode_pipeline::storage::StorageAdapter;
use transcode_pipeline::worker::{JobRunner, PoolSettings, ReportPolicy, WorkerPool};

/// Tracks how many holders are active at once and the highest count seen.
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Engine that sleeps instead of running ffmpeg.
pub struct FakeEngine {
    pub source_height: u32,
    pub failing_presets: HashSet<String>,
    pub probe_fails: bool,
    pub work: Duration,
    pub probes: AtomicUsize,
    pub transcoded: Mutex<Vec<String>>,
    pub transcodes: Gauge,
}

impl FakeEngine {
    pub fn new(source_height: u32) -> Self {
        Self {
            source_height,
            failing_presets: HashSet::new(),
            probe_fails: false,
            work: Duration::from_millis(5),
            probes: AtomicUsize::new(0),
            transcoded: Mutex::new(Vec::new()),
            transcodes: Gauge::default(),
        }
    }

    pub fn failing(mut self, presets: &[&str]) -> Self {
        self.failing_presets = presets.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn broken_probe(mut self) -> Self {
        self.probe_fails = true;
        self
    }

    pub fn slow(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    pub fn transcoded(&self) -> Vec<String> {
        let mut names = self.transcoded.lock().unwrap().clone();
        names.sort();
        names
    }

    async fn busy(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            _ = tokio::time::sleep(self.work) => Ok(()),
        }
    }
}

#[async_trait]
impl TranscodingEngine for FakeEngine {
    async fn probe(&self, _source: &str, cancel: &CancellationToken) -> Result<VideoMetadata, EngineError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_fails {
            return Err(EngineError::ProbeFailed("moov atom not found".to_string()));
        }
        self.busy(cancel).await?;

        let width = (self.source_height * 16 / 9 + 1) & !1;
        Ok(VideoMetadata {
            duration_seconds: 120.0,
            width,
            height: self.source_height,
            frame_rate: 30.0,
            video_codec: "h264".to_string(),
            video_bitrate_kbps: Some(8000),
            audio_codec: Some("aac".to_string()),
            audio_bitrate_kbps: Some(192),
            audio_channels: Some(2),
            file_size: 120_000_000,
        })
    }

    async fn transcode(
        &self,
        _source: &str,
        preset: &QualityPreset,
        codecs: &CodecSelection,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<TranscodeOutput, EngineError> {
        self.transcoded.lock().unwrap().push(preset.name.clone());
        self.transcodes.enter();
        let work = self.busy(cancel).await;
        self.transcodes.leave();
        work?;

        if self.failing_presets.contains(&preset.name) {
            return Err(EngineError::FfmpegFailed {
                code: 1,
                stderr: "Error while opening encoder".to_string(),
            });
        }

        Ok(TranscodeOutput {
            path: output_dir.join(format!("{}.mp4", preset.name)),
            achieved_bitrate_kbps: preset.video_bitrate_kbps,
            codec: codecs.video.clone(),
            file_size: preset.video_bitrate_kbps as u64 * 15_000,
            width: preset.width,
            height: preset.height,
        })
    }

    async fn extract_frame(
        &self,
        _source: &str,
        _at_seconds: f64,
        _output: &Path,
        _cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Storage that remembers paths instead of writing bytes.
#[derive(Default)]
pub struct RecordingStorage {
    pub paths: Mutex<Vec<String>>,
}

impl RecordingStorage {
    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageAdapter for RecordingStorage {
    async fn upload(&self, _data: Vec<u8>, path: &str) -> Result<String, StorageError> {
        self.paths.lock().unwrap().push(path.to_string());
        Ok(format!("https://cdn.test/{}", path))
    }

    async fn upload_file(&self, _local: &Path, path: &str) -> Result<String, StorageError> {
        self.upload(Vec::new(), path).await
    }
}

/// Reporter that records results and tracks jobs between start and report.
#[derive(Default)]
pub struct FakeReporter {
    pub unreachable: AtomicBool,
    pub reports: Mutex<Vec<(String, ProcessingResult)>>,
    pub report_calls: AtomicUsize,
    pub jobs: Gauge,
}

impl FakeReporter {
    pub fn unreachable() -> Self {
        let reporter = Self::default();
        reporter.unreachable.store(true, Ordering::SeqCst);
        reporter
    }

    pub fn reports(&self) -> Vec<(String, ProcessingResult)> {
        self.reports.lock().unwrap().clone()
    }

    pub fn result_for(&self, video_id: &str) -> Option<ProcessingResult> {
        self.reports()
            .into_iter()
            .rev()
            .find(|(id, _)| id == video_id)
            .map(|(_, result)| result)
    }
}

#[async_trait]
impl ResultReporter for FakeReporter {
    async fn mark_processing(&self, _video_id: &str) -> Result<(), ReportError> {
        self.jobs.enter();
        Ok(())
    }

    async fn report(&self, video_id: &str, result: &ProcessingResult) -> Result<(), ReportError> {
        self.report_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ReportError::Unreachable("connection refused".to_string()));
        }
        self.jobs.leave();
        self.reports
            .lock()
            .unwrap()
            .push((video_id.to_string(), result.clone()));
        Ok(())
    }
}

/// A pool wired to fakes, with handles for assertions.
pub struct Harness {
    pub queue: Arc<InMemoryJobQueue>,
    pub engine: Arc<FakeEngine>,
    pub storage: Arc<RecordingStorage>,
    pub reporter: Arc<FakeReporter>,
    pub pool: Arc<WorkerPool>,
    _scratch: TempDir,
}

pub struct HarnessOptions {
    pub max_concurrent_jobs: usize,
    pub max_parallel_presets: usize,
    pub drain_timeout: Option<Duration>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_parallel_presets: 2,
            drain_timeout: None,
        }
    }
}

impl Harness {
    pub fn new(engine: FakeEngine, reporter: FakeReporter, options: HarnessOptions) -> Self {
        let scratch = TempDir::new().unwrap();
        let queue = Arc::new(InMemoryJobQueue::new());
        let engine = Arc::new(engine);
        let storage = Arc::new(RecordingStorage::default());
        let reporter = Arc::new(reporter);

        let processor = JobProcessor::new(
            engine.clone(),
            storage.clone(),
            PipelineSettings {
                catalog: default_presets(),
                max_parallel_presets: options.max_parallel_presets,
                stage_timeout: Duration::from_secs(10),
                max_thumbnails: 10,
                temp_dir: scratch.path().to_path_buf(),
            },
        );
        let runner = JobRunner::new(
            queue.clone(),
            Arc::new(processor),
            reporter.clone(),
            Notifiers::default(),
            ReportPolicy {
                attempts: 3,
                backoff: Duration::from_millis(1),
            },
        );
        let pool = WorkerPool::new(
            queue.clone(),
            Arc::new(runner),
            PoolSettings {
                max_concurrent_jobs: options.max_concurrent_jobs,
                dequeue_timeout: Duration::from_millis(20),
                poll_interval: Duration::from_millis(5),
                error_backoff: Duration::from_millis(20),
                drain_timeout: options.drain_timeout,
            },
            Notifiers::default(),
        );

        Self {
            queue,
            engine,
            storage,
            reporter,
            pool: Arc::new(pool),
            _scratch: scratch,
        }
    }

    /// Starts the pool on a background task.
    pub fn start(&self) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let shutdown = CancellationToken::new();
        let pool = self.pool.clone();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { pool.run(token).await });
        (shutdown, handle)
    }
}

pub fn job(video_id: &str) -> JobDescriptor {
    JobDescriptor::new(
        video_id,
        "user-1",
        format!("file:///uploads/{}.mov", video_id),
        format!("{}.mov", video_id),
        ProcessingOptions::default(),
    )
}

/// Polls `check` until it holds, failing the test after `limit`.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within {:?}", limit);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
