//! Runs one job through extraction, transcoding, thumbnails and manifest.

use std::fmt;
use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manifest::{master_playlist, media_playlist, Rendition};
use super::result::{ProcessingResult, VariantResult, VideoMetadata};
use super::state::{JobState, StateMachine};
use crate::engine::{CodecSelection, TranscodingEngine};
use crate::error::{ProcessingError, GENERIC_FAILURE_MESSAGE};
use crate::queue::job::{JobDescriptor, QualityPreset};
use crate::storage::{self, StorageAdapter};

/// Tunables for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Presets used when a job names none, in output order.
    pub catalog: Vec<QualityPreset>,
    /// Upper bound on concurrent preset transcodes within one job.
    pub max_parallel_presets: usize,
    /// Limit applied to each external call.
    pub stage_timeout: Duration,
    /// Most thumbnails taken for one job, whatever the job asks for.
    pub max_thumbnails: u32,
    /// Parent directory for per-job scratch space.
    pub temp_dir: PathBuf,
}

/// Everything one run of the pipeline produced.
#[derive(Debug)]
pub struct JobOutcome {
    /// Payload for the video record.
    pub result: ProcessingResult,
    /// The failure that ended the run, if it failed.
    pub error: Option<ProcessingError>,
    /// Non-fatal failures recorded along the way.
    pub issues: Vec<ProcessingError>,
    /// Presets skipped because they would upscale the source.
    pub skipped_presets: Vec<String>,
    /// Number of presets a transcode was attempted for.
    pub attempted_presets: usize,
    /// Probed source metadata, kept even when the record omits it.
    pub metadata: Option<VideoMetadata>,
    /// Path the job took through the state machine.
    pub machine: StateMachine,
}

impl JobOutcome {
    /// Final state of the run.
    pub fn state(&self) -> JobState {
        self.machine.state()
    }

    /// Completed with fewer variants than attempted.
    pub fn is_degraded(&self) -> bool {
        self.state() == JobState::Completed
            && self.result.variants.len() < self.attempted_presets
    }
}

/// Why a guarded call did not produce a value.
#[derive(Debug)]
enum StageFailure {
    Cancelled,
    TimedOut(Duration),
    Failed(String),
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut(limit) => write!(f, "timed out after {:?}", limit),
            Self::Failed(message) => write!(f, "{}", message),
        }
    }
}

/// Runs `fut` under a time limit, giving up early when `cancel` fires.
async fn guarded<T, E, F>(
    limit: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, StageFailure>
where
    E: fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StageFailure::Cancelled),
        outcome = tokio::time::timeout(limit, fut) => match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) if cancel.is_cancelled() => Err(StageFailure::Cancelled),
            Ok(Err(e)) => Err(StageFailure::Failed(e.to_string())),
            Err(_) => Err(StageFailure::TimedOut(limit)),
        },
    }
}

/// Evenly spaced thumbnail timestamps that avoid the first and last frame.
pub fn thumbnail_timestamps(duration_seconds: f64, count: u32) -> Vec<f64> {
    let slots = f64::from(count) + 1.0;
    (0..count)
        .map(|i| duration_seconds * (f64::from(i) + 1.0) / slots)
        .collect()
}

/// Per-run scratch directory, deleted when dropped.
///
/// Removal happens on every exit path, including a panic unwinding
/// through the pipeline.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    async fn create(path: PathBuf) -> io::Result<Self> {
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to clean up scratch directory"
            ),
        }
    }
}

/// A variant that reached storage.
struct ProducedVariant {
    preset: QualityPreset,
    result: VariantResult,
    /// Frame size of the encoded output.
    width: u32,
    height: u32,
}

/// Inputs for one preset transcode, owned so it can run on its own task.
struct VariantTask {
    engine: Arc<dyn TranscodingEngine>,
    storage: Arc<dyn StorageAdapter>,
    video_id: String,
    source_url: String,
    preset: QualityPreset,
    codecs: CodecSelection,
    scratch: PathBuf,
    limit: Duration,
    cancel: CancellationToken,
}

impl VariantTask {
    async fn run(self) -> Result<ProducedVariant, StageFailure> {
        let output = guarded(
            self.limit,
            &self.cancel,
            self.engine.transcode(
                &self.source_url,
                &self.preset,
                &self.codecs,
                &self.scratch,
                &self.cancel,
            ),
        )
        .await?;

        let path = storage::variant_path(&self.video_id, &self.preset.name);
        let url = guarded(
            self.limit,
            &self.cancel,
            self.storage.upload_file(&output.path, &path),
        )
        .await?;

        Ok(ProducedVariant {
            result: VariantResult {
                quality: self.preset.name.clone(),
                url,
                file_size: output.file_size,
                bitrate_kbps: output.achieved_bitrate_kbps,
                codec: output.codec,
            },
            width: output.width,
            height: output.height,
            preset: self.preset,
        })
    }
}

/// Artifacts gathered by the stages of one run.
#[derive(Default)]
struct Artifacts {
    metadata: Option<VideoMetadata>,
    variants: Vec<ProducedVariant>,
    thumbnail_urls: Vec<String>,
    manifest_url: Option<String>,
    issues: Vec<ProcessingError>,
    skipped_presets: Vec<String>,
    attempted_presets: usize,
}

/// Drives jobs through the processing stages.
pub struct JobProcessor {
    engine: Arc<dyn TranscodingEngine>,
    storage: Arc<dyn StorageAdapter>,
    settings: PipelineSettings,
}

impl JobProcessor {
    /// Creates a processor over the given engine and storage.
    pub fn new(
        engine: Arc<dyn TranscodingEngine>,
        storage: Arc<dyn StorageAdapter>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            engine,
            storage,
            settings,
        }
    }

    /// Runs every stage for `job`.
    ///
    /// Never returns an error: the outcome carries the failure, if any,
    /// along with whatever was produced before it.
    pub async fn process(&self, job: &JobDescriptor, cancel: &CancellationToken) -> JobOutcome {
        let started = Instant::now();
        let mut machine = StateMachine::new();
        let mut artifacts = Artifacts::default();

        let scratch_path = self.settings.temp_dir.join(format!(
            "{}-{}",
            sanitize(&job.video_id),
            uuid::Uuid::new_v4()
        ));

        let run = match ScratchDir::create(scratch_path.clone()).await {
            Ok(scratch) => {
                self.run_stages(job, scratch.path(), cancel, &mut machine, &mut artifacts)
                    .await
            }
            Err(e) => Err(ProcessingError::WorkspaceUnavailable(format!(
                "{}: {}",
                scratch_path.display(),
                e
            ))),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (result, error) = match run {
            Ok(()) => {
                advance(&mut machine, &job.video_id, JobState::Completed);
                let result = ProcessingResult {
                    success: true,
                    error: None,
                    metadata: if job.options.extract_metadata {
                        artifacts.metadata.clone()
                    } else {
                        None
                    },
                    variants: artifacts
                        .variants
                        .iter()
                        .map(|produced| produced.result.clone())
                        .collect(),
                    thumbnail_urls: std::mem::take(&mut artifacts.thumbnail_urls),
                    manifest_url: artifacts.manifest_url.take(),
                    processing_duration_ms: elapsed_ms,
                };
                (result, None)
            }
            Err(e) => {
                advance(&mut machine, &job.video_id, JobState::Failed);
                (
                    ProcessingResult::failure(GENERIC_FAILURE_MESSAGE, elapsed_ms),
                    Some(e),
                )
            }
        };

        JobOutcome {
            result,
            error,
            issues: artifacts.issues,
            skipped_presets: artifacts.skipped_presets,
            attempted_presets: artifacts.attempted_presets,
            metadata: artifacts.metadata,
            machine,
        }
    }

    async fn run_stages(
        &self,
        job: &JobDescriptor,
        scratch: &Path,
        cancel: &CancellationToken,
        machine: &mut StateMachine,
        artifacts: &mut Artifacts,
    ) -> Result<(), ProcessingError> {
        let video_id = job.video_id.as_str();
        let limit = self.settings.stage_timeout;

        advance(machine, video_id, JobState::Extracting);
        let metadata = guarded(limit, cancel, self.engine.probe(&job.source_url, cancel))
            .await
            .map_err(|e| match e {
                StageFailure::Cancelled => ProcessingError::Interrupted,
                other => ProcessingError::MetadataExtractionFailed(other.to_string()),
            })?;
        info!(
            video_id,
            width = metadata.width,
            height = metadata.height,
            duration = metadata.duration_seconds,
            "Source probed"
        );
        artifacts.metadata = Some(metadata.clone());

        advance(machine, video_id, JobState::Transcoding);
        if job.options.generate_variants {
            self.transcode_stage(job, &metadata, scratch, cancel, artifacts)
                .await?;
        } else {
            debug!(video_id, "Variants not requested");
        }

        advance(machine, video_id, JobState::ThumbnailGen);
        self.thumbnail_stage(job, &metadata, scratch, cancel, artifacts)
            .await?;

        advance(machine, video_id, JobState::ManifestGen);
        if job.options.generate_manifest && !artifacts.variants.is_empty() {
            match self.manifest_stage(job, &metadata, cancel, artifacts).await {
                Ok(url) => artifacts.manifest_url = Some(url),
                Err(StageFailure::Cancelled) => return Err(ProcessingError::Interrupted),
                Err(e) => {
                    warn!(video_id, error = %e, "Manifest generation failed");
                    artifacts.issues.push(ProcessingError::ThumbnailOrManifestFailed {
                        stage: "manifest",
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    async fn transcode_stage(
        &self,
        job: &JobDescriptor,
        metadata: &VideoMetadata,
        scratch: &Path,
        cancel: &CancellationToken,
        artifacts: &mut Artifacts,
    ) -> Result<(), ProcessingError> {
        let video_id = job.video_id.as_str();
        let requested = if job.options.presets.is_empty() {
            &self.settings.catalog
        } else {
            &job.options.presets
        };

        let (eligible, skipped): (Vec<&QualityPreset>, Vec<&QualityPreset>) = requested
            .iter()
            .partition(|preset| preset.fits(metadata.height));
        artifacts.skipped_presets = skipped.iter().map(|p| p.name.clone()).collect();
        if !skipped.is_empty() {
            debug!(video_id, skipped = ?artifacts.skipped_presets, "Skipping presets taller than source");
        }
        if eligible.is_empty() {
            return Err(ProcessingError::NoEligiblePresets {
                source_height: metadata.height,
            });
        }
        artifacts.attempted_presets = eligible.len();

        let codecs = CodecSelection::from_options(&job.options);
        let permits = Arc::new(Semaphore::new(self.settings.max_parallel_presets.max(1)));
        let mut tasks = JoinSet::new();
        for (index, preset) in eligible.iter().enumerate() {
            let task = VariantTask {
                engine: self.engine.clone(),
                storage: self.storage.clone(),
                video_id: job.video_id.clone(),
                source_url: job.source_url.clone(),
                preset: (*preset).clone(),
                codecs: codecs.clone(),
                scratch: scratch.to_path_buf(),
                limit: self.settings.stage_timeout,
                cancel: cancel.clone(),
            };
            let permits = permits.clone();
            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => AssertUnwindSafe(task.run())
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(StageFailure::Failed("transcode panicked".to_string()))
                        }),
                    Err(_) => Err(StageFailure::Cancelled),
                };
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<Result<ProducedVariant, StageFailure>>> =
            eligible.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => warn!(video_id, error = %e, "Variant task did not finish"),
            }
        }

        if cancel.is_cancelled() {
            return Err(ProcessingError::Interrupted);
        }

        for (preset, outcome) in eligible.iter().zip(outcomes) {
            let outcome = outcome.unwrap_or_else(|| {
                Err(StageFailure::Failed("variant task did not finish".to_string()))
            });
            match outcome {
                Ok(produced) => artifacts.variants.push(produced),
                Err(e) => {
                    warn!(video_id, preset = %preset.name, error = %e, "Variant failed");
                    artifacts.issues.push(ProcessingError::VariantTranscodeFailed {
                        preset: preset.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if artifacts.variants.is_empty() {
            return Err(ProcessingError::AllVariantsFailed {
                attempted: artifacts.attempted_presets,
            });
        }
        Ok(())
    }

    async fn thumbnail_stage(
        &self,
        job: &JobDescriptor,
        metadata: &VideoMetadata,
        scratch: &Path,
        cancel: &CancellationToken,
        artifacts: &mut Artifacts,
    ) -> Result<(), ProcessingError> {
        let limit = self.settings.stage_timeout;
        let requested = job.options.thumbnail_count;
        let count = requested.min(self.settings.max_thumbnails);
        if count < requested {
            warn!(
                video_id = %job.video_id,
                requested,
                allowed = count,
                "Thumbnail count above the limit, clamping"
            );
        }
        let timestamps = thumbnail_timestamps(metadata.duration_seconds, count);

        for (i, at) in timestamps.into_iter().enumerate() {
            let number = i + 1;
            let local = scratch.join(format!("thumb_{}.jpg", number));

            let uploaded = async {
                guarded(
                    limit,
                    cancel,
                    self.engine.extract_frame(&job.source_url, at, &local, cancel),
                )
                .await?;
                let path = storage::thumbnail_path(&job.video_id, number);
                guarded(limit, cancel, self.storage.upload_file(&local, &path)).await
            }
            .await;

            match uploaded {
                Ok(url) => artifacts.thumbnail_urls.push(url),
                Err(StageFailure::Cancelled) => return Err(ProcessingError::Interrupted),
                Err(e) => {
                    warn!(video_id = %job.video_id, at, error = %e, "Thumbnail failed");
                    artifacts.issues.push(ProcessingError::ThumbnailOrManifestFailed {
                        stage: "thumbnail",
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    async fn manifest_stage(
        &self,
        job: &JobDescriptor,
        metadata: &VideoMetadata,
        cancel: &CancellationToken,
        artifacts: &Artifacts,
    ) -> Result<String, StageFailure> {
        let limit = self.settings.stage_timeout;
        let mut renditions = Vec::with_capacity(artifacts.variants.len());

        for produced in &artifacts.variants {
            let preset = &produced.preset;
            let playlist = media_playlist(metadata.duration_seconds, &produced.result.url);
            let path = storage::media_playlist_path(&job.video_id, &preset.name);
            guarded(limit, cancel, self.storage.upload(playlist.into_bytes(), &path)).await?;

            renditions.push(Rendition {
                name: preset.name.clone(),
                width: produced.width,
                height: produced.height,
                bandwidth_bps: preset.bandwidth_bps(),
                uri: format!("{}.m3u8", preset.name),
            });
        }

        let master = master_playlist(&renditions);
        let path = storage::master_playlist_path(&job.video_id);
        guarded(limit, cancel, self.storage.upload(master.into_bytes(), &path)).await
    }
}

fn advance(machine: &mut StateMachine, video_id: &str, to: JobState) {
    match machine.advance(to) {
        Ok(()) => debug!(video_id, state = %to, "Job state changed"),
        Err(e) => warn!(video_id, error = %e, "Ignoring state transition"),
    }
}

/// Keeps a video id safe for use as a directory name.
fn sanitize(video_id: &str) -> String {
    video_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::config::model::default_presets;
    use crate::engine::{MockTranscodingEngine, TranscodeOutput};
    use crate::error::{EngineError, StorageError};
    use crate::queue::job::ProcessingOptions;
    use crate::storage::MockStorageAdapter;

    fn metadata(width: u32, height: u32) -> VideoMetadata {
        VideoMetadata {
            duration_seconds: 60.0,
            width,
            height,
            frame_rate: 30.0,
            video_codec: "h264".to_string(),
            video_bitrate_kbps: Some(6000),
            audio_codec: Some("aac".to_string()),
            audio_bitrate_kbps: Some(192),
            audio_channels: Some(2),
            file_size: 45_000_000,
        }
    }

    fn settings(dir: &TempDir) -> PipelineSettings {
        PipelineSettings {
            catalog: default_presets(),
            max_parallel_presets: 2,
            stage_timeout: Duration::from_secs(5),
            max_thumbnails: 10,
            temp_dir: dir.path().to_path_buf(),
        }
    }

    fn job() -> JobDescriptor {
        JobDescriptor::new("v1", "u1", "file:///in/v1.mp4", "v1.mp4", ProcessingOptions::default())
    }

    fn engine_for(height: u32, failing: &'static [&'static str]) -> MockTranscodingEngine {
        let mut engine = MockTranscodingEngine::new();
        engine
            .expect_probe()
            .returning(move |_, _| Ok(metadata(height * 16 / 9, height)));
        engine.expect_transcode().returning(move |_, preset, _, dir, _| {
            if failing.contains(&preset.name.as_str()) {
                return Err(EngineError::FfmpegFailed {
                    code: 1,
                    stderr: "encoder error".to_string(),
                });
            }
            Ok(TranscodeOutput {
                path: dir.join(format!("{}.mp4", preset.name)),
                achieved_bitrate_kbps: preset.video_bitrate_kbps,
                codec: "h264".to_string(),
                file_size: 1000,
                width: preset.width,
                height: preset.height,
            })
        });
        engine.expect_extract_frame().returning(|_, _, _, _| Ok(()));
        engine
    }

    fn accepting_storage() -> MockStorageAdapter {
        let mut storage = MockStorageAdapter::new();
        storage
            .expect_upload_file()
            .returning(|_, path| Ok(format!("https://cdn/{path}")));
        storage
            .expect_upload()
            .returning(|_, path| Ok(format!("https://cdn/{path}")));
        storage
    }

    fn processor(dir: &TempDir, engine: MockTranscodingEngine, storage: MockStorageAdapter) -> JobProcessor {
        JobProcessor::new(Arc::new(engine), Arc::new(storage), settings(dir))
    }

    /// Engine that can hang or panic on chosen calls.
    #[derive(Default)]
    struct ScriptedEngine {
        stall_extraction: bool,
        panic_extraction: bool,
        stall_preset: Option<&'static str>,
        panic_preset: Option<&'static str>,
    }

    #[async_trait]
    impl TranscodingEngine for ScriptedEngine {
        async fn probe(
            &self,
            _source: &str,
            _cancel: &CancellationToken,
        ) -> Result<VideoMetadata, EngineError> {
            if self.panic_extraction {
                panic!("decoder crashed");
            }
            if self.stall_extraction {
                std::future::pending::<()>().await;
            }
            Ok(metadata(1280, 720))
        }

        async fn transcode(
            &self,
            _source: &str,
            preset: &QualityPreset,
            _codecs: &CodecSelection,
            output_dir: &Path,
            _cancel: &CancellationToken,
        ) -> Result<TranscodeOutput, EngineError> {
            let name = Some(preset.name.as_str());
            if name == self.panic_preset {
                panic!("encoder crashed");
            }
            if name == self.stall_preset {
                std::future::pending::<()>().await;
            }
            Ok(TranscodeOutput {
                path: output_dir.join(format!("{}.mp4", preset.name)),
                achieved_bitrate_kbps: preset.video_bitrate_kbps,
                codec: "h264".to_string(),
                file_size: 1000,
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

    fn scripted(dir: &TempDir, engine: ScriptedEngine, stage_timeout: Duration) -> JobProcessor {
        let mut settings = settings(dir);
        settings.stage_timeout = stage_timeout;
        JobProcessor::new(Arc::new(engine), Arc::new(accepting_storage()), settings)
    }

    #[tokio::test]
    async fn full_run_produces_every_artifact() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, engine_for(1080, &[]), accepting_storage());

        let outcome = processor.process(&job(), &CancellationToken::new()).await;

        assert_eq!(outcome.state(), JobState::Completed);
        assert!(outcome.error.is_none());
        assert!(!outcome.is_degraded());
        let result = &outcome.result;
        assert!(result.success);
        assert_eq!(result.metadata.as_ref().map(|m| m.height), Some(1080));
        let names: Vec<_> = result.variants.iter().map(|v| v.quality.as_str()).collect();
        assert_eq!(names, ["1080p", "720p", "480p", "360p"]);
        assert_eq!(result.thumbnail_urls.len(), 3);
        assert_eq!(
            result.manifest_url.as_deref(),
            Some("https://cdn/v1/hls/master.m3u8")
        );
    }

    #[tokio::test]
    async fn presets_taller_than_source_are_skipped() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, engine_for(480, &[]), accepting_storage());

        let outcome = processor.process(&job(), &CancellationToken::new()).await;

        assert_eq!(outcome.skipped_presets, ["1080p", "720p"]);
        assert_eq!(outcome.attempted_presets, 2);
        let names: Vec<_> = outcome.result.variants.iter().map(|v| v.quality.clone()).collect();
        assert_eq!(names, ["480p", "360p"]);
    }

    #[tokio::test]
    async fn partial_variant_failure_is_degraded_success() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, engine_for(1080, &["1080p", "480p"]), accepting_storage());

        let outcome = processor.process(&job(), &CancellationToken::new()).await;

        assert_eq!(outcome.state(), JobState::Completed);
        assert!(outcome.is_degraded());
        assert_eq!(outcome.result.variants.len(), 2);
        assert_eq!(outcome.issues.len(), 2);
        assert!(outcome.issues.iter().all(|i| !i.is_fatal()));
    }

    #[tokio::test]
    async fn all_variants_failing_fails_the_job() {
        let dir = TempDir::new().unwrap();
        let processor = processor(
            &dir,
            engine_for(720, &["720p", "480p", "360p"]),
            accepting_storage(),
        );

        let outcome = processor.process(&job(), &CancellationToken::new()).await;

        assert_eq!(outcome.state(), JobState::Failed);
        assert_eq!(outcome.error, Some(ProcessingError::AllVariantsFailed { attempted: 3 }));
        assert_eq!(outcome.result.error.as_deref(), Some(GENERIC_FAILURE_MESSAGE));
        assert!(outcome.metadata.is_some());
    }

    #[tokio::test]
    async fn probe_failure_fails_before_any_transcode() {
        let dir = TempDir::new().unwrap();
        let mut engine = MockTranscodingEngine::new();
        engine
            .expect_probe()
            .returning(|_, _| Err(EngineError::ProbeFailed("corrupt".to_string())));
        engine.expect_transcode().never();
        let processor = processor(&dir, engine, MockStorageAdapter::new());

        let outcome = processor.process(&job(), &CancellationToken::new()).await;

        assert!(matches!(
            outcome.error,
            Some(ProcessingError::MetadataExtractionFailed(_))
        ));
        let path: Vec<_> = outcome.machine.history().iter().map(|t| t.to).collect();
        assert_eq!(path, [JobState::Extracting, JobState::Failed]);
    }

    #[tokio::test]
    async fn tiny_source_has_no_eligible_presets() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, engine_for(144, &[]), accepting_storage());

        let outcome = processor.process(&job(), &CancellationToken::new()).await;

        assert_eq!(
            outcome.error,
            Some(ProcessingError::NoEligiblePresets { source_height: 144 })
        );
    }

    #[tokio::test]
    async fn thumbnail_and_manifest_failures_are_not_fatal() {
        let dir = TempDir::new().unwrap();
        let mut storage = MockStorageAdapter::new();
        storage.expect_upload_file().returning(|_, path| {
            if path.contains("thumbnails") {
                Err(StorageError::WriteFailed {
                    path: path.to_string(),
                    message: "disk full".to_string(),
                })
            } else {
                Ok(format!("https://cdn/{path}"))
            }
        });
        storage.expect_upload().returning(|_, path| {
            Err(StorageError::WriteFailed {
                path: path.to_string(),
                message: "disk full".to_string(),
            })
        });
        let processor = processor(&dir, engine_for(720, &[]), storage);

        let outcome = processor.process(&job(), &CancellationToken::new()).await;

        assert_eq!(outcome.state(), JobState::Completed);
        assert!(outcome.result.thumbnail_urls.is_empty());
        assert!(outcome.result.manifest_url.is_none());
        assert_eq!(outcome.issues.len(), 4);
    }

    #[tokio::test]
    async fn options_can_disable_variants_and_metadata() {
        let dir = TempDir::new().unwrap();
        let mut engine = MockTranscodingEngine::new();
        engine.expect_probe().returning(|_, _| Ok(metadata(1920, 1080)));
        engine.expect_transcode().never();
        engine.expect_extract_frame().returning(|_, _, _, _| Ok(()));
        let processor = processor(&dir, engine, accepting_storage());

        let mut job = job();
        job.options.generate_variants = false;
        job.options.extract_metadata = false;
        job.options.thumbnail_count = 1;

        let outcome = processor.process(&job, &CancellationToken::new()).await;

        assert_eq!(outcome.state(), JobState::Completed);
        assert!(outcome.result.metadata.is_none());
        assert!(outcome.result.variants.is_empty());
        assert!(outcome.result.manifest_url.is_none());
        assert_eq!(outcome.result.thumbnail_urls.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn preset_fan_out_is_bounded() {
        let dir = TempDir::new().unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut engine = MockTranscodingEngine::new();
        engine.expect_probe().returning(|_, _| Ok(metadata(1920, 1080)));
        {
            let (active, peak) = (active.clone(), peak.clone());
            engine.expect_transcode().returning(move |_, preset, _, dir, _| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(TranscodeOutput {
                    path: dir.join(format!("{}.mp4", preset.name)),
                    achieved_bitrate_kbps: 100,
                    codec: "h264".to_string(),
                    file_size: 10,
                    width: preset.width,
                    height: preset.height,
                })
            });
        }
        engine.expect_extract_frame().returning(|_, _, _, _| Ok(()));
        let processor = processor(&dir, engine, accepting_storage());

        let outcome = processor.process(&job(), &CancellationToken::new()).await;

        assert_eq!(outcome.result.variants.len(), 4);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancelled_job_is_interrupted() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, engine_for(1080, &[]), accepting_storage());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = processor.process(&job(), &cancel).await;

        assert_eq!(outcome.error, Some(ProcessingError::Interrupted));
        assert_eq!(outcome.state(), JobState::Failed);
    }

    #[tokio::test]
    async fn scratch_directory_is_removed() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, engine_for(720, &[]), accepting_storage());

        processor.process(&job(), &CancellationToken::new()).await;

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn scratch_directory_is_removed_when_a_stage_panics() {
        let dir = TempDir::new().unwrap();
        let engine = ScriptedEngine {
            panic_extraction: true,
            ..Default::default()
        };
        let processor = scripted(&dir, engine, Duration::from_secs(5));

        let caught = AssertUnwindSafe(processor.process(&job(), &CancellationToken::new()))
            .catch_unwind()
            .await;

        assert!(caught.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn stalled_extraction_times_out() {
        let dir = TempDir::new().unwrap();
        let engine = ScriptedEngine {
            stall_extraction: true,
            ..Default::default()
        };
        let processor = scripted(&dir, engine, Duration::from_millis(50));

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            processor.process(&job(), &CancellationToken::new()),
        )
        .await
        .expect("stage timeout did not fire");

        let error = outcome.error.expect("job should fail");
        assert!(error.is_retryable());
        match error {
            ProcessingError::MetadataExtractionFailed(message) => {
                assert!(message.contains("timed out"), "{}", message);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn stalled_variant_times_out_without_blocking_the_others() {
        let dir = TempDir::new().unwrap();
        let engine = ScriptedEngine {
            stall_preset: Some("480p"),
            ..Default::default()
        };
        let processor = scripted(&dir, engine, Duration::from_millis(50));

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            processor.process(&job(), &CancellationToken::new()),
        )
        .await
        .expect("stage timeout did not fire");

        assert_eq!(outcome.state(), JobState::Completed);
        assert!(outcome.is_degraded());
        let names: Vec<_> = outcome.result.variants.iter().map(|v| v.quality.as_str()).collect();
        assert_eq!(names, ["720p", "360p"]);
        assert!(outcome.issues.iter().any(|issue| matches!(
            issue,
            ProcessingError::VariantTranscodeFailed { preset, message }
                if preset == "480p" && message.contains("timed out")
        )));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_variant_is_recorded_as_a_failure() {
        let dir = TempDir::new().unwrap();
        let engine = ScriptedEngine {
            panic_preset: Some("720p"),
            ..Default::default()
        };
        let processor = scripted(&dir, engine, Duration::from_secs(5));

        let outcome = processor.process(&job(), &CancellationToken::new()).await;

        assert_eq!(outcome.state(), JobState::Completed);
        let names: Vec<_> = outcome.result.variants.iter().map(|v| v.quality.as_str()).collect();
        assert_eq!(names, ["480p", "360p"]);
        assert_eq!(
            outcome.issues,
            [ProcessingError::VariantTranscodeFailed {
                preset: "720p".to_string(),
                message: "transcode panicked".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn thumbnail_requests_are_clamped_to_the_limit() {
        let dir = TempDir::new().unwrap();
        let frames = Arc::new(AtomicUsize::new(0));
        let mut engine = MockTranscodingEngine::new();
        engine.expect_probe().returning(|_, _| Ok(metadata(1280, 720)));
        {
            let frames = frames.clone();
            engine.expect_extract_frame().returning(move |_, at, _, _| {
                assert!(at > 0.0 && at < 60.0);
                frames.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        let mut settings = settings(&dir);
        settings.max_thumbnails = 4;
        let processor = JobProcessor::new(Arc::new(engine), Arc::new(accepting_storage()), settings);

        let mut job = job();
        job.options.generate_variants = false;
        job.options.thumbnail_count = u32::MAX;

        let outcome = processor.process(&job, &CancellationToken::new()).await;

        assert_eq!(outcome.state(), JobState::Completed);
        assert_eq!(frames.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.result.thumbnail_urls.len(), 4);
    }

    #[tokio::test]
    async fn manifest_reports_the_encoded_frame_size() {
        let dir = TempDir::new().unwrap();
        let mut engine = MockTranscodingEngine::new();
        engine.expect_probe().returning(|_, _| Ok(metadata(1440, 1080)));
        // 4:3 source keeps its aspect ratio, so widths differ from the catalog
        engine.expect_transcode().returning(|_, preset, _, dir, _| {
            Ok(TranscodeOutput {
                path: dir.join(format!("{}.mp4", preset.name)),
                achieved_bitrate_kbps: preset.video_bitrate_kbps,
                codec: "h264".to_string(),
                file_size: 1000,
                width: preset.height * 4 / 3,
                height: preset.height,
            })
        });
        engine.expect_extract_frame().returning(|_, _, _, _| Ok(()));

        let master = Arc::new(Mutex::new(String::new()));
        let mut storage = MockStorageAdapter::new();
        storage
            .expect_upload_file()
            .returning(|_, path| Ok(format!("https://cdn/{path}")));
        {
            let master = master.clone();
            storage.expect_upload().returning(move |data, path| {
                if path.ends_with("master.m3u8") {
                    *master.lock().unwrap() = String::from_utf8(data).unwrap();
                }
                Ok(format!("https://cdn/{path}"))
            });
        }
        let processor = processor(&dir, engine, storage);

        let outcome = processor.process(&job(), &CancellationToken::new()).await;

        assert!(outcome.result.manifest_url.is_some());
        let master = master.lock().unwrap().clone();
        assert!(master.contains("RESOLUTION=960x720"), "{}", master);
        assert!(master.contains("RESOLUTION=1440x1080"), "{}", master);
        assert!(!master.contains("RESOLUTION=1280x720"), "{}", master);
    }

    #[test]
    fn thumbnails_are_evenly_spaced_inside_the_video() {
        assert_eq!(thumbnail_timestamps(40.0, 3), [10.0, 20.0, 30.0]);
        assert!(thumbnail_timestamps(40.0, 0).is_empty());
    }

    #[test]
    fn video_ids_are_sanitized_for_paths() {
        assert_eq!(sanitize("../v 1"), "___v_1");
    }
}
