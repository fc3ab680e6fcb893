//! Fake collaborators and a harness over an in-memory store.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use narrate_media::{
    BackgroundProvider, ClipRenderer, DurationProbe, MediaError, MediaResult, SpeechRequest,
    SpeechSynthesizer,
};
use narrate_models::{EncodingConfig, Project, ProjectConfig, Resolution};
use narrate_store::Database;
use narrate_worker::{Collaborators, PipelineContext, PipelineService, Scheduler, WorkerConfig};

async fn write_file(path: &Path, contents: &[u8]) -> MediaResult<PathBuf> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(path.to_path_buf())
}

/// Writes the request text as "audio"; fails (or panics) for texts
/// containing a marker.
#[derive(Default)]
pub struct FakeSpeech {
    pub calls: AtomicUsize,
    fail_marker: Mutex<Option<String>>,
    panic_marker: Mutex<Option<String>>,
}

impl FakeSpeech {
    pub fn fail_on(&self, marker: Option<&str>) {
        *self.fail_marker.lock().unwrap() = marker.map(str::to_string);
    }

    pub fn panic_on(&self, marker: Option<&str>) {
        *self.panic_marker.lock().unwrap() = marker.map(str::to_string);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(&self, request: &SpeechRequest, output: &Path) -> MediaResult<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let marker = self.fail_marker.lock().unwrap().clone();
        if marker.is_some_and(|m| request.text.contains(&m)) {
            return Err(MediaError::speech_failed("service unavailable", None, Some(1)));
        }
        let marker = self.panic_marker.lock().unwrap().clone();
        if let Some(m) = marker.filter(|m| request.text.contains(m.as_str())) {
            panic!("speech engine crashed on {:?}", m);
        }
        write_file(output, request.text.as_bytes()).await
    }
}

/// Records every render and writes placeholder files.
#[derive(Default)]
pub struct FakeRenderer {
    renders: Mutex<Vec<PathBuf>>,
    pub concats: AtomicUsize,
    failing_concats: AtomicUsize,
}

impl FakeRenderer {
    pub fn renders(&self) -> Vec<PathBuf> {
        self.renders.lock().unwrap().clone()
    }

    /// Make the next `n` concatenations fail like a bad ffmpeg run.
    pub fn fail_next_concats(&self, n: usize) {
        self.failing_concats.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClipRenderer for FakeRenderer {
    async fn render_clip(
        &self,
        audio: &Path,
        image: &Path,
        output: &Path,
        _fps: u32,
        _encoding: &EncodingConfig,
    ) -> MediaResult<PathBuf> {
        for input in [audio, image] {
            if !input.exists() {
                return Err(MediaError::FileNotFound(input.to_path_buf()));
            }
        }
        self.renders.lock().unwrap().push(output.to_path_buf());
        write_file(output, b"clip").await
    }

    async fn concatenate(&self, clips: &[PathBuf], output: &Path) -> MediaResult<PathBuf> {
        for clip in clips {
            if !clip.exists() {
                return Err(MediaError::FileNotFound(clip.clone()));
            }
        }
        let failing = self
            .failing_concats
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(MediaError::ffmpeg_failed("concat demuxer error", None, Some(1)));
        }
        self.concats.fetch_add(1, Ordering::SeqCst);
        write_file(output, b"video").await
    }
}

pub struct FakeBackground;

#[async_trait]
impl BackgroundProvider for FakeBackground {
    async fn generate(&self, title: &str, _: Resolution, output: &Path) -> MediaResult<PathBuf> {
        write_file(output, title.as_bytes()).await
    }

    async fn resize_custom(&self, source: &Path, _: Resolution, output: &Path) -> MediaResult<PathBuf> {
        let bytes = tokio::fs::read(source).await?;
        write_file(output, &bytes).await
    }
}

/// Every audio file lasts the same number of seconds.
pub struct FixedDuration(pub f64);

#[async_trait]
impl DurationProbe for FixedDuration {
    async fn duration(&self, _: &Path) -> MediaResult<f64> {
        Ok(self.0)
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub ctx: Arc<PipelineContext>,
    pub scheduler: Arc<Scheduler>,
    pub service: PipelineService,
    pub speech: Arc<FakeSpeech>,
    pub renderer: Arc<FakeRenderer>,
}

impl Harness {
    /// Harness whose audio chunks each last five seconds.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut WorkerConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = WorkerConfig::rooted_at(dir.path());
        config.detect_hardware = false;
        config.poll_interval = Duration::from_millis(10);
        config.tts_retry_base_delay = Duration::from_millis(1);
        config.shutdown_timeout = Duration::from_secs(5);
        adjust(&mut config);

        let speech = Arc::new(FakeSpeech::default());
        let renderer = Arc::new(FakeRenderer::default());
        let collaborators = Collaborators {
            speech: speech.clone(),
            renderer: renderer.clone(),
            background: Arc::new(FakeBackground),
            durations: Arc::new(FixedDuration(5.0)),
        };

        let db = Database::open_in_memory().unwrap();
        let ctx = Arc::new(PipelineContext::new(config, db, collaborators));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&ctx)));
        let service = PipelineService::new(Arc::clone(&ctx), Arc::clone(&scheduler));

        Self {
            dir,
            ctx,
            scheduler,
            service,
            speech,
            renderer,
        }
    }

    /// Project config that splits each short paragraph into its own chunk.
    pub fn small_chunks() -> ProjectConfig {
        ProjectConfig::default()
            .with_max_chunk_bytes(24)
            .with_target_duration(10.0)
    }

    /// Project with one chunk per paragraph (paragraphs of 13 to 24 bytes).
    pub async fn project(&self, name: &str, paragraphs: &[&str]) -> Project {
        self.service
            .create_project(name, None, &paragraphs.join("\n"), Self::small_chunks())
            .await
            .unwrap()
    }

    /// Start dispatching and wait until every submitted job has finished.
    pub async fn run_jobs(&self) {
        self.scheduler.start();
        tokio::time::timeout(Duration::from_secs(10), self.scheduler.wait_idle())
            .await
            .expect("jobs did not finish in time");
    }
}
