#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use speakerscribe::audio::MediaNormalizer;
use speakerscribe::backend::{
    DiarizationLoadError, DiarizationLoader, DiarizationModel, TranscriptionLoader,
    TranscriptionModel,
};
use speakerscribe::model::{
    ProgressEvent, SpeakerInterval, TranscribeOptions, TranscriptResult, TranscriptSegment,
};
use speakerscribe::orchestrator::{Orchestrator, OrchestratorConfig};
use speakerscribe::progress::{ProgressSink, ProgressStep};
use speakerscribe::{ScribeError, ScribeResult};

/// Create an empty file called `name` inside `dir`.
pub fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"not really media").expect("write input fixture");
    path
}

/// Write an executable shell script standing in for ffmpeg.
#[cfg(unix)]
pub fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
    fake_tool(dir, "fake-ffmpeg", body)
}

/// Write an executable shell script called `name` into `dir`.
#[cfg(unix)]
pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake tool");
    let mut perms = std::fs::metadata(&path).expect("stat").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod");
    path
}

/// ffmpeg stand-in that writes a wav header to its last argument.
#[cfg(unix)]
pub fn working_ffmpeg(dir: &Path) -> PathBuf {
    fake_ffmpeg(dir, "for last; do :; done\nprintf 'RIFF' > \"$last\"")
}

/// ffmpeg stand-in that leaves a partial output behind and fails.
#[cfg(unix)]
pub fn broken_ffmpeg(dir: &Path) -> PathBuf {
    fake_ffmpeg(
        dir,
        "for last; do :; done\nprintf 'partial' > \"$last\"\necho 'Invalid data found' 1>&2\nexit 1",
    )
}

pub fn segment(start: f64, end: f64, text: &str) -> TranscriptSegment {
    TranscriptSegment {
        start,
        end,
        text: text.to_owned(),
        words: Vec::new(),
    }
}

pub fn hello_world_transcript() -> TranscriptResult {
    TranscriptResult {
        full_text: "hello world".to_owned(),
        segments: vec![segment(0.0, 2.0, " hello"), segment(2.0, 4.5, " world")],
        language: Some("en".to_owned()),
    }
}

pub fn two_speaker_turns() -> Vec<SpeakerInterval> {
    vec![
        SpeakerInterval::new(0.0, 1.9, "SPEAKER_00"),
        SpeakerInterval::new(1.9, 5.0, "SPEAKER_01"),
    ]
}

/// Steps short enough to keep tests fast.
pub fn quick_steps() -> Vec<ProgressStep> {
    vec![
        ProgressStep::new("loading", 0, 0.0),
        ProgressStep::new("segmentation", 20, 0.01),
        ProgressStep::new("finalizing", 96, 0.0),
    ]
}

pub fn quick_config() -> OrchestratorConfig {
    OrchestratorConfig {
        diarization_steps: quick_steps(),
        ..OrchestratorConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().expect("sink lock").clone()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().expect("sink lock").push(event);
    }
}

// ---------------------------------------------------------------------------
// Transcription fakes
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum TranscriptionScript {
    Succeed(TranscriptResult),
    Fail(String),
}

/// Loader whose models replay fixed progress lines and a scripted result.
#[derive(Clone)]
pub struct FakeTranscriptionLoader {
    pub script: TranscriptionScript,
    pub progress_lines: Vec<String>,
    pub loads: Arc<AtomicUsize>,
    pub seen_audio: Arc<Mutex<Vec<(PathBuf, bool)>>>,
    pub accepted: &'static [&'static str],
}

impl FakeTranscriptionLoader {
    pub fn succeeding(result: TranscriptResult) -> Self {
        Self {
            script: TranscriptionScript::Succeed(result),
            progress_lines: vec![
                "Detecting language using up to the first 30 seconds.".to_owned(),
                " 10%|#         | 61/612 [00:00<00:04, 120.00frames/s]".to_owned(),
                " 60%|######    | 367/612 [00:02<00:01, 120.00frames/s]".to_owned(),
                "100%|##########| 612/612 [00:04<00:00, 120.00frames/s]".to_owned(),
            ],
            loads: Arc::new(AtomicUsize::new(0)),
            seen_audio: Arc::new(Mutex::new(Vec::new())),
            accepted: &speakerscribe::backend::TRANSCRIPTION_EXTENSIONS,
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            script: TranscriptionScript::Fail(reason.to_owned()),
            ..Self::succeeding(TranscriptResult::default())
        }
    }

    pub fn accepting(mut self, accepted: &'static [&'static str]) -> Self {
        self.accepted = accepted;
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Audio paths handed to `transcribe`, with whether each existed then.
    pub fn seen_audio(&self) -> Vec<(PathBuf, bool)> {
        self.seen_audio.lock().expect("seen lock").clone()
    }
}

impl TranscriptionLoader for FakeTranscriptionLoader {
    fn load(&self, model_id: &str) -> ScribeResult<Box<dyn TranscriptionModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTranscriber {
            model_id: model_id.to_owned(),
            loader: self.clone(),
        }))
    }
}

pub struct FakeTranscriber {
    model_id: String,
    loader: FakeTranscriptionLoader,
}

impl TranscriptionModel for FakeTranscriber {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn accepted_extensions(&self) -> &'static [&'static str] {
        self.loader.accepted
    }

    fn transcribe(
        &self,
        audio: &Path,
        _options: &TranscribeOptions,
        on_progress_line: &mut dyn FnMut(&str),
    ) -> ScribeResult<TranscriptResult> {
        self.loader
            .seen_audio
            .lock()
            .expect("seen lock")
            .push((audio.to_path_buf(), audio.exists()));
        for line in &self.loader.progress_lines {
            on_progress_line(line);
        }
        match &self.loader.script {
            TranscriptionScript::Succeed(result) => Ok(result.clone()),
            TranscriptionScript::Fail(reason) => Err(ScribeError::TranscriptionFailed(reason.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// Diarization fakes
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum DiarizationScript {
    Succeed(Vec<SpeakerInterval>),
    NotInstalled,
    LoadFails,
    RuntimeFails,
}

#[derive(Clone)]
pub struct FakeDiarizationLoader {
    pub script: DiarizationScript,
    pub loads: Arc<AtomicUsize>,
    pub seen_audio: Arc<Mutex<Vec<(PathBuf, bool)>>>,
    /// When set, `diarize` blocks until a message arrives.
    pub gate: Option<Arc<Mutex<Receiver<()>>>>,
}

impl FakeDiarizationLoader {
    pub fn new(script: DiarizationScript) -> Self {
        Self {
            script,
            loads: Arc::new(AtomicUsize::new(0)),
            seen_audio: Arc::new(Mutex::new(Vec::new())),
            gate: None,
        }
    }

    /// A loader whose `diarize` waits for the returned sender.
    pub fn gated(script: DiarizationScript) -> (Self, Sender<()>) {
        let (sender, receiver) = std::sync::mpsc::channel();
        let mut loader = Self::new(script);
        loader.gate = Some(Arc::new(Mutex::new(receiver)));
        (loader, sender)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn seen_audio(&self) -> Vec<(PathBuf, bool)> {
        self.seen_audio.lock().expect("seen lock").clone()
    }
}

impl DiarizationLoader for FakeDiarizationLoader {
    fn load(&self) -> Result<Box<dyn DiarizationModel>, DiarizationLoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match self.script {
            DiarizationScript::NotInstalled => Err(DiarizationLoadError::NotInstalled(
                "No module named 'pyannote'".to_owned(),
            )),
            DiarizationScript::LoadFails => Err(DiarizationLoadError::LoadFailed(
                "401 Client Error: Unauthorized".to_owned(),
            )),
            DiarizationScript::Succeed(_) | DiarizationScript::RuntimeFails => {
                Ok(Box::new(FakeDiarizer {
                    loader: self.clone(),
                }))
            }
        }
    }
}

pub struct FakeDiarizer {
    loader: FakeDiarizationLoader,
}

impl DiarizationModel for FakeDiarizer {
    fn diarize(&self, audio: &Path) -> ScribeResult<Vec<SpeakerInterval>> {
        self.loader
            .seen_audio
            .lock()
            .expect("seen lock")
            .push((audio.to_path_buf(), audio.exists()));
        if let Some(gate) = &self.loader.gate {
            let _ = gate.lock().expect("gate lock").recv();
        }
        match &self.loader.script {
            DiarizationScript::Succeed(intervals) => Ok(intervals.clone()),
            _ => Err(ScribeError::DiarizationFailed("CUDA out of memory".to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrators
// ---------------------------------------------------------------------------

pub fn orchestrator(
    normalizer: MediaNormalizer,
    transcription: &FakeTranscriptionLoader,
    diarization: Option<&FakeDiarizationLoader>,
) -> Orchestrator {
    Orchestrator::new(
        normalizer,
        Arc::new(transcription.clone()),
        diarization.map(|loader| Arc::new(loader.clone()) as Arc<dyn DiarizationLoader>),
        quick_config(),
    )
}

/// Normalizer whose transcoder does not exist; any transcode fails.
pub fn no_ffmpeg(scratch: &Path) -> MediaNormalizer {
    MediaNormalizer::new("nonexistent_ffmpeg_for_tests", scratch)
}

pub fn scratch_entries(scratch: &Path) -> usize {
    std::fs::read_dir(scratch).map_or(0, Iterator::count)
}
