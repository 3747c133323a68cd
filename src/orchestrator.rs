//! Pipeline runs: normalization, optional diarization, transcription.
//!
//! An [`Orchestrator`] owns the cached model handles and allows one active
//! run at a time. [`Orchestrator::spawn`] executes a run on a dedicated
//! worker thread and hands progress back through a bounded channel;
//! [`Orchestrator::run`] does the same work on the calling thread.
//!
//! Neither inference call can be interrupted and no timeout is imposed, so a
//! hung model hangs its run. Only the cosmetic diarization progress thread is
//! cancellable.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::align::{AlignmentPolicy, summarize_speakers};
use crate::audio::MediaNormalizer;
use crate::backend::pyannote::PyannoteLoader;
use crate::backend::whisper::WhisperCliLoader;
use crate::backend::{DiarizationLoader, DiarizationModel, TranscriptionLoader, TranscriptionModel};
use crate::error::{ScribeError, ScribeResult};
use crate::ledger::ResourceLedger;
use crate::model::{PipelineOptions, PipelineResult, ProgressEvent, SpeakerInterval, Stage, StageOutcome};
use crate::progress::{
    ProgressAggregator, ProgressSink, ProgressStep, default_diarization_steps, diarization_scale,
    parse_progress_line, spawn_synthetic_progress, transcription_scale,
};

pub const MSG_LOADING_MODELS: &str = "loading models...";
pub const MSG_DIARIZATION_UNAVAILABLE: &str =
    "speaker diarization unavailable, continuing with transcription...";
pub const MSG_DIARIZATION_RUNNING: &str = "performing speaker diarization...";
pub const MSG_DIARIZATION_FAILED: &str = "speaker diarization failed, continuing with transcription...";
pub const MSG_DIARIZATION_COMPLETE: &str = "speaker diarization complete";
pub const MSG_PROCESSING_AUDIO: &str = "processing audio...";
pub const MSG_TRANSCRIPTION_COMPLETE: &str = "transcription complete";

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared one-way flag. Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Normalizing,
    DiarizationAttempt,
    DiarizationSkipped,
    Transcribing,
    Complete,
    Failed,
}

impl PipelineState {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Normalizing => "normalizing",
            Self::DiarizationAttempt => "diarization_attempt",
            Self::DiarizationSkipped => "diarization_skipped",
            Self::Transcribing => "transcribing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// Whether a run may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Complete | Self::Failed, Self::Normalizing)
                | (Self::Normalizing, Self::DiarizationAttempt | Self::DiarizationSkipped | Self::Failed)
                | (Self::DiarizationAttempt | Self::DiarizationSkipped, Self::Transcribing)
                | (Self::Transcribing, Self::Complete | Self::Failed)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Capacity of the progress channel used by [`Orchestrator::spawn`].
    pub channel_capacity: usize,
    /// Steps played back while diarization runs.
    pub diarization_steps: Vec<ProgressStep>,
    /// Speaker lookup policy for consumers of this orchestrator's results.
    pub alignment: AlignmentPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            diarization_steps: default_diarization_steps(),
            alignment: AlignmentPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Model slots
// ---------------------------------------------------------------------------

/// Cached transcription model, keyed by model id.
#[derive(Default)]
struct TranscriptionSlot {
    model: Option<Box<dyn TranscriptionModel>>,
}

impl TranscriptionSlot {
    fn get_or_load(
        &mut self,
        loader: &dyn TranscriptionLoader,
        model_id: &str,
    ) -> ScribeResult<&dyn TranscriptionModel> {
        let cached = self
            .model
            .as_ref()
            .is_some_and(|model| model.model_id() == model_id);
        if !cached {
            if let Some(previous) = self.model.take() {
                tracing::info!(
                    previous = previous.model_id(),
                    next = model_id,
                    "replacing cached transcription model"
                );
            }
            self.model = Some(loader.load(model_id)?);
        }
        self.model.as_deref().ok_or_else(|| {
            ScribeError::TranscriptionFailed(format!("model `{model_id}` did not load"))
        })
    }
}

/// Cached diarization pipeline. The first load attempt decides the slot for
/// the orchestrator's lifetime, including a failed one.
#[derive(Default)]
enum DiarizationSlot {
    #[default]
    Unloaded,
    Ready(Box<dyn DiarizationModel>),
    Unavailable(String),
}

impl DiarizationSlot {
    fn get_or_load(
        &mut self,
        loader: Option<&dyn DiarizationLoader>,
    ) -> Result<&dyn DiarizationModel, String> {
        if matches!(self, Self::Unloaded) {
            *self = match loader {
                None => Self::Unavailable("no diarization backend configured".to_owned()),
                Some(loader) => match loader.load() {
                    Ok(model) => Self::Ready(model),
                    Err(error) => Self::Unavailable(error.to_string()),
                },
            };
        }
        match self {
            Self::Ready(model) => Ok(&**model),
            Self::Unavailable(reason) => Err(reason.clone()),
            Self::Unloaded => Err("diarization model was not loaded".to_owned()),
        }
    }
}

#[derive(Default)]
struct ModelSlots {
    transcription: TranscriptionSlot,
    diarization: DiarizationSlot,
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// What a spawned run sends back to its consumer.
#[derive(Debug)]
pub enum RunMessage {
    Progress(ProgressEvent),
    Finished(ScribeResult<PipelineResult>),
}

/// Consumer side of a spawned run.
pub struct RunHandle {
    receiver: Receiver<RunMessage>,
    worker: Option<JoinHandle<()>>,
}

impl RunHandle {
    /// Next message, blocking. `None` once the worker is gone and the channel
    /// is drained.
    #[must_use]
    pub fn recv(&self) -> Option<RunMessage> {
        self.receiver.recv().ok()
    }

    /// Next message if one is queued.
    #[must_use]
    pub fn try_recv(&self) -> Option<RunMessage> {
        match self.receiver.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drain the run, handing each progress event to `on_progress`, and
    /// return its result.
    pub fn wait(mut self, mut on_progress: impl FnMut(&ProgressEvent)) -> ScribeResult<PipelineResult> {
        let mut outcome = None;
        for message in self.receiver.iter() {
            match message {
                RunMessage::Progress(event) => on_progress(&event),
                RunMessage::Finished(result) => {
                    outcome = Some(result);
                    break;
                }
            }
        }
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!("pipeline worker panicked");
        }
        outcome.unwrap_or_else(|| {
            Err(ScribeError::Io(std::io::Error::other(
                "pipeline worker exited without a result",
            )))
        })
    }
}

struct ChannelSink {
    sender: SyncSender<RunMessage>,
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        // Progress is advisory: a full or closed channel drops the event
        // rather than stalling inference.
        match self.sender.try_send(RunMessage::Progress(event)) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                tracing::debug!("progress channel full; dropping event");
            }
        }
    }
}

/// Marks the orchestrator busy until dropped.
struct ActiveRun {
    inner: Arc<Inner>,
}

impl ActiveRun {
    fn acquire(inner: &Arc<Inner>) -> ScribeResult<Self> {
        inner
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ScribeError::RunInProgress)?;
        Ok(Self {
            inner: Arc::clone(inner),
        })
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.inner.active.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct Inner {
    normalizer: MediaNormalizer,
    transcription_loader: Arc<dyn TranscriptionLoader>,
    diarization_loader: Option<Arc<dyn DiarizationLoader>>,
    config: OrchestratorConfig,
    slots: Mutex<ModelSlots>,
    state: Mutex<PipelineState>,
    active: AtomicBool,
}

/// Sequences pipeline runs and owns the cached model handles. Cloning yields
/// another handle to the same orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        normalizer: MediaNormalizer,
        transcription_loader: Arc<dyn TranscriptionLoader>,
        diarization_loader: Option<Arc<dyn DiarizationLoader>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                normalizer,
                transcription_loader,
                diarization_loader,
                config,
                slots: Mutex::new(ModelSlots::default()),
                state: Mutex::new(PipelineState::Idle),
                active: AtomicBool::new(false),
            }),
        }
    }

    /// ffmpeg, whisper and the pyannote helper, configured from the
    /// environment.
    #[must_use]
    pub fn from_env(config: OrchestratorConfig) -> Self {
        let normalizer = MediaNormalizer::from_env();
        let whisper = WhisperCliLoader::from_env(normalizer.scratch_dir().to_path_buf());
        Self::new(
            normalizer,
            Arc::new(whisper),
            Some(Arc::new(PyannoteLoader::from_env())),
            config,
        )
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn alignment(&self) -> AlignmentPolicy {
        self.inner.config.alignment
    }

    /// State of the current or most recent run.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *lock(&self.inner.state)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Execute a run on the calling thread. Progress goes to `sink`.
    pub fn run(
        &self,
        input: &Path,
        options: &PipelineOptions,
        sink: Arc<dyn ProgressSink>,
    ) -> ScribeResult<PipelineResult> {
        let _active = ActiveRun::acquire(&self.inner)?;
        self.inner.execute(input, options, sink)
    }

    /// Execute a run on a new worker thread. Fails with
    /// [`ScribeError::RunInProgress`] while another run is active.
    pub fn spawn(&self, input: impl Into<PathBuf>, options: PipelineOptions) -> ScribeResult<RunHandle> {
        let active = ActiveRun::acquire(&self.inner)?;
        let input = input.into();
        let capacity = self.inner.config.channel_capacity.max(1);
        let (sender, receiver) = mpsc::sync_channel(capacity);
        let inner = Arc::clone(&self.inner);

        let worker = thread::Builder::new()
            .name("speakerscribe-run".to_owned())
            .spawn(move || {
                let sink: Arc<dyn ProgressSink> = Arc::new(ChannelSink {
                    sender: sender.clone(),
                });
                let result = inner.execute(&input, &options, sink);
                // Free the orchestrator before the consumer can observe the
                // result and try to start another run.
                drop(active);
                if sender.send(RunMessage::Finished(result)).is_err() {
                    tracing::debug!("run consumer went away before the result arrived");
                }
            })?;

        Ok(RunHandle {
            receiver,
            worker: Some(worker),
        })
    }
}

impl Inner {
    fn transition(&self, next: PipelineState) {
        let mut state = lock(&self.state);
        if !state.can_transition_to(next) {
            tracing::warn!(from = %*state, to = %next, "unexpected pipeline transition");
        }
        tracing::info!(from = %*state, to = %next, "pipeline state");
        *state = next;
    }

    fn execute(
        &self,
        input: &Path,
        options: &PipelineOptions,
        sink: Arc<dyn ProgressSink>,
    ) -> ScribeResult<PipelineResult> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("pipeline_run", run_id = %run_id);
        let _entered = span.enter();
        tracing::info!(
            input = %input.display(),
            model = %options.model_id,
            diarization = options.want_diarization,
            task = options.task().as_str(),
            "starting pipeline run"
        );

        let mut ledger = ResourceLedger::new();
        let mut progress = ProgressAggregator::new(sink);
        let result = self.execute_stages(input, options, &mut ledger, &mut progress);
        ledger.release_all();

        match &result {
            Ok(result) => {
                self.transition(PipelineState::Complete);
                for speaker in summarize_speakers(result.speaker_intervals().unwrap_or_default()) {
                    tracing::info!(
                        speaker = %speaker.label,
                        turns = speaker.turns,
                        speaking_sec = speaker.speaking_sec,
                        "speaker summary"
                    );
                }
                tracing::info!(
                    segments = result.transcript.segments.len(),
                    diarization = result.diarization.label(),
                    "pipeline run complete"
                );
            }
            Err(error) => {
                self.transition(PipelineState::Failed);
                tracing::error!(error = %error, error_code = error.error_code(), "pipeline run failed");
            }
        }
        result
    }

    fn execute_stages(
        &self,
        input: &Path,
        options: &PipelineOptions,
        ledger: &mut ResourceLedger,
        progress: &mut ProgressAggregator,
    ) -> ScribeResult<PipelineResult> {
        self.transition(PipelineState::Normalizing);
        if !input.is_file() {
            return Err(ScribeError::InputNotFound(input.to_path_buf()));
        }

        let mut slots = lock(&self.slots);

        let diarization = if options.want_diarization {
            self.transition(PipelineState::DiarizationAttempt);
            self.attempt_diarization(&mut slots.diarization, input, ledger, progress)
        } else {
            self.transition(PipelineState::DiarizationSkipped);
            unavailable("disabled by request")
        };

        self.transition(PipelineState::Transcribing);
        let scale = transcription_scale(diarization.is_success());
        progress.begin_stage(Stage::Transcription, scale, MSG_LOADING_MODELS);

        let model = slots
            .transcription
            .get_or_load(self.transcription_loader.as_ref(), &options.model_id)
            .map_err(transcription_failure)?;
        let media = self
            .normalizer
            .normalize(input, model.accepted_extensions(), ledger)?;

        progress.status(MSG_PROCESSING_AUDIO);
        let transcript = model
            .transcribe(
                &media.normalized_path,
                &options.transcribe_options(),
                &mut |line| match parse_progress_line(line) {
                    Some(parsed) => progress.report(parsed.percent, &parsed.status_message()),
                    None => tracing::debug!(stage = "transcription", line, "model output"),
                },
            )
            .map_err(transcription_failure)?;
        progress.complete_stage(MSG_TRANSCRIPTION_COMPLETE);

        Ok(PipelineResult {
            transcript,
            diarization,
        })
    }

    /// Never fails the run: every problem becomes a non-success outcome.
    fn attempt_diarization(
        &self,
        slot: &mut DiarizationSlot,
        input: &Path,
        ledger: &mut ResourceLedger,
        progress: &mut ProgressAggregator,
    ) -> StageOutcome<Vec<SpeakerInterval>> {
        let scale = diarization_scale();
        progress.begin_stage(Stage::Diarization, scale, MSG_LOADING_MODELS);

        let model = match slot.get_or_load(self.diarization_loader.as_deref()) {
            Ok(model) => model,
            Err(reason) => {
                tracing::warn!(stage = "diarization", reason = %reason, "speaker diarization unavailable");
                progress.status(MSG_DIARIZATION_UNAVAILABLE);
                return unavailable(&reason);
            }
        };

        let media = match self
            .normalizer
            .normalize(input, model.accepted_extensions(), ledger)
        {
            Ok(media) => media,
            Err(error) => {
                tracing::warn!(stage = "diarization", error = %error, "could not prepare audio for diarization");
                progress.status(MSG_DIARIZATION_FAILED);
                return StageOutcome::Failed(error.to_string());
            }
        };

        progress.status(MSG_DIARIZATION_RUNNING);
        let token = CancellationToken::new();
        let generator = spawn_synthetic_progress(
            self.config.diarization_steps.clone(),
            Stage::Diarization,
            scale,
            progress.sink(),
            token.clone(),
        )
        .map_err(|error| {
            tracing::debug!(error = %error, "synthetic progress thread did not start");
        })
        .ok();

        let outcome = model.diarize(&media.normalized_path);

        token.cancel();
        if let Some(generator) = generator {
            match generator.join() {
                Ok(highest) => progress.absorb(highest),
                Err(_) => tracing::debug!("synthetic progress thread panicked"),
            }
        }

        match outcome {
            Ok(intervals) => {
                tracing::info!(stage = "diarization", turns = intervals.len(), "speaker diarization complete");
                progress.complete_stage(MSG_DIARIZATION_COMPLETE);
                StageOutcome::Success(intervals)
            }
            Err(error) => {
                tracing::warn!(stage = "diarization", error = %error, "speaker diarization failed");
                progress.status(MSG_DIARIZATION_FAILED);
                StageOutcome::Failed(error.to_string())
            }
        }
    }
}

/// Everything that goes wrong while loading or running the transcription
/// model is reported as a transcription failure.
fn transcription_failure(error: ScribeError) -> ScribeError {
    match error {
        ScribeError::TranscriptionFailed(_) => error,
        other => ScribeError::TranscriptionFailed(other.to_string()),
    }
}

fn unavailable(reason: &str) -> StageOutcome<Vec<SpeakerInterval>> {
    StageOutcome::Unavailable(ScribeError::DiarizationUnavailable(reason.to_owned()).to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_clones_share_the_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn happy_path_transitions_are_allowed() {
        use PipelineState::*;
        for (from, to) in [
            (Idle, Normalizing),
            (Normalizing, DiarizationAttempt),
            (Normalizing, DiarizationSkipped),
            (DiarizationAttempt, Transcribing),
            (DiarizationSkipped, Transcribing),
            (Transcribing, Complete),
            (Complete, Normalizing),
        ] {
            assert!(from.can_transition_to(to), "{from} -> {to}");
        }
    }

    #[test]
    fn failure_is_only_reachable_from_normalizing_or_transcribing() {
        use PipelineState::*;
        assert!(Normalizing.can_transition_to(Failed));
        assert!(Transcribing.can_transition_to(Failed));
        assert!(!DiarizationAttempt.can_transition_to(Failed));
        assert!(!Idle.can_transition_to(Transcribing));
        assert!(!Complete.can_transition_to(Transcribing));
    }

    #[test]
    fn default_config_uses_documented_constants() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.diarization_steps.len(), 5);
        assert!((config.alignment.tolerance_sec - 0.8).abs() < f64::EPSILON);
        assert!(config.channel_capacity > 0);
    }

    #[test]
    fn unconfigured_diarization_slot_caches_unavailability() {
        let mut slot = DiarizationSlot::default();
        let first = slot.get_or_load(None).err().unwrap();
        assert!(first.contains("no diarization backend"));
        assert!(matches!(slot, DiarizationSlot::Unavailable(_)));
    }

    #[test]
    fn stage_errors_become_transcription_failures() {
        let missing = transcription_failure(ScribeError::CommandMissing {
            command: "whisper".to_owned(),
        });
        assert_eq!(missing.error_code(), "SS-TRANSCRIPTION-FAILED");
        assert!(missing.to_string().contains("whisper"));

        let json = serde_json::from_str::<serde_json::Value>("{truncated").unwrap_err();
        assert!(matches!(
            transcription_failure(ScribeError::Json(json)),
            ScribeError::TranscriptionFailed(_)
        ));

        let original = ScribeError::TranscriptionFailed("model crashed".to_owned());
        assert_eq!(
            transcription_failure(original).to_string(),
            "transcription failed: model crashed"
        );
    }

    #[test]
    fn unavailable_reason_carries_the_error_message() {
        let StageOutcome::Unavailable(reason) = unavailable("No module named 'pyannote'") else {
            panic!("expected unavailable");
        };
        assert_eq!(reason, "speaker diarization unavailable: No module named 'pyannote'");
    }

    #[test]
    fn label_matches_serde_name() {
        for state in [
            PipelineState::Idle,
            PipelineState::DiarizationAttempt,
            PipelineState::DiarizationSkipped,
            PipelineState::Failed,
        ] {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, serde_json::Value::String(state.label().to_owned()));
        }
    }
}
