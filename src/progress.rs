//! Unified progress across the two inference stages.
//!
//! Producers report a within-stage percentage; the aggregator maps it onto
//! the overall 0–100 scale using a fixed weighting and keeps both numbers
//! monotonic inside a stage. Consumers see only [`ProgressEvent`]s.

use std::sync::{Arc, LazyLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{ProgressEvent, Stage};
use crate::orchestrator::CancellationToken;

/// Destination for progress events. Implementations must be cheap and must
/// not block for long: both the pipeline worker and the synthetic progress
/// thread call into it.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

// ---------------------------------------------------------------------------
// Weighting
// ---------------------------------------------------------------------------

/// The slice of the overall scale a stage's 0–100 progress maps onto.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageScale {
    pub floor: f64,
    pub ceiling: f64,
}

impl StageScale {
    pub const FULL: Self = Self {
        floor: 0.0,
        ceiling: 100.0,
    };
    pub const FIRST_HALF: Self = Self {
        floor: 0.0,
        ceiling: 50.0,
    };
    pub const SECOND_HALF: Self = Self {
        floor: 50.0,
        ceiling: 100.0,
    };

    /// Overall percentage for a within-stage percentage.
    #[must_use]
    pub fn overall(self, stage_percent: u8) -> u8 {
        let fraction = f64::from(stage_percent.min(100)) / 100.0;
        let value = self.floor + (self.ceiling - self.floor) * fraction;
        value.round().clamp(0.0, 100.0) as u8
    }
}

/// Diarization, when attempted, owns the first half of the overall scale.
#[must_use]
pub const fn diarization_scale() -> StageScale {
    StageScale::FIRST_HALF
}

/// Transcription gets the second half only when diarization actually
/// produced a result; a skipped or failed diarization does not waste half
/// the bar.
#[must_use]
pub const fn transcription_scale(diarization_usable: bool) -> StageScale {
    if diarization_usable {
        StageScale::SECOND_HALF
    } else {
        StageScale::FULL
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

pub struct ProgressAggregator {
    sink: Arc<dyn ProgressSink>,
    stage: Stage,
    scale: StageScale,
    current: u8,
    overall: u8,
}

impl ProgressAggregator {
    #[must_use]
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            stage: Stage::Diarization,
            scale: StageScale::FULL,
            current: 0,
            overall: 0,
        }
    }

    /// Shared handle on the sink, for producers running on other threads.
    #[must_use]
    pub fn sink(&self) -> Arc<dyn ProgressSink> {
        Arc::clone(&self.sink)
    }

    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    #[must_use]
    pub const fn scale(&self) -> StageScale {
        self.scale
    }

    #[must_use]
    pub const fn current_percent(&self) -> u8 {
        self.current
    }

    #[must_use]
    pub const fn overall_percent(&self) -> u8 {
        self.overall
    }

    /// Enter `stage`, resetting the current-stage percentage to 0.
    pub fn begin_stage(&mut self, stage: Stage, scale: StageScale, message: &str) {
        self.stage = stage;
        self.scale = scale;
        self.current = 0;
        self.overall = scale.overall(0);
        self.publish(message);
    }

    /// Report within-stage progress. Values below what was already reported
    /// for this stage are ignored.
    pub fn report(&mut self, stage_percent: u8, message: &str) {
        let stage_percent = stage_percent.min(100);
        if stage_percent < self.current {
            return;
        }
        self.current = stage_percent;
        self.overall = self.overall.max(self.scale.overall(stage_percent));
        self.publish(message);
    }

    /// Take in progress that another producer already published for the
    /// current stage, without emitting anything.
    pub fn absorb(&mut self, stage_percent: u8) {
        let stage_percent = stage_percent.min(100);
        if stage_percent > self.current {
            self.current = stage_percent;
            self.overall = self.overall.max(self.scale.overall(stage_percent));
        }
    }

    /// Re-publish the current numbers with a new status message.
    pub fn status(&mut self, message: &str) {
        self.publish(message);
    }

    pub fn complete_stage(&mut self, message: &str) {
        self.report(100, message);
    }

    fn publish(&self, message: &str) {
        self.sink.emit(ProgressEvent {
            stage: self.stage,
            current_stage_percent: self.current,
            overall_percent: self.overall,
            message: message.to_owned(),
        });
    }
}

// ---------------------------------------------------------------------------
// Consumer-side view
// ---------------------------------------------------------------------------

/// What a UI should display, folded from a stream of events.
///
/// Within a stage both percentages only move forward, so a late event from
/// the synthetic generator is a harmless no-op. A new stage resets the view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressTracker {
    pub stage: Option<Stage>,
    pub current_stage_percent: u8,
    pub overall_percent: u8,
    pub message: String,
}

impl ProgressTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `event` in. Returns whether anything visible changed.
    pub fn observe(&mut self, event: &ProgressEvent) -> bool {
        let before = self.clone();
        if self.stage == Some(event.stage) {
            self.current_stage_percent = self.current_stage_percent.max(event.current_stage_percent);
            self.overall_percent = self.overall_percent.max(event.overall_percent);
        } else {
            self.stage = Some(event.stage);
            self.current_stage_percent = event.current_stage_percent;
            self.overall_percent = event.overall_percent;
        }
        if !event.message.is_empty() {
            self.message.clone_from(&event.message);
        }
        *self != before
    }
}

// ---------------------------------------------------------------------------
// Transcription progress parsing
// ---------------------------------------------------------------------------

static PERCENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3})%\s*\|").expect("valid percent pattern"));
static UNITS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)/(\d+)").expect("valid units pattern"));

/// One parsed progress-bar line from the transcription model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressLine {
    pub percent: u8,
    /// `(processed, total)` frame counts when the line carries them.
    pub frames: Option<(u64, u64)>,
}

impl ProgressLine {
    #[must_use]
    pub fn status_message(&self) -> String {
        match self.frames {
            Some((current, total)) => format!(
                "processing audio... ({current}/{total} frames, {}%)",
                self.percent
            ),
            None => format!("processing audio... ({}%)", self.percent),
        }
    }
}

/// Extract progress from a free-form log line such as
/// `45%|████▌     | 275/612 [00:01<00:02, 327.88frames/s]`.
///
/// Anything that does not look like a progress bar yields `None`.
#[must_use]
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let captures = PERCENT_PATTERN.captures(line)?;
    let percent: u8 = captures.get(1)?.as_str().parse().ok()?;
    if percent > 100 {
        return None;
    }

    let frames = if line.contains("frames/s") {
        UNITS_PATTERN.captures(line).and_then(|units| {
            let current = units.get(1)?.as_str().parse().ok()?;
            let total = units.get(2)?.as_str().parse().ok()?;
            Some((current, total))
        })
    } else {
        None
    };

    Some(ProgressLine { percent, frames })
}

// ---------------------------------------------------------------------------
// Synthetic progress
// ---------------------------------------------------------------------------

/// One cosmetic step played back while a stage with no native progress runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressStep {
    pub label: String,
    pub stage_percent: u8,
    pub duration: Duration,
}

impl ProgressStep {
    #[must_use]
    pub fn new(label: impl Into<String>, stage_percent: u8, duration_sec: f64) -> Self {
        Self {
            label: label.into(),
            stage_percent,
            duration: Duration::from_secs_f64(duration_sec),
        }
    }
}

/// Step timings for the diarization stage. Empirical; they only shape how
/// the bar moves while pyannote works.
#[must_use]
pub fn default_diarization_steps() -> Vec<ProgressStep> {
    vec![
        ProgressStep::new("speaker diarization: loading models...", 0, 0.5),
        ProgressStep::new("speaker diarization: segmentation...", 20, 1.0),
        ProgressStep::new("speaker diarization: embeddings...", 50, 2.0),
        ProgressStep::new("speaker diarization: clustering...", 80, 1.0),
        ProgressStep::new("speaker diarization: finalizing...", 96, 0.5),
    ]
}

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Play `steps` on a background thread until they run out or `token` is
/// cancelled. The thread never blocks the stage it decorates. Joining it
/// yields the highest within-stage percentage it emitted.
pub fn spawn_synthetic_progress(
    steps: Vec<ProgressStep>,
    stage: Stage,
    scale: StageScale,
    sink: Arc<dyn ProgressSink>,
    token: CancellationToken,
) -> std::io::Result<JoinHandle<u8>> {
    thread::Builder::new()
        .name(format!("{stage}-progress"))
        .spawn(move || {
            let mut highest = 0_u8;
            for step in steps {
                if token.is_cancelled() {
                    break;
                }
                let percent = step.stage_percent.min(100).max(highest);
                highest = percent;
                sink.emit(ProgressEvent {
                    stage,
                    current_stage_percent: percent,
                    overall_percent: scale.overall(percent),
                    message: step.label,
                });
                if !sleep_unless_cancelled(step.duration, &token) {
                    break;
                }
            }
            tracing::debug!(stage = %stage, highest, "synthetic progress stopped");
            highest
        })
}

/// Sleep for `duration` in short slices. Returns `false` if cancelled.
fn sleep_unless_cancelled(duration: Duration, token: &CancellationToken) -> bool {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if token.is_cancelled() {
            return false;
        }
        let slice = remaining.min(CANCEL_POLL_INTERVAL);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
    !token.is_cancelled()
}
