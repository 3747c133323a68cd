use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// Audio a stage can consume. When `is_derived` is true, `normalized_path`
/// is a scratch file owned by the run's resource ledger; otherwise it is the
/// caller's own file and must never be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaHandle {
    pub original_path: PathBuf,
    pub normalized_path: PathBuf,
    pub is_derived: bool,
}

impl MediaHandle {
    #[must_use]
    pub fn aliasing(path: PathBuf) -> Self {
        Self {
            normalized_path: path.clone(),
            original_path: path,
            is_derived: false,
        }
    }

    #[must_use]
    pub fn derived(original_path: PathBuf, normalized_path: PathBuf) -> Self {
        Self {
            original_path,
            normalized_path,
            is_derived: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerInterval {
    pub start: f64,
    pub end: f64,
    pub label: String,
}

impl SpeakerInterval {
    #[must_use]
    pub fn new(start: f64, end: f64, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptWord {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub words: Vec<TranscriptWord>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub full_text: String,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Transcribe,
    Translate,
}

impl Task {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transcribe => "transcribe",
            Self::Translate => "translate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub model_id: String,
    /// `None` lets the model detect the language.
    pub source_language: Option<String>,
    pub translate: bool,
    pub want_word_timestamps: bool,
    pub want_diarization: bool,
}

pub const DEFAULT_MODEL_ID: &str = "large-v3";

/// Model identifiers the whisper command line knows about.
pub const KNOWN_MODEL_IDS: [&str; 7] = [
    "tiny", "base", "small", "medium", "large", "large-v2", "large-v3",
];

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_owned(),
            source_language: None,
            translate: false,
            want_word_timestamps: true,
            want_diarization: true,
        }
    }
}

impl PipelineOptions {
    /// Map the user-facing language hint onto an optional language, where
    /// `auto` (any case) or blank means "detect".
    #[must_use]
    pub fn language_from_hint(hint: Option<&str>) -> Option<String> {
        hint.map(str::trim)
            .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("auto"))
            .map(str::to_owned)
    }

    #[must_use]
    pub const fn task(&self) -> Task {
        if self.translate {
            Task::Translate
        } else {
            Task::Transcribe
        }
    }

    #[must_use]
    pub fn transcribe_options(&self) -> TranscribeOptions {
        TranscribeOptions {
            language: self.source_language.clone(),
            task: self.task(),
            word_timestamps: self.want_word_timestamps,
        }
    }
}

/// What the transcription adapter receives for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscribeOptions {
    pub language: Option<String>,
    pub task: Task,
    pub word_timestamps: bool,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of a stage that is allowed to not happen. `Unavailable` means the
/// stage did not run; `Failed` means it ran and errored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum StageOutcome<T> {
    Success(T),
    Unavailable(String),
    Failed(String),
}

impl<T> StageOutcome<T> {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub const fn success(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Unavailable(_) | Self::Failed(_) => None,
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Unavailable(_) => "unavailable",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub transcript: TranscriptResult,
    pub diarization: StageOutcome<Vec<SpeakerInterval>>,
}

impl PipelineResult {
    /// Speaker intervals to align against, if diarization produced any.
    #[must_use]
    pub fn speaker_intervals(&self) -> Option<&[SpeakerInterval]> {
        self.diarization.success().map(Vec::as_slice)
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Diarization,
    Transcription,
}

impl Stage {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Diarization => "diarization",
            Self::Transcription => "transcription",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub current_stage_percent: u8,
    pub overall_percent: u8,
    pub message: String,
}
