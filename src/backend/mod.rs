//! Inference stage adapters.
//!
//! Both models are external collaborators reached through a subprocess. The
//! orchestrator only sees the traits below, which keeps the run logic
//! testable with in-process fakes.

pub mod pyannote;
pub mod whisper;

use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::error::ScribeResult;
use crate::model::{SpeakerInterval, TranscribeOptions, TranscriptResult, TranscriptSegment, TranscriptWord};

/// Containers the diarization model decodes without help.
pub const DIARIZATION_EXTENSIONS: [&str; 4] = ["wav", "mp3", "m4a", "flac"];

/// Containers the transcription model decodes without help.
pub const TRANSCRIPTION_EXTENSIONS: [&str; 10] = [
    "wav", "mp3", "m4a", "flac", "ogg", "webm", "mp4", "mkv", "avi", "mov",
];

// ---------------------------------------------------------------------------
// Transcription
// ---------------------------------------------------------------------------

/// A loaded transcription model.
pub trait TranscriptionModel: Send {
    /// Identifier this instance was loaded for.
    fn model_id(&self) -> &str;

    fn accepted_extensions(&self) -> &'static [&'static str] {
        &TRANSCRIPTION_EXTENSIONS
    }

    /// Transcribe `audio`. Every line of textual progress output is passed to
    /// `on_progress_line` as it arrives; the callback never influences the
    /// result.
    fn transcribe(
        &self,
        audio: &Path,
        options: &TranscribeOptions,
        on_progress_line: &mut dyn FnMut(&str),
    ) -> ScribeResult<TranscriptResult>;
}

/// Creates transcription models on demand.
pub trait TranscriptionLoader: Send + Sync {
    fn load(&self, model_id: &str) -> ScribeResult<Box<dyn TranscriptionModel>>;
}

// ---------------------------------------------------------------------------
// Diarization
// ---------------------------------------------------------------------------

/// A loaded diarization pipeline. It reports no progress of its own.
pub trait DiarizationModel: Send {
    fn accepted_extensions(&self) -> &'static [&'static str] {
        &DIARIZATION_EXTENSIONS
    }

    fn diarize(&self, audio: &Path) -> ScribeResult<Vec<SpeakerInterval>>;
}

/// Why a diarization pipeline could not be loaded. Both cases leave the run
/// without speaker labels; neither stops it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiarizationLoadError {
    #[error("diarization support is not installed: {0}")]
    NotInstalled(String),
    #[error("diarization model could not be loaded: {0}")]
    LoadFailed(String),
}

pub trait DiarizationLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn DiarizationModel>, DiarizationLoadError>;
}

// ---------------------------------------------------------------------------
// JSON transcript extraction
// ---------------------------------------------------------------------------

/// Build a transcript from a whisper-style JSON document.
///
/// Accepts `segments` (or `chunks`) arrays whose entries carry `start`/`end`
/// or a `timestamp: [start, end]` pair, with optional nested `words`. When
/// `text` is absent the full text is the segment texts joined by spaces.
#[must_use]
pub fn transcript_from_json(root: &Value) -> TranscriptResult {
    let segments = root
        .get("segments")
        .or_else(|| root.get("chunks"))
        .and_then(Value::as_array)
        .map(|nodes| segments_from_nodes(nodes))
        .unwrap_or_default();

    let full_text = root
        .get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map_or_else(|| transcript_from_segments(&segments), str::to_owned);

    let language = root
        .get("language")
        .and_then(Value::as_str)
        .filter(|language| !language.trim().is_empty())
        .map(str::to_owned);

    TranscriptResult {
        full_text,
        segments,
        language,
    }
}

pub(crate) fn transcript_from_segments(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|segment| segment.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn segments_from_nodes(nodes: &[Value]) -> Vec<TranscriptSegment> {
    nodes
        .iter()
        .map(|node| {
            let start = node_start(node).unwrap_or(0.0);
            let end = node_end(node).unwrap_or(start).max(start);
            let text = node
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            let words = node
                .get("words")
                .and_then(Value::as_array)
                .map(|words| words_from_nodes(words))
                .unwrap_or_default();
            TranscriptSegment {
                start,
                end,
                text,
                words,
            }
        })
        .collect()
}

fn words_from_nodes(nodes: &[Value]) -> Vec<TranscriptWord> {
    nodes
        .iter()
        .filter_map(|node| {
            let text = node
                .get("word")
                .or_else(|| node.get("text"))
                .and_then(Value::as_str)?;
            if text.trim().is_empty() {
                return None;
            }
            let start = node_start(node)?;
            let end = node_end(node).unwrap_or(start).max(start);
            Some(TranscriptWord {
                start,
                end,
                text: text.to_owned(),
            })
        })
        .collect()
}

fn node_start(node: &Value) -> Option<f64> {
    node.get("start")
        .or_else(|| node.pointer("/timestamp/0"))
        .and_then(number_to_secs)
}

fn node_end(node: &Value) -> Option<f64> {
    node.get("end")
        .or_else(|| node.pointer("/timestamp/1"))
        .and_then(number_to_secs)
}

fn number_to_secs(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_i64().map(|v| v as f64))
}
