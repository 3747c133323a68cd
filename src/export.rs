//! Rendering a [`PipelineResult`] into text, JSON and subtitle files.
//!
//! Every format is derived from the same segment list. Speaker labels are
//! resolved through the alignment engine at the segment (or word) start and
//! only appear when diarization succeeded.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::align::AlignmentPolicy;
use crate::error::{ScribeError, ScribeResult};
use crate::model::{PipelineResult, TranscriptSegment};

/// Layout of the plain-text export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextStyle {
    /// `[0:00:00 - 0:00:02] [SPK] text`, one line per segment.
    #[default]
    Timestamped,
    /// Like `Timestamped`, with runs of whitespace collapsed.
    Clean,
    /// Segment header, one line per word, then the full segment.
    Detailed,
    /// Only the full transcript text.
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Text(TextStyle),
    Json,
    Srt,
    Vtt,
}

impl ExportFormat {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Json => "json",
            Self::Srt => "srt",
            Self::Vtt => "vtt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTarget {
    pub format: ExportFormat,
    pub path: PathBuf,
}

impl ExportTarget {
    #[must_use]
    pub fn new(format: ExportFormat, path: impl Into<PathBuf>) -> Self {
        Self {
            format,
            path: path.into(),
        }
    }
}

/// Per-target outcome of [`export_all`].
#[derive(Debug)]
pub struct ExportReport {
    pub target: ExportTarget,
    pub outcome: ScribeResult<()>,
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Whole seconds as `H:MM:SS`, hours unpadded, fractions truncated.
#[must_use]
pub fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.trunc() as u64
    } else {
        0
    };
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    format!("{h}:{m:02}:{s:02}")
}

/// `HH:MM:SS,mmm`.
#[must_use]
pub fn format_srt_timestamp(seconds: f64) -> String {
    subtitle_timestamp(seconds, ',')
}

/// `HH:MM:SS.mmm`.
#[must_use]
pub fn format_vtt_timestamp(seconds: f64) -> String {
    subtitle_timestamp(seconds, '.')
}

fn subtitle_timestamp(seconds: f64, separator: char) -> String {
    let total_ms = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    };
    let h = total_ms / 3_600_000;
    let m = (total_ms % 3_600_000) / 60_000;
    let s = (total_ms % 60_000) / 1000;
    let ms = total_ms % 1000;
    format!("{h:02}:{m:02}:{s:02}{separator}{ms:03}")
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Renders one result. Speaker lookups use `policy`; labels can be turned
/// off entirely with [`TranscriptRenderer::without_speaker_labels`].
#[derive(Debug, Clone, Copy)]
pub struct TranscriptRenderer<'a> {
    result: &'a PipelineResult,
    policy: AlignmentPolicy,
    speaker_labels: bool,
}

impl<'a> TranscriptRenderer<'a> {
    #[must_use]
    pub fn new(result: &'a PipelineResult) -> Self {
        Self {
            result,
            policy: AlignmentPolicy::default(),
            speaker_labels: true,
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: AlignmentPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn without_speaker_labels(mut self) -> Self {
        self.speaker_labels = false;
        self
    }

    /// Speaker at `timestamp`, or `None` when diarization did not succeed.
    #[must_use]
    pub fn speaker_at(&self, timestamp: f64) -> Option<&'a str> {
        if !self.speaker_labels {
            return None;
        }
        let intervals = self.result.speaker_intervals()?;
        self.policy.speaker_at(intervals, timestamp)
    }

    fn prefix_at(&self, timestamp: f64) -> String {
        self.speaker_at(timestamp)
            .map(|speaker| format!("[{speaker}] "))
            .unwrap_or_default()
    }

    fn segments(&self) -> &'a [TranscriptSegment] {
        &self.result.transcript.segments
    }

    pub fn render(&self, format: ExportFormat) -> ScribeResult<String> {
        match format {
            ExportFormat::Text(style) => Ok(self.text(style)),
            ExportFormat::Json => self.json(),
            ExportFormat::Srt => Ok(self.srt()),
            ExportFormat::Vtt => Ok(self.vtt()),
        }
    }

    /// Plain-text export. Falls back to the full text when there are no
    /// segments to lay out.
    #[must_use]
    pub fn text(&self, style: TextStyle) -> String {
        if style == TextStyle::Plain || self.segments().is_empty() {
            return self.result.transcript.full_text.trim().to_owned();
        }

        let mut lines = Vec::with_capacity(self.segments().len());
        for segment in self.segments() {
            let range = format!(
                "[{} - {}]",
                format_clock(segment.start),
                format_clock(segment.end)
            );
            let prefix = self.prefix_at(segment.start);
            match style {
                TextStyle::Timestamped | TextStyle::Plain => {
                    lines.push(format!("{range} {prefix}{}", segment.text.trim()));
                }
                TextStyle::Clean => {
                    lines.push(format!("{range} {prefix}{}", collapse_whitespace(&segment.text)));
                }
                TextStyle::Detailed => self.detailed_block(segment, &range, &prefix, &mut lines),
            }
        }
        lines.join("\n")
    }

    fn detailed_block(
        &self,
        segment: &TranscriptSegment,
        range: &str,
        prefix: &str,
        lines: &mut Vec<String>,
    ) {
        let text = segment.text.trim();
        if segment.words.is_empty() {
            lines.push(format!("{range} {prefix}{text}"));
        } else {
            // Header keeps its trailing space; word text is emitted exactly
            // as the model produced it.
            lines.push(format!("{range} {prefix}"));
            for word in &segment.words {
                lines.push(format!(
                    "  {}-{}: {}{}",
                    format_clock(word.start),
                    format_clock(word.end),
                    self.prefix_at(word.start),
                    word.text
                ));
            }
            lines.push(format!("Full segment: {prefix}{text}"));
        }
        lines.push(String::new());
    }

    /// Lossless form of the whole result; [`load_json`] reads it back.
    pub fn json(&self) -> ScribeResult<String> {
        Ok(serde_json::to_string_pretty(self.result)?)
    }

    /// SubRip. Cues are numbered from 1 and separated by a blank line.
    #[must_use]
    pub fn srt(&self) -> String {
        let mut out = String::new();
        for (index, segment) in self.segments().iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "{}", index + 1);
            let _ = writeln!(
                out,
                "{} --> {}",
                format_srt_timestamp(segment.start),
                format_srt_timestamp(segment.end)
            );
            let _ = writeln!(out, "{}{}", self.prefix_at(segment.start), segment.text.trim());
        }
        out
    }

    /// WebVTT.
    #[must_use]
    pub fn vtt(&self) -> String {
        let mut out = String::from("WEBVTT\n");
        for segment in self.segments() {
            out.push('\n');
            let _ = writeln!(
                out,
                "{} --> {}",
                format_vtt_timestamp(segment.start),
                format_vtt_timestamp(segment.end)
            );
            let _ = writeln!(out, "{}{}", self.prefix_at(segment.start), segment.text.trim());
        }
        out
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Render `target.format` and write it to `target.path`, creating parent
/// directories as needed.
pub fn write_export(renderer: &TranscriptRenderer<'_>, target: &ExportTarget) -> ScribeResult<()> {
    let content = renderer
        .render(target.format)
        .map_err(|error| ScribeError::export(&target.path, error))?;
    if let Some(parent) = target.path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|error| ScribeError::export(&target.path, error))?;
    }
    fs::write(&target.path, content).map_err(|error| ScribeError::export(&target.path, error))?;
    tracing::info!(
        format = target.format.label(),
        path = %target.path.display(),
        "export written"
    );
    Ok(())
}

/// Write every target independently. A failed target is reported in its own
/// [`ExportReport`] and does not affect the others.
#[must_use]
pub fn export_all(renderer: &TranscriptRenderer<'_>, targets: &[ExportTarget]) -> Vec<ExportReport> {
    targets
        .iter()
        .map(|target| {
            let outcome = write_export(renderer, target);
            if let Err(error) = &outcome {
                tracing::warn!(
                    format = target.format.label(),
                    error = %error,
                    error_code = error.error_code(),
                    "export failed"
                );
            }
            ExportReport {
                target: target.clone(),
                outcome,
            }
        })
        .collect()
}

/// Read a result previously written by the JSON export.
pub fn load_json(path: &Path) -> ScribeResult<PipelineResult> {
    if !path.exists() {
        return Err(ScribeError::InputNotFound(path.to_path_buf()));
    }
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
