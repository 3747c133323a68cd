use std::path::PathBuf;

use clap::builder::PossibleValuesParser;
use clap::{Args, Parser, Subcommand};

use crate::align::{AlignmentPolicy, SPEAKER_MATCH_TOLERANCE_SEC};
use crate::error::{ScribeError, ScribeResult};
use crate::export::{ExportFormat, ExportTarget, TextStyle};
use crate::model::{DEFAULT_MODEL_ID, KNOWN_MODEL_IDS, PipelineOptions};

#[derive(Debug, Parser)]
#[command(name = "speakerscribe")]
#[command(about = "Speaker-labeled transcription with whisper and pyannote")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Transcribe a media file, labelling speakers when diarization is available.
    Transcribe(Box<TranscribeArgs>),
    /// Re-render a saved JSON result without running inference again.
    Export(ExportArgs),
}

#[derive(Debug, Args)]
pub struct TranscribeArgs {
    /// Audio or video file to transcribe.
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long, default_value = DEFAULT_MODEL_ID, value_parser = PossibleValuesParser::new(KNOWN_MODEL_IDS))]
    pub model: String,

    /// Source language code, or `auto` to detect it.
    #[arg(long)]
    pub language: Option<String>,

    /// Translate into English instead of transcribing.
    #[arg(long)]
    pub translate: bool,

    #[arg(long)]
    pub no_diarization: bool,

    #[arg(long)]
    pub no_word_timestamps: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// JSON result written by an earlier `transcribe --json`.
    #[arg(long)]
    pub from: PathBuf,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Where and how to write results. Shared by both subcommands.
#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Text transcript path. Without it the text goes to stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub srt: Option<PathBuf>,

    #[arg(long)]
    pub vtt: Option<PathBuf>,

    /// Full result as JSON, readable by `speakerscribe export`.
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// One whitespace-normalized line per segment.
    #[arg(long, conflicts_with_all = ["no_timestamps", "detailed"])]
    pub clean_format: bool,

    /// Only the transcript text.
    #[arg(long, conflicts_with = "detailed")]
    pub no_timestamps: bool,

    /// Per-word timings and speakers under each segment.
    #[arg(long)]
    pub detailed: bool,

    /// Omit `[SPEAKER]` prefixes even when diarization succeeded.
    #[arg(long)]
    pub no_speaker_labels: bool,

    /// How far (seconds) a word may sit outside a speaker turn and still
    /// borrow its label.
    #[arg(long, default_value_t = SPEAKER_MATCH_TOLERANCE_SEC)]
    pub speaker_tolerance: f64,
}

impl TranscribeArgs {
    pub fn to_options(&self) -> ScribeResult<PipelineOptions> {
        if self.input.as_os_str().is_empty() {
            return Err(ScribeError::InvalidRequest("--input must not be empty".to_owned()));
        }
        Ok(PipelineOptions {
            model_id: self.model.clone(),
            source_language: PipelineOptions::language_from_hint(self.language.as_deref()),
            translate: self.translate,
            want_word_timestamps: !self.no_word_timestamps,
            want_diarization: !self.no_diarization,
        })
    }
}

impl OutputArgs {
    #[must_use]
    pub const fn text_style(&self) -> TextStyle {
        if self.clean_format {
            TextStyle::Clean
        } else if self.no_timestamps {
            TextStyle::Plain
        } else if self.detailed {
            TextStyle::Detailed
        } else {
            TextStyle::Timestamped
        }
    }

    pub fn alignment(&self) -> ScribeResult<AlignmentPolicy> {
        if !self.speaker_tolerance.is_finite() || self.speaker_tolerance < 0.0 {
            return Err(ScribeError::InvalidRequest(format!(
                "--speaker-tolerance must be a non-negative number of seconds, got {}",
                self.speaker_tolerance
            )));
        }
        Ok(AlignmentPolicy::with_tolerance(self.speaker_tolerance))
    }

    /// File targets in a fixed order: text, JSON, SRT, VTT.
    #[must_use]
    pub fn targets(&self) -> Vec<ExportTarget> {
        [
            (ExportFormat::Text(self.text_style()), &self.output),
            (ExportFormat::Json, &self.json),
            (ExportFormat::Srt, &self.srt),
            (ExportFormat::Vtt, &self.vtt),
        ]
        .into_iter()
        .filter_map(|(format, path)| path.as_ref().map(|path| ExportTarget::new(format, path)))
        .collect()
    }
}
