use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::{TranscriptionLoader, TranscriptionModel, transcript_from_json};
use crate::error::{ScribeError, ScribeResult};
use crate::model::{KNOWN_MODEL_IDS, TranscribeOptions, TranscriptResult};
use crate::process::{binary_from_env, command_exists, run_command_streaming};

const DEFAULT_WHISPER_BIN: &str = "whisper";
const WHISPER_BIN_ENV: &str = "SPEAKERSCRIBE_WHISPER_BIN";

/// Loads [`WhisperCli`] handles for the `whisper` command line.
#[derive(Debug, Clone)]
pub struct WhisperCliLoader {
    program: String,
    scratch_dir: PathBuf,
}

impl WhisperCliLoader {
    #[must_use]
    pub fn new(program: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    #[must_use]
    pub fn from_env(scratch_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            binary_from_env(WHISPER_BIN_ENV, DEFAULT_WHISPER_BIN),
            scratch_dir,
        )
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl TranscriptionLoader for WhisperCliLoader {
    fn load(&self, model_id: &str) -> ScribeResult<Box<dyn TranscriptionModel>> {
        if model_id.trim().is_empty() {
            return Err(ScribeError::InvalidRequest("model id must not be empty".to_owned()));
        }
        if !command_exists(&self.program) {
            return Err(ScribeError::CommandMissing {
                command: self.program.clone(),
            });
        }
        if !KNOWN_MODEL_IDS.contains(&model_id) {
            tracing::warn!(model = model_id, "unrecognized model id; passing it to whisper as-is");
        }
        tracing::info!(stage = "transcription", model = model_id, "transcription model ready");
        Ok(Box::new(WhisperCli {
            program: self.program.clone(),
            model_id: model_id.to_owned(),
            scratch_dir: self.scratch_dir.clone(),
        }))
    }
}

/// One model id bound to the `whisper` executable. Each call writes its JSON
/// output into a private temporary directory that is removed afterwards.
#[derive(Debug, Clone)]
pub struct WhisperCli {
    program: String,
    model_id: String,
    scratch_dir: PathBuf,
}

impl TranscriptionModel for WhisperCli {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn transcribe(
        &self,
        audio: &Path,
        options: &TranscribeOptions,
        on_progress_line: &mut dyn FnMut(&str),
    ) -> ScribeResult<TranscriptResult> {
        let output_dir = fs::create_dir_all(&self.scratch_dir)
            .and_then(|()| {
                tempfile::Builder::new()
                    .prefix("speakerscribe-whisper-")
                    .tempdir_in(&self.scratch_dir)
            })
            .map_err(|error| {
                ScribeError::TranscriptionFailed(format!(
                    "could not create whisper output directory in {}: {error}",
                    self.scratch_dir.display()
                ))
            })?;

        let args = build_args(&self.model_id, audio, output_dir.path(), options);
        run_command_streaming(&self.program, &args, None, on_progress_line)
            .map_err(|error| ScribeError::TranscriptionFailed(error.to_string()))?;

        let output_path = output_path_for(audio, output_dir.path());
        let raw = fs::read_to_string(&output_path).map_err(|error| {
            ScribeError::TranscriptionFailed(format!(
                "whisper produced no readable output at {}: {error}",
                output_path.display()
            ))
        })?;
        let root: serde_json::Value = serde_json::from_str(&raw).map_err(|error| {
            ScribeError::TranscriptionFailed(format!(
                "whisper output at {} is not valid JSON: {error}",
                output_path.display()
            ))
        })?;
        let mut transcript = transcript_from_json(&root);
        if transcript.language.is_none() {
            transcript.language.clone_from(&options.language);
        }
        Ok(transcript)
    }
}

fn build_args(
    model_id: &str,
    audio: &Path,
    output_dir: &Path,
    options: &TranscribeOptions,
) -> Vec<String> {
    let mut args = vec![
        audio.display().to_string(),
        "--model".to_owned(),
        model_id.to_owned(),
        "--output_format".to_owned(),
        "json".to_owned(),
        "--output_dir".to_owned(),
        output_dir.display().to_string(),
        "--task".to_owned(),
        options.task.as_str().to_owned(),
        // Non-verbose mode prints a frame-based progress bar on stderr.
        "--verbose".to_owned(),
        "False".to_owned(),
        "--word_timestamps".to_owned(),
        if options.word_timestamps { "True" } else { "False" }.to_owned(),
    ];
    if let Some(language) = &options.language {
        args.push("--language".to_owned());
        args.push(language.clone());
    }
    args
}

/// whisper names its output after the input's file stem.
fn output_path_for(audio: &Path, output_dir: &Path) -> PathBuf {
    let stem = audio
        .file_stem()
        .map_or_else(|| "audio".into(), |stem| stem.to_string_lossy());
    output_dir.join(format!("{stem}.json"))
}
