use std::path::Path;

use crate::backend::{DiarizationLoadError, DiarizationLoader, DiarizationModel};
use crate::error::{ScribeError, ScribeResult};
use crate::model::SpeakerInterval;
use crate::process::{binary_from_env, command_exists, run_command};

const DEFAULT_PYTHON_BIN: &str = "python3";
const PYTHON_BIN_ENV: &str = "SPEAKERSCRIBE_PYTHON_BIN";
const DEVICE_ENV: &str = "SPEAKERSCRIBE_DIARIZATION_DEVICE";

/// Pretrained pipeline the helper loads.
pub const PIPELINE_ID: &str = "pyannote/speaker-diarization-3.1";

const HELPER_SOURCE: &str = include_str!("../../scripts/pyannote_diarize.py");

// Helper exit codes.
const EXIT_NOT_INSTALLED: i32 = 3;
const EXIT_LOAD_FAILED: i32 = 4;

#[derive(Debug, Clone)]
pub struct PyannoteLoader {
    python: String,
    device: Option<String>,
}

impl PyannoteLoader {
    #[must_use]
    pub fn new(python: impl Into<String>, device: Option<String>) -> Self {
        Self {
            python: python.into(),
            device,
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        let device = std::env::var(DEVICE_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());
        Self::new(binary_from_env(PYTHON_BIN_ENV, DEFAULT_PYTHON_BIN), device)
    }

    #[must_use]
    pub fn python(&self) -> &str {
        &self.python
    }
}

impl DiarizationLoader for PyannoteLoader {
    /// Probe the interpreter, the package, and the pretrained pipeline
    /// (which needs a Hugging Face token from `TOKEN` or `HF_TOKEN`).
    fn load(&self) -> Result<Box<dyn DiarizationModel>, DiarizationLoadError> {
        if !command_exists(&self.python) {
            return Err(DiarizationLoadError::NotInstalled(format!(
                "python interpreter `{}` not found",
                self.python
            )));
        }
        if !hf_token_present() {
            tracing::debug!("no TOKEN/HF_TOKEN set; relying on cached Hugging Face credentials");
        }

        let args = helper_args(&["--check"], self.device.as_deref());
        match run_command(&self.python, &args, None) {
            Ok(_) => {
                tracing::info!(stage = "diarization", pipeline = PIPELINE_ID, "diarization model ready");
                Ok(Box::new(PyannoteDiarizer {
                    python: self.python.clone(),
                    device: self.device.clone(),
                }))
            }
            Err(ScribeError::CommandFailed {
                status,
                stderr_suffix,
                ..
            }) if status == EXIT_NOT_INSTALLED => {
                Err(DiarizationLoadError::NotInstalled(reason(&stderr_suffix)))
            }
            Err(ScribeError::CommandFailed {
                status,
                stderr_suffix,
                ..
            }) if status == EXIT_LOAD_FAILED => {
                Err(DiarizationLoadError::LoadFailed(reason(&stderr_suffix)))
            }
            Err(other) => Err(DiarizationLoadError::LoadFailed(other.to_string())),
        }
    }
}

/// pyannote pipeline behind the bundled Python helper.
#[derive(Debug, Clone)]
pub struct PyannoteDiarizer {
    python: String,
    device: Option<String>,
}

impl DiarizationModel for PyannoteDiarizer {
    fn diarize(&self, audio: &Path) -> ScribeResult<Vec<SpeakerInterval>> {
        let audio_arg = audio.display().to_string();
        let args = helper_args(&["--audio", &audio_arg], self.device.as_deref());
        let output = run_command(&self.python, &args, None)
            .map_err(|error| ScribeError::DiarizationFailed(error.to_string()))?;
        parse_intervals(&output.stdout)
    }
}

fn helper_args(mode: &[&str], device: Option<&str>) -> Vec<String> {
    let mut args = vec!["-c".to_owned(), HELPER_SOURCE.to_owned()];
    args.extend(mode.iter().map(|arg| (*arg).to_owned()));
    if let Some(device) = device {
        args.push("--device".to_owned());
        args.push(device.to_owned());
    }
    args
}

fn parse_intervals(stdout: &[u8]) -> ScribeResult<Vec<SpeakerInterval>> {
    let text = String::from_utf8_lossy(stdout);
    // The helper prints a single JSON line last; libraries may log before it.
    let payload = text
        .lines()
        .rev()
        .find(|line| line.trim_start().starts_with('['))
        .ok_or_else(|| ScribeError::DiarizationFailed("helper printed no intervals".to_owned()))?;
    serde_json::from_str(payload)
        .map_err(|error| ScribeError::DiarizationFailed(format!("malformed intervals: {error}")))
}

fn reason(stderr_suffix: &str) -> String {
    let trimmed = stderr_suffix.trim_start_matches("; stderr: ").trim();
    if trimmed.is_empty() {
        "no details reported".to_owned()
    } else {
        trimmed.lines().last().unwrap_or(trimmed).to_owned()
    }
}

fn hf_token_present() -> bool {
    ["TOKEN", "HF_TOKEN"].iter().any(|key| {
        std::env::var(key)
            .ok()
            .is_some_and(|value| !value.trim().is_empty())
    })
}
