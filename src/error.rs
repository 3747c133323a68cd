use std::path::PathBuf;

use thiserror::Error;

pub type ScribeResult<T> = Result<T, ScribeError>;

#[derive(Debug, Error)]
pub enum ScribeError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("input file does not exist: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("missing command `{command}` on PATH")]
    CommandMissing { command: String },

    #[error("command failed: `{command}` (status: {status}){stderr_suffix}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr_suffix: String,
    },

    #[error("could not convert `{}` to 16 kHz mono wav: {reason}", .input.display())]
    NormalizationFailed { input: PathBuf, reason: String },

    #[error("speaker diarization unavailable: {0}")]
    DiarizationUnavailable(String),

    #[error("speaker diarization failed: {0}")]
    DiarizationFailed(String),

    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("failed to export `{}`: {reason}", .path.display())]
    ExportFailed { path: PathBuf, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("a pipeline run is already active on this orchestrator")]
    RunInProgress,
}

impl ScribeError {
    #[must_use]
    pub fn from_command_failure(command: String, status: i32, stderr: String) -> Self {
        Self::CommandFailed {
            command,
            status,
            stderr_suffix: stderr_suffix(&stderr),
        }
    }

    #[must_use]
    pub fn normalization(input: impl Into<PathBuf>, cause: impl ToString) -> Self {
        Self::NormalizationFailed {
            input: input.into(),
            reason: cause.to_string(),
        }
    }

    #[must_use]
    pub fn export(path: impl Into<PathBuf>, cause: impl ToString) -> Self {
        Self::ExportFailed {
            path: path.into(),
            reason: cause.to_string(),
        }
    }

    /// Whether this error ends a pipeline run. Diarization errors are
    /// absorbed into the run's `StageOutcome`; export errors happen after the
    /// result already exists.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::DiarizationUnavailable(_) | Self::DiarizationFailed(_) | Self::ExportFailed { .. }
        )
    }

    /// Stable, unique, machine-readable code for every variant.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "SS-IO",
            Self::Json(_) => "SS-JSON",
            Self::InputNotFound(_) => "SS-INPUT-NOT-FOUND",
            Self::CommandMissing { .. } => "SS-CMD-MISSING",
            Self::CommandFailed { .. } => "SS-CMD-FAILED",
            Self::NormalizationFailed { .. } => "SS-NORMALIZATION-FAILED",
            Self::DiarizationUnavailable(_) => "SS-DIARIZATION-UNAVAILABLE",
            Self::DiarizationFailed(_) => "SS-DIARIZATION-FAILED",
            Self::TranscriptionFailed(_) => "SS-TRANSCRIPTION-FAILED",
            Self::ExportFailed { .. } => "SS-EXPORT-FAILED",
            Self::InvalidRequest(_) => "SS-INVALID-REQUEST",
            Self::RunInProgress => "SS-RUN-IN-PROGRESS",
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("; stderr: {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::PathBuf;

    use super::ScribeError;

    fn all_variants() -> Vec<ScribeError> {
        vec![
            ScribeError::Io(std::io::Error::other("disk read failed")),
            ScribeError::Json(serde_json::from_str::<serde_json::Value>("{").unwrap_err()),
            ScribeError::InputNotFound(PathBuf::from("talk.mp4")),
            ScribeError::CommandMissing {
                command: "ffmpeg".to_owned(),
            },
            ScribeError::from_command_failure("ffmpeg -i a b".to_owned(), 1, String::new()),
            ScribeError::normalization("talk.mp4", "exit status 1"),
            ScribeError::DiarizationUnavailable("pyannote not installed".to_owned()),
            ScribeError::DiarizationFailed("cuda oom".to_owned()),
            ScribeError::TranscriptionFailed("model missing".to_owned()),
            ScribeError::export("out.srt", "permission denied"),
            ScribeError::InvalidRequest("bad".to_owned()),
            ScribeError::RunInProgress,
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let codes: Vec<&str> = all_variants().iter().map(ScribeError::error_code).collect();
        let unique: HashSet<&str> = codes.iter().copied().collect();
        assert_eq!(codes.len(), unique.len(), "duplicate codes: {codes:?}");
    }

    #[test]
    fn only_diarization_and_export_errors_are_non_fatal() {
        for error in all_variants() {
            let expected_fatal = !matches!(
                error,
                ScribeError::DiarizationUnavailable(_)
                    | ScribeError::DiarizationFailed(_)
                    | ScribeError::ExportFailed { .. }
            );
            assert_eq!(error.is_fatal(), expected_fatal, "{error:?}");
        }
    }

    #[test]
    fn from_command_failure_with_empty_stderr() {
        let err = ScribeError::from_command_failure("cmd".to_owned(), 1, String::new());
        let text = err.to_string();
        assert!(text.contains("cmd"));
        assert!(text.contains("status: 1"));
        assert!(!text.contains("stderr"));
    }

    #[test]
    fn from_command_failure_trims_stderr() {
        let err = ScribeError::from_command_failure("prog".to_owned(), 2, "  oh no  \n".to_owned());
        let text = err.to_string();
        assert!(text.contains("stderr: oh no"), "should trim stderr: {text}");
    }

    #[test]
    fn normalization_message_names_the_input() {
        let err = ScribeError::normalization("/media/talk.mp4", "status 1");
        let text = err.to_string();
        assert!(text.contains("/media/talk.mp4"));
        assert!(text.contains("status 1"));
    }
}
