use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ScribeError, ScribeResult};
use crate::ledger::ResourceLedger;
use crate::model::MediaHandle;
use crate::process::{binary_from_env, run_command};

const DEFAULT_FFMPEG_BIN: &str = "ffmpeg";
const FFMPEG_BIN_ENV: &str = "SPEAKERSCRIBE_FFMPEG_BIN";
const SCRATCH_DIR_ENV: &str = "SPEAKERSCRIBE_SCRATCH_DIR";

/// Converts media into something a stage can read, shelling out to ffmpeg
/// when the input's container is not one the stage accepts.
#[derive(Debug, Clone)]
pub struct MediaNormalizer {
    program: String,
    scratch_dir: PathBuf,
}

impl Default for MediaNormalizer {
    fn default() -> Self {
        Self::from_env()
    }
}

impl MediaNormalizer {
    #[must_use]
    pub fn new(program: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    /// `SPEAKERSCRIBE_FFMPEG_BIN` and `SPEAKERSCRIBE_SCRATCH_DIR`, with
    /// `ffmpeg` and the OS temp dir as fallbacks.
    #[must_use]
    pub fn from_env() -> Self {
        let scratch_dir = std::env::var(SCRATCH_DIR_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map_or_else(std::env::temp_dir, PathBuf::from);
        Self::new(
            binary_from_env(FFMPEG_BIN_ENV, DEFAULT_FFMPEG_BIN),
            scratch_dir,
        )
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Return a handle the caller can feed to a stage that reads
    /// `accepted_extensions` natively.
    ///
    /// Accepted inputs come back as an alias of `input`. Anything else is
    /// transcoded into a new 16 kHz mono PCM wav that `ledger` tracks. The
    /// result is not memoized: each call on an unsupported input creates a
    /// fresh file.
    pub fn normalize(
        &self,
        input: &Path,
        accepted_extensions: &[&str],
        ledger: &mut ResourceLedger,
    ) -> ScribeResult<MediaHandle> {
        if has_accepted_extension(input, accepted_extensions) {
            tracing::debug!(
                stage = "normalize",
                path = %input.display(),
                "input already in an accepted format"
            );
            return Ok(MediaHandle::aliasing(input.to_path_buf()));
        }

        fs::create_dir_all(&self.scratch_dir)
            .map_err(|error| ScribeError::normalization(input, error))?;
        let output = tempfile::Builder::new()
            .prefix("speakerscribe-")
            .suffix(".wav")
            .tempfile_in(&self.scratch_dir)
            .and_then(|file| file.into_temp_path().keep().map_err(|e| e.error))
            .map_err(|error| ScribeError::normalization(input, error))?;

        tracing::info!(
            stage = "normalize",
            input = %input.display(),
            output = %output.display(),
            "transcoding to 16 kHz mono wav"
        );

        let args = transcode_args(input, &output);
        if let Err(error) = run_command(&self.program, &args, None) {
            if let Err(remove_error) = fs::remove_file(&output) {
                tracing::debug!(
                    path = %output.display(),
                    error = %remove_error,
                    "could not remove failed transcode output"
                );
            }
            return Err(ScribeError::normalization(input, error));
        }

        ledger.track(&output);
        Ok(MediaHandle::derived(input.to_path_buf(), output))
    }
}

/// Case-insensitive extension check. Entries may be given with or without a
/// leading dot.
#[must_use]
pub fn has_accepted_extension(path: &Path, accepted_extensions: &[&str]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    accepted_extensions
        .iter()
        .any(|candidate| candidate.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

fn transcode_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-i".to_owned(),
        input.display().to_string(),
        "-acodec".to_owned(),
        "pcm_s16le".to_owned(),
        "-ar".to_owned(),
        "16000".to_owned(),
        "-ac".to_owned(),
        "1".to_owned(),
        output.display().to_string(),
    ]
}
