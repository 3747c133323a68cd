#![forbid(unsafe_code)]

pub mod align;
pub mod audio;
pub mod backend;
pub mod cli;
pub mod error;
pub mod export;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod process;
pub mod progress;

pub use align::{AlignmentPolicy, SPEAKER_MATCH_TOLERANCE_SEC, speaker_at};
pub use error::{ScribeError, ScribeResult};
pub use model::{
    MediaHandle, PipelineOptions, PipelineResult, ProgressEvent, SpeakerInterval, Stage,
    StageOutcome, TranscriptResult, TranscriptSegment, TranscriptWord,
};
pub use orchestrator::{Orchestrator, OrchestratorConfig, PipelineState, RunHandle, RunMessage};
