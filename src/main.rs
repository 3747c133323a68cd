use std::io::Write;

use clap::Parser;
use speakerscribe::cli::{Cli, Command, OutputArgs};
use speakerscribe::export::{TranscriptRenderer, export_all, load_json};
use speakerscribe::orchestrator::{Orchestrator, OrchestratorConfig};
use speakerscribe::progress::ProgressTracker;
use speakerscribe::{AlignmentPolicy, PipelineResult, ScribeResult, StageOutcome};

fn main() {
    speakerscribe::logging::init();

    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run() -> ScribeResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Transcribe(args) => {
            let options = args.to_options()?;
            let alignment = args.output.alignment()?;
            let orchestrator = Orchestrator::from_env(OrchestratorConfig {
                alignment,
                ..OrchestratorConfig::default()
            });

            let handle = orchestrator.spawn(&args.input, options)?;
            let mut tracker = ProgressTracker::new();
            let result = handle.wait(|event| {
                if tracker.observe(event) {
                    draw_progress(&tracker);
                }
            });
            eprintln!();
            let result = result?;

            if let Some(reason) = diarization_note(&result) {
                eprintln!("note: {reason}");
            }
            emit(&result, &args.output, alignment)
        }
        Command::Export(args) => {
            let alignment = args.output.alignment()?;
            let result = load_json(&args.from)?;
            emit(&result, &args.output, alignment)
        }
    }
}

fn draw_progress(tracker: &ProgressTracker) {
    let stage = tracker.stage.map_or("starting", |stage| stage.label());
    let mut stderr = std::io::stderr().lock();
    let _ = write!(
        stderr,
        "\r\x1b[2K[{stage} {:>3}%] overall {:>3}% | {}",
        tracker.current_stage_percent, tracker.overall_percent, tracker.message
    );
    let _ = stderr.flush();
}

/// Outcome reasons already read as full sentences, e.g.
/// "speaker diarization unavailable: ...".
fn diarization_note(result: &PipelineResult) -> Option<&str> {
    match &result.diarization {
        StageOutcome::Success(_) => None,
        StageOutcome::Unavailable(reason) | StageOutcome::Failed(reason) => Some(reason),
    }
}

/// Print or write every requested output. All targets are attempted; the
/// first failure is returned afterwards.
fn emit(result: &PipelineResult, output: &OutputArgs, alignment: AlignmentPolicy) -> ScribeResult<()> {
    let mut renderer = TranscriptRenderer::new(result).with_policy(alignment);
    if output.no_speaker_labels {
        renderer = renderer.without_speaker_labels();
    }

    if output.output.is_none() {
        println!("{}", renderer.text(output.text_style()));
    }

    let mut first_error = None;
    for report in export_all(&renderer, &output.targets()) {
        match report.outcome {
            Ok(()) => eprintln!(
                "saved {} to {}",
                report.target.format.label(),
                report.target.path.display()
            ),
            Err(error) => {
                eprintln!("error: {error}");
                first_error.get_or_insert(error);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}
