//! Rendering and parsing throughput for transcripts of increasing length.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::{Value, json};
use std::hint::black_box;

use speakerscribe::backend::transcript_from_json;
use speakerscribe::export::{TextStyle, TranscriptRenderer};
use speakerscribe::model::{
    PipelineResult, SpeakerInterval, StageOutcome, TranscriptResult, TranscriptSegment,
    TranscriptWord,
};

// ---------------------------------------------------------------------------
// Fixture helpers
// ---------------------------------------------------------------------------

fn diarized_result(segments: usize, words_per_segment: usize) -> PipelineResult {
    let segments: Vec<TranscriptSegment> = (0..segments)
        .map(|i| {
            let start = i as f64 * 3.0;
            let words = (0..words_per_segment)
                .map(|w| {
                    let word_start = start + w as f64 * 0.25;
                    TranscriptWord {
                        start: word_start,
                        end: word_start + 0.2,
                        text: format!(" w{w}"),
                    }
                })
                .collect();
            TranscriptSegment {
                start,
                end: start + 2.8,
                text: format!(" segment number {i}"),
                words,
            }
        })
        .collect();
    let turns = (0..segments.len())
        .map(|i| {
            let start = i as f64 * 3.0;
            SpeakerInterval::new(start, start + 3.0, format!("SPEAKER_{:02}", i % 3))
        })
        .collect();

    PipelineResult {
        transcript: TranscriptResult {
            full_text: segments.iter().map(|s| s.text.trim()).collect::<Vec<_>>().join(" "),
            segments,
            language: Some("en".to_owned()),
        },
        diarization: StageOutcome::Success(turns),
    }
}

/// Whisper command line output with `n` segments carrying word timings.
fn whisper_json(n: usize) -> Value {
    let segments: Vec<Value> = (0..n)
        .map(|i| {
            let start = i as f64 * 3.0;
            json!({
                "start": start,
                "end": start + 2.8,
                "text": format!(" segment number {i}"),
                "words": [
                    { "word": " segment", "start": start, "end": start + 0.5 },
                    { "word": " number", "start": start + 0.5, "end": start + 1.0 },
                ],
            })
        })
        .collect();
    json!({ "text": "", "segments": segments, "language": "en" })
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render");
    for &n in &[10_usize, 500] {
        let result = diarized_result(n, 8);
        let renderer = TranscriptRenderer::new(&result);

        group.bench_function(BenchmarkId::new("timestamped_text", n), |b| {
            b.iter(|| black_box(&renderer).text(TextStyle::Timestamped));
        });
        group.bench_function(BenchmarkId::new("detailed_text", n), |b| {
            b.iter(|| black_box(&renderer).text(TextStyle::Detailed));
        });
        group.bench_function(BenchmarkId::new("srt", n), |b| {
            b.iter(|| black_box(&renderer).srt());
        });
        group.bench_function(BenchmarkId::new("vtt", n), |b| {
            b.iter(|| black_box(&renderer).vtt());
        });
        group.bench_function(BenchmarkId::new("json", n), |b| {
            b.iter(|| black_box(&renderer).json());
        });
    }
    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("transcript_from_json");
    for &n in &[10_usize, 500] {
        let value = whisper_json(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &value, |b, value| {
            b.iter(|| transcript_from_json(black_box(value)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_render, bench_parse);
criterion_main!(benches);
