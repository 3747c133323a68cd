//! Speaker lookup over diarization intervals.
//!
//! Transcription and diarization timestamps come from different models, often
//! over resampled audio, so they rarely line up exactly. A lookup first looks
//! for an interval containing the timestamp and otherwise borrows the label of
//! the nearest interval, but only within a small tolerance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::SpeakerInterval;

/// How far (in seconds) a label may be borrowed from a neighboring turn.
pub const SPEAKER_MATCH_TOLERANCE_SEC: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentPolicy {
    pub tolerance_sec: f64,
}

impl Default for AlignmentPolicy {
    fn default() -> Self {
        Self {
            tolerance_sec: SPEAKER_MATCH_TOLERANCE_SEC,
        }
    }
}

impl AlignmentPolicy {
    #[must_use]
    pub const fn with_tolerance(tolerance_sec: f64) -> Self {
        Self { tolerance_sec }
    }

    /// Label of the speaker talking at `timestamp`, if any.
    ///
    /// Works on unsorted and overlapping input. Among containing intervals
    /// the first in input order wins; among equidistant neighbors, likewise.
    #[must_use]
    pub fn speaker_at<'a>(&self, intervals: &'a [SpeakerInterval], timestamp: f64) -> Option<&'a str> {
        if let Some(interval) = intervals
            .iter()
            .find(|interval| interval.start <= timestamp && timestamp <= interval.end)
        {
            return Some(&interval.label);
        }

        let mut nearest: Option<(&SpeakerInterval, f64)> = None;
        for interval in intervals {
            let distance = if timestamp < interval.start {
                interval.start - timestamp
            } else {
                timestamp - interval.end
            };
            if nearest.is_none_or(|(_, best)| distance < best) {
                nearest = Some((interval, distance));
            }
        }

        nearest
            .filter(|(_, distance)| *distance <= self.tolerance_sec)
            .map(|(interval, _)| interval.label.as_str())
    }
}

/// [`AlignmentPolicy::speaker_at`] with the default 0.8 s tolerance.
#[must_use]
pub fn speaker_at(intervals: &[SpeakerInterval], timestamp: f64) -> Option<&str> {
    AlignmentPolicy::default().speaker_at(intervals, timestamp)
}

/// Per-speaker totals for a diarization result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerSummary {
    pub label: String,
    pub turns: usize,
    pub speaking_sec: f64,
}

/// Distinct speakers in first-appearance order with their turn counts and
/// speaking time.
#[must_use]
pub fn summarize_speakers(intervals: &[SpeakerInterval]) -> Vec<SpeakerSummary> {
    let mut order: Vec<&str> = Vec::new();
    let mut totals: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for interval in intervals {
        let entry = totals.entry(interval.label.as_str()).or_insert_with(|| {
            order.push(interval.label.as_str());
            (0, 0.0)
        });
        entry.0 += 1;
        entry.1 += interval.duration();
    }

    order
        .into_iter()
        .map(|label| {
            let (turns, speaking_sec) = totals.get(label).copied().unwrap_or_default();
            SpeakerSummary {
                label: label.to_owned(),
                turns,
                speaking_sec,
            }
        })
        .collect()
}
