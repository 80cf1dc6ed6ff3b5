use std::{collections::VecDeque, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::Result;

/// Upper bound on beats kept per track.
pub const MAX_BEATS: usize = 5_000;

/// A detected beat: time offset from track start plus normalised intensity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "BeatEventRepr")]
pub struct BeatEvent {
    pub offset_seconds: f64,
    pub intensity: f64,
}

impl BeatEvent {
    pub fn new(offset_seconds: f64, intensity: f64) -> Self {
        Self {
            offset_seconds,
            intensity,
        }
    }
}

/// Analysis output stores beats as `[offset, intensity]` pairs; both that and
/// the named form are accepted.
#[derive(Deserialize)]
#[serde(untagged)]
enum BeatEventRepr {
    Pair(f64, f64),
    Named { offset_seconds: f64, intensity: f64 },
}

impl From<BeatEventRepr> for BeatEvent {
    fn from(repr: BeatEventRepr) -> Self {
        match repr {
            BeatEventRepr::Pair(offset_seconds, intensity)
            | BeatEventRepr::Named {
                offset_seconds,
                intensity,
            } => Self::new(offset_seconds, intensity),
        }
    }
}

/// An analysed track ready for playback. Beats are ascending by offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSync {
    pub filename: String,
    pub beats: Vec<BeatEvent>,
    /// Estimated BPM, 0 when unknown.
    #[serde(default)]
    pub tempo: f64,
}

impl TrackSync {
    pub fn new(filename: impl Into<String>, beats: Vec<BeatEvent>, tempo: f64) -> Self {
        Self {
            filename: filename.into(),
            beats,
            tempo,
        }
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Queue entry as reported in status snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTrack {
    pub filename: String,
    pub tempo: f64,
    pub beats: usize,
}

/// FIFO of analysed tracks waiting to be played.
#[derive(Debug, Default)]
pub struct TrackQueue {
    tracks: VecDeque<TrackSync>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a track, keeping at most [`MAX_BEATS`] beats.
    pub fn enqueue(&mut self, mut track: TrackSync) {
        if track.beats.len() > MAX_BEATS {
            warn!(
                filename = %track.filename,
                beats = track.beats.len(),
                kept = MAX_BEATS,
                "track too long, truncating beats"
            );
            track.beats.truncate(MAX_BEATS);
        }
        info!(filename = %track.filename, beats = track.beats.len(), "track queued");
        self.tracks.push_back(track);
    }

    pub fn dequeue(&mut self) -> Option<TrackSync> {
        self.tracks.pop_front()
    }

    /// Drops every entry named `filename`. Returns how many were removed.
    pub fn remove(&mut self, filename: &str) -> usize {
        let before = self.tracks.len();
        self.tracks.retain(|track| track.filename != filename);
        before - self.tracks.len()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn summary(&self) -> Vec<QueuedTrack> {
        self.tracks
            .iter()
            .map(|track| QueuedTrack {
                filename: track.filename.clone(),
                tempo: track.tempo,
                beats: track.beats.len(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(name: &str, beats: usize) -> TrackSync {
        let beats = (0..beats)
            .map(|i| BeatEvent::new(i as f64 * 0.5, 1.0))
            .collect();
        TrackSync::new(name, beats, 120.0)
    }

    #[test]
    fn keeps_fifo_order() {
        let mut queue = TrackQueue::new();
        queue.enqueue(track("a.mp3", 1));
        queue.enqueue(track("b.mp3", 2));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue().unwrap().filename, "a.mp3");
        assert_eq!(queue.dequeue().unwrap().filename, "b.mp3");
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn truncates_long_tracks() {
        let mut queue = TrackQueue::new();
        queue.enqueue(track("long.wav", 6_000));

        let stored = queue.dequeue().unwrap();
        assert_eq!(stored.beats.len(), MAX_BEATS);
        assert_eq!(stored.beats[MAX_BEATS - 1].offset_seconds, (MAX_BEATS - 1) as f64 * 0.5);
    }

    #[test]
    fn removes_every_matching_entry() {
        let mut queue = TrackQueue::new();
        queue.enqueue(track("a.mp3", 1));
        queue.enqueue(track("b.mp3", 1));
        queue.enqueue(track("a.mp3", 1));

        assert_eq!(queue.remove("a.mp3"), 2);
        assert_eq!(queue.remove("missing.mp3"), 0);
        let summary = queue.summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].filename, "b.mp3");
        assert_eq!(summary[0].beats, 1);
    }

    #[test]
    fn parses_pairs_and_named_beats() {
        let json = r#"{
            "filename": "song.flac",
            "beats": [[0.0, 1.0], {"offset_seconds": 0.5, "intensity": 0.25}],
            "tempo": 128.0
        }"#;
        let track: TrackSync = serde_json::from_str(json).unwrap();
        assert_eq!(track.beats, vec![BeatEvent::new(0.0, 1.0), BeatEvent::new(0.5, 0.25)]);
        assert_eq!(track.tempo, 128.0);

        let without_tempo: TrackSync =
            serde_json::from_str(r#"{"filename": "x.ogg", "beats": []}"#).unwrap();
        assert_eq!(without_tempo.tempo, 0.0);
    }
}
