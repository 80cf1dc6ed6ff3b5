use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::{CancelToken, Exit, Scheduler, Transmitter};
use crate::{
    color::{beat_value, hsv_to_rgb, HueSource},
    protocol::Command,
    LightSyncError, Result, Rgb, TimingConfig, TrackSync,
};

/// Timing constants for beat playback, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatTiming {
    pub keep_alive: f64,
    /// Smallest sleep and the guard taken off every computed wake-up.
    pub min_sleep: f64,
    pub min_intensity: f64,
}

impl From<&TimingConfig> for BeatTiming {
    fn from(config: &TimingConfig) -> Self {
        Self {
            keep_alive: config.keep_alive().as_secs_f64(),
            min_sleep: config.min_sleep().as_secs_f64(),
            min_intensity: config.min_intensity,
        }
    }
}

impl Default for BeatTiming {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

/// Playback position within the current track.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackCursor {
    pub start: Instant,
    pub next_beat_index: usize,
    pub last_packet_sent: Instant,
}

impl PlaybackCursor {
    pub fn start(now: Instant) -> Self {
        Self {
            start: now,
            next_beat_index: 0,
            last_packet_sent: now,
        }
    }
}

/// What the beat loop should do on the current iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BeatAction {
    /// The beat at `index` is due.
    Beat { index: usize, intensity: f64 },
    /// Nothing was sent for longer than the keep-alive interval.
    KeepAlive,
    Wait,
}

impl BeatAction {
    /// Decides the action given seconds since track start and seconds since
    /// the last packet.
    pub fn plan(
        track: &TrackSync,
        next_beat_index: usize,
        elapsed: f64,
        since_last_packet: f64,
        timing: &BeatTiming,
    ) -> Self {
        match track.beats.get(next_beat_index) {
            Some(beat) if elapsed >= beat.offset_seconds => BeatAction::Beat {
                index: next_beat_index,
                intensity: beat.intensity,
            },
            _ if since_last_packet > timing.keep_alive => BeatAction::KeepAlive,
            _ => BeatAction::Wait,
        }
    }
}

/// Picks the next sleep: the sooner of the next beat and the next keep-alive,
/// pulled in by the guard so the loop wakes just before the deadline. Never
/// shorter than `min_sleep`, which is also the polling step once a deadline
/// is imminent or already past.
pub fn next_sleep(
    time_to_beat: Option<f64>,
    time_to_keep_alive: f64,
    timing: &BeatTiming,
) -> Duration {
    let guard = timing.min_sleep;
    let nearest = time_to_beat.map_or(time_to_keep_alive, |beat| beat.min(time_to_keep_alive));
    Duration::from_secs_f64((nearest - guard).max(guard))
}

/// Plays a track's beats as `BEAT_SYNC` frames, filling silences with
/// black keep-alives.
pub struct BeatScheduler {
    track: TrackSync,
    hues: Box<dyn HueSource>,
    timing: BeatTiming,
}

impl BeatScheduler {
    pub fn new(track: TrackSync, hues: Box<dyn HueSource>, timing: BeatTiming) -> Self {
        Self {
            track,
            hues,
            timing,
        }
    }

    fn beat_color(&mut self, intensity: f64) -> Rgb {
        let hue = self.hues.next_hue();
        hsv_to_rgb(hue, 1.0, beat_value(intensity, self.timing.min_intensity))
    }
}

impl Scheduler for BeatScheduler {
    fn name(&self) -> &'static str {
        "beat"
    }

    fn run(&mut self, tx: &mut Transmitter, cancel: &CancelToken) -> Result<Exit> {
        let total = self.track.beats.len();
        if total == 0 {
            return Err(LightSyncError::EmptyTrack(self.track.filename.clone()));
        }
        let mut cursor = PlaybackCursor::start(Instant::now());
        info!(filename = %self.track.filename, beats = total, tempo = self.track.tempo, "beat playback started");

        while cursor.next_beat_index < total {
            if cancel.is_cancelled() {
                return Ok(Exit::Cancelled);
            }

            let now = Instant::now();
            let elapsed = now.duration_since(cursor.start).as_secs_f64();
            let since_last = now.duration_since(cursor.last_packet_sent).as_secs_f64();

            match BeatAction::plan(&self.track, cursor.next_beat_index, elapsed, since_last, &self.timing) {
                BeatAction::Beat { index, intensity } => {
                    let color = self.beat_color(intensity);
                    tx.send(Command::BeatSync, color)?;
                    cursor.next_beat_index = index + 1;
                    cursor.last_packet_sent = Instant::now();
                    debug!(beat = index + 1, intensity, "beat sent");
                }
                BeatAction::KeepAlive => {
                    tx.send(Command::BeatSync, Rgb::BLACK)?;
                    cursor.last_packet_sent = Instant::now();
                }
                BeatAction::Wait => {}
            }

            let now = Instant::now();
            let elapsed = now.duration_since(cursor.start).as_secs_f64();
            let time_to_beat = self
                .track
                .beats
                .get(cursor.next_beat_index)
                .map(|beat| beat.offset_seconds - elapsed);
            let time_to_keep_alive =
                self.timing.keep_alive - now.duration_since(cursor.last_packet_sent).as_secs_f64();

            if cursor.next_beat_index < total
                && cancel.wait(next_sleep(time_to_beat, time_to_keep_alive, &self.timing))
            {
                return Ok(Exit::Cancelled);
            }
        }

        info!(filename = %self.track.filename, frames = tx.sent(), "all beats sent");
        Ok(Exit::Completed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        color::FixedHue,
        protocol::PacketCounter,
        scheduler::{cancel_pair, testing::RecordingSink},
        BeatEvent,
    };

    fn track(beats: &[(f64, f64)]) -> TrackSync {
        TrackSync::new(
            "test.wav",
            beats.iter().map(|&(o, i)| BeatEvent::new(o, i)).collect(),
            120.0,
        )
    }

    fn millis(duration: Duration) -> f64 {
        duration.as_secs_f64() * 1_000.0
    }

    #[test]
    fn plans_due_beats_before_keep_alives() {
        let timing = BeatTiming::default();
        let track = track(&[(0.5, 0.2), (2.0, 1.0)]);

        assert_eq!(BeatAction::plan(&track, 0, 0.1, 0.1, &timing), BeatAction::Wait);
        assert_eq!(
            BeatAction::plan(&track, 0, 0.5, 5.0, &timing),
            BeatAction::Beat { index: 0, intensity: 0.2 }
        );
        assert_eq!(BeatAction::plan(&track, 1, 1.5, 0.95, &timing), BeatAction::KeepAlive);
        assert_eq!(BeatAction::plan(&track, 1, 1.5, 0.9, &timing), BeatAction::Wait);
        assert_eq!(BeatAction::plan(&track, 2, 9.0, 0.1, &timing), BeatAction::Wait);
    }

    #[test]
    fn sleeps_until_the_nearest_deadline_minus_guard() {
        let timing = BeatTiming::default();
        assert!((millis(next_sleep(Some(0.5), 0.9, &timing)) - 495.0).abs() < 1e-3);
        assert!((millis(next_sleep(Some(2.0), 0.3, &timing)) - 295.0).abs() < 1e-3);
        assert!((millis(next_sleep(None, 0.9, &timing)) - 895.0).abs() < 1e-3);
        assert!((millis(next_sleep(Some(0.012), 0.9, &timing)) - 7.0).abs() < 1e-3);
    }

    #[test]
    fn imminent_deadlines_poll_at_minimum_granularity() {
        let timing = BeatTiming::default();
        let five = Duration::from_millis(5);
        assert_eq!(next_sleep(Some(0.008), 0.9, &timing), five);
        assert_eq!(next_sleep(Some(2.0), 0.004, &timing), five);
        assert_eq!(next_sleep(Some(-1.0), -0.2, &timing), five);
        assert_eq!(next_sleep(None, -0.2, &timing), five);
    }

    #[test]
    fn sends_one_frame_per_beat_in_order() {
        let sink = RecordingSink::default();
        let mut tx = Transmitter::new(Box::new(sink.clone()), Arc::new(PacketCounter::new()));
        let (_handle, cancel) = cancel_pair();
        let beats: Vec<(f64, f64)> = (0..20).map(|i| (i as f64 * 0.01, 1.0)).collect();
        let mut scheduler =
            BeatScheduler::new(track(&beats), Box::new(FixedHue(0.0)), BeatTiming::default());

        assert_eq!(scheduler.run(&mut tx, &cancel).unwrap(), Exit::Completed);

        let frames = sink.captured();
        assert_eq!(frames.len(), 20);
        for (i, captured) in frames.iter().enumerate() {
            assert_eq!(captured.frame.command, Command::BeatSync);
            assert_eq!(captured.frame.color, Rgb::new(255, 0, 0));
            assert_eq!(captured.frame.packet_id, i as u32 + 1);
        }
    }

    #[test]
    fn maps_intensity_to_brightness() {
        let sink = RecordingSink::default();
        let mut tx = Transmitter::new(Box::new(sink.clone()), Arc::new(PacketCounter::new()));
        let (_handle, cancel) = cancel_pair();
        let mut scheduler = BeatScheduler::new(
            track(&[(0.0, 1.0), (0.0, 0.5), (0.0, 0.8), (0.0, 0.0)]),
            Box::new(FixedHue(0.0)),
            BeatTiming::default(),
        );

        scheduler.run(&mut tx, &cancel).unwrap();

        let reds: Vec<u8> = sink.captured().iter().map(|c| c.frame.color.r).collect();
        assert_eq!(reds, vec![255, 165, 219, 76]);
    }

    #[test]
    fn fills_long_gaps_with_black_keep_alives() {
        let sink = RecordingSink::default();
        let mut tx = Transmitter::new(Box::new(sink.clone()), Arc::new(PacketCounter::new()));
        let (_handle, cancel) = cancel_pair();
        let timing = BeatTiming {
            keep_alive: 0.05,
            ..BeatTiming::default()
        };
        let mut scheduler =
            BeatScheduler::new(track(&[(0.0, 1.0), (0.3, 1.0)]), Box::new(FixedHue(0.0)), timing);

        scheduler.run(&mut tx, &cancel).unwrap();

        let frames = sink.captured();
        let first = frames.first().unwrap();
        let last = frames.last().unwrap();
        assert_eq!(first.frame.color, Rgb::new(255, 0, 0));
        assert_eq!(last.frame.color, Rgb::new(255, 0, 0));

        let keep_alives = &frames[1..frames.len() - 1];
        assert!(keep_alives.len() >= 3, "only {} keep-alives", keep_alives.len());
        assert!(keep_alives.iter().all(|c| c.frame.color == Rgb::BLACK));
        for pair in frames.windows(2) {
            let gap = pair[1].at.duration_since(pair[0].at);
            assert!(gap < Duration::from_millis(150), "gap of {gap:?} between packets");
        }
    }

    #[test]
    fn cancellation_stops_playback() {
        let sink = RecordingSink::default();
        let mut tx = Transmitter::new(Box::new(sink.clone()), Arc::new(PacketCounter::new()));
        let (mut handle, cancel) = cancel_pair();
        let mut scheduler = BeatScheduler::new(
            track(&[(0.0, 1.0), (30.0, 1.0)]),
            Box::new(FixedHue(0.0)),
            BeatTiming::default(),
        );

        let worker = std::thread::spawn(move || scheduler.run(&mut tx, &cancel));
        std::thread::sleep(Duration::from_millis(50));
        let stopped = Instant::now();
        handle.cancel();

        assert_eq!(worker.join().unwrap().unwrap(), Exit::Cancelled);
        assert!(stopped.elapsed() < Duration::from_millis(500));
        assert_eq!(sink.captured().len(), 1);
    }

    #[test]
    fn send_failure_aborts_playback() {
        let sink = RecordingSink::failing_after(1);
        let mut tx = Transmitter::new(Box::new(sink.clone()), Arc::new(PacketCounter::new()));
        let (_handle, cancel) = cancel_pair();
        let mut scheduler = BeatScheduler::new(
            track(&[(0.0, 1.0), (0.01, 1.0), (0.02, 1.0)]),
            Box::new(FixedHue(0.0)),
            BeatTiming::default(),
        );

        let err = scheduler.run(&mut tx, &cancel).unwrap_err();
        assert!(matches!(err, LightSyncError::Send(_)));
        assert_eq!(sink.captured().len(), 1);
    }

    #[test]
    fn track_without_beats_is_an_error() {
        let sink = RecordingSink::default();
        let mut tx = Transmitter::new(Box::new(sink.clone()), Arc::new(PacketCounter::new()));
        let (_handle, cancel) = cancel_pair();
        let mut scheduler =
            BeatScheduler::new(track(&[]), Box::new(FixedHue(0.0)), BeatTiming::default());

        let err = scheduler.run(&mut tx, &cancel).unwrap_err();
        assert!(matches!(err, LightSyncError::EmptyTrack(ref name) if name == "test.wav"));
        assert!(sink.captured().is_empty());
    }
}
