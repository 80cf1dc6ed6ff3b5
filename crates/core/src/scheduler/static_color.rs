use std::time::Duration;

use tracing::info;

use super::{CancelToken, Exit, Scheduler, Transmitter};
use crate::{protocol::Command, Result, Rgb};

/// Holds one colour by re-sending it every keep-alive interval; the rig falls
/// back to idle when the stream stops.
pub struct StaticScheduler {
    color: Rgb,
    interval: Duration,
}

impl StaticScheduler {
    pub fn new(color: Rgb, interval: Duration) -> Self {
        Self { color, interval }
    }
}

impl Scheduler for StaticScheduler {
    fn name(&self) -> &'static str {
        "static"
    }

    fn run(&mut self, tx: &mut Transmitter, cancel: &CancelToken) -> Result<Exit> {
        let Rgb { r, g, b } = self.color;
        info!(r, g, b, "static colour started");
        while !cancel.is_cancelled() {
            tx.send(Command::FxStatic, self.color)?;
            if cancel.wait(self.interval) {
                break;
            }
        }
        Ok(Exit::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        protocol::PacketCounter,
        scheduler::{cancel_pair, testing::RecordingSink},
        LightSyncError,
    };

    #[test]
    fn repeats_the_requested_color() {
        let sink = RecordingSink::default();
        let mut tx = Transmitter::new(Box::new(sink.clone()), Arc::new(PacketCounter::new()));
        let (mut handle, cancel) = cancel_pair();
        let color = Rgb::new(12, 34, 56);
        let mut scheduler = StaticScheduler::new(color, Duration::from_millis(30));

        let worker = std::thread::spawn(move || scheduler.run(&mut tx, &cancel));
        std::thread::sleep(Duration::from_millis(100));
        handle.cancel();

        assert_eq!(worker.join().unwrap().unwrap(), Exit::Cancelled);
        let frames = sink.captured();
        assert!(frames.len() >= 2, "only {} frames", frames.len());
        for captured in &frames {
            assert_eq!(captured.frame.command, Command::FxStatic);
            assert_eq!(captured.frame.color, color);
        }
        for pair in frames.windows(2) {
            assert!(pair[1].frame.packet_id > pair[0].frame.packet_id);
        }
    }

    #[test]
    fn first_frame_is_sent_without_waiting() {
        let sink = RecordingSink::failing_after(1);
        let mut tx = Transmitter::new(Box::new(sink.clone()), Arc::new(PacketCounter::new()));
        let (_handle, cancel) = cancel_pair();
        let mut scheduler = StaticScheduler::new(Rgb::new(1, 1, 1), Duration::from_millis(1));

        assert!(matches!(
            scheduler.run(&mut tx, &cancel),
            Err(LightSyncError::Send(_))
        ));
        assert_eq!(sink.captured().len(), 1);
    }
}
