//! Timing loops that decide when and what to send during a session.
//!
//! Each scheduler runs on its own thread and owns the session's
//! [`FrameSink`]. Sleeping between packets goes through [`CancelToken::wait`],
//! so a stop request interrupts the current wait instead of being noticed only
//! after it has elapsed.

mod beat;
mod effect;
mod static_color;

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::debug;

use crate::{
    network::FrameSink,
    protocol::{Command, Frame, PacketCounter},
    LightSyncError, Result, Rgb,
};

pub use beat::{next_sleep, BeatAction, BeatScheduler, BeatTiming, PlaybackCursor};
pub use effect::{Effect, EffectScheduler};
pub use static_color::StaticScheduler;

/// How a scheduler loop ended when no error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Every beat was sent.
    Completed,
    /// A stop request was observed.
    Cancelled,
}

/// A timing loop driving one session.
pub trait Scheduler: Send {
    fn name(&self) -> &'static str;

    fn run(&mut self, tx: &mut Transmitter, cancel: &CancelToken) -> Result<Exit>;
}

/// Creates a linked cancellation pair.
///
/// Nothing is ever sent on the channel: cancellation is the sender going
/// away, which every later receive observes.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = bounded(0);
    (CancelHandle { tx: Some(tx) }, CancelToken { rx })
}

/// Controller side of a cancellation signal. Dropping it also cancels.
#[derive(Debug)]
pub struct CancelHandle {
    tx: Option<Sender<()>>,
}

impl CancelHandle {
    pub fn cancel(&mut self) {
        self.tx.take();
    }
}

/// Scheduler side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleeps for `timeout` unless cancelled first. Returns `true` when the
    /// session has been cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}

/// Stamps, encodes and sends frames for the running session.
pub struct Transmitter {
    sink: Box<dyn FrameSink>,
    counter: Arc<PacketCounter>,
    sent: u64,
}

impl Transmitter {
    pub fn new(sink: Box<dyn FrameSink>, counter: Arc<PacketCounter>) -> Self {
        Self {
            sink,
            counter,
            sent: 0,
        }
    }

    /// Sends one frame. Failures are final for the session.
    pub fn send(&mut self, command: Command, color: Rgb) -> Result<Frame> {
        let frame = self.counter.stamp(command, color);
        self.sink
            .send_frame(&frame.encode())
            .map_err(LightSyncError::Send)?;
        self.sent += 1;

        let sent_at_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        debug!(
            target: "light_sync::wire",
            packet_id = frame.packet_id,
            command = command.as_byte(),
            r = color.r,
            g = color.g,
            b = color.b,
            sent_at_ns = sent_at_ns as u64,
            "sent"
        );
        Ok(frame)
    }

    /// Number of frames sent through this transmitter.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}
