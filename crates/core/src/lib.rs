//! Core library for the Light Sync dispatcher.
//!
//! Light Sync drives a multicast-addressed lighting rig from analysed music.
//! A [`SessionController`] owns the single active session and launches one of
//! three schedulers: beat playback from a queued [`TrackSync`], a preset
//! [`Effect`], or a static colour. Schedulers turn their input into 8-byte
//! [`Frame`]s sent over a [`NetworkChannel`] with link-local TTL.

pub mod color;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod queue;
pub mod scheduler;
pub mod session;

pub use color::{hsv_to_rgb, FixedHue, HueSource, RandomHue, Rgb, BLINK_PALETTE};
pub use config::{AppConfig, NetworkConfig, TimingConfig};
pub use error::{ErrorInfo, ErrorKind, LightSyncError, Result};
pub use network::{ChannelFactory, FrameSink, MulticastFactory, MulticastListener, NetworkChannel};
pub use protocol::{Arrival, Command, Frame, PacketCounter, SequenceTracker, FRAME_LEN};
pub use queue::{BeatEvent, QueuedTrack, TrackQueue, TrackSync, MAX_BEATS};
pub use scheduler::{Effect, Exit, Scheduler};
pub use session::{SessionController, SessionMode, StartRequest, StatusSnapshot};
