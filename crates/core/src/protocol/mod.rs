//! Wire format shared with the lighting rig.
//!
//! Every command is a fixed 8-byte little-endian frame:
//!
//! | byte | field       |
//! |------|-------------|
//! | 0    | command     |
//! | 1..4 | r, g, b     |
//! | 4..8 | packet id   |
//!
//! Packet ids come from a process-wide counter so that receivers can spot
//! gaps, duplicates and reordering across session restarts.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};

use crate::{LightSyncError, Result, Rgb};

pub const FRAME_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    BeatSync = 0x01,
    FxBlink = 0x03,
    FxStatic = 0x04,
}

impl Command {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = LightSyncError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::BeatSync),
            0x03 => Ok(Self::FxBlink),
            0x04 => Ok(Self::FxStatic),
            other => Err(LightSyncError::invalid(format!(
                "unknown command byte {other:#04x}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub color: Rgb,
    pub packet_id: u32,
}

impl Frame {
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = self.command.as_byte();
        bytes[1] = self.color.r;
        bytes[2] = self.color.g;
        bytes[3] = self.color.b;
        bytes[4..].copy_from_slice(&self.packet_id.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let bytes: &[u8; FRAME_LEN] = bytes.try_into().map_err(|_| {
            LightSyncError::invalid(format!(
                "frame must be {FRAME_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        let command = Command::try_from(bytes[0])?;
        let packet_id = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok(Self {
            command,
            color: Rgb::new(bytes[1], bytes[2], bytes[3]),
            packet_id,
        })
    }
}

/// Monotonic 32-bit packet id source. Wraps at 2^32 and is never reset.
#[derive(Debug, Default)]
pub struct PacketCounter {
    last: Mutex<u32>,
}

impl PacketCounter {
    pub const fn new() -> Self {
        Self {
            last: Mutex::new(0),
        }
    }

    /// The counter shared by every session in this process.
    pub fn global() -> Arc<PacketCounter> {
        static GLOBAL: OnceLock<Arc<PacketCounter>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(PacketCounter::new()))
            .clone()
    }

    /// Advances the counter and returns the id to stamp on the next frame.
    pub fn next_id(&self) -> u32 {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        *last = last.wrapping_add(1);
        *last
    }

    /// Builds a frame carrying the next packet id.
    pub fn stamp(&self, command: Command, color: Rgb) -> Frame {
        Frame {
            command,
            color,
            packet_id: self.next_id(),
        }
    }
}

/// How a received packet id relates to the ones seen before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    First,
    InOrder,
    /// `missed` ids were skipped between the previous packet and this one.
    Gap { missed: u32 },
    /// Duplicate or reordered; already superseded by a newer id.
    Stale,
}

/// Receiver-side bookkeeping over packet ids, wrap-around aware.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last: Option<u32>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, packet_id: u32) -> Arrival {
        let Some(last) = self.last else {
            self.last = Some(packet_id);
            return Arrival::First;
        };

        let distance = packet_id.wrapping_sub(last);
        if distance == 0 || distance > u32::MAX / 2 {
            return Arrival::Stale;
        }

        self.last = Some(packet_id);
        if distance == 1 {
            Arrival::InOrder
        } else {
            Arrival::Gap {
                missed: distance - 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_little_endian_layout() {
        let frame = Frame {
            command: Command::FxStatic,
            color: Rgb::new(10, 20, 30),
            packet_id: 0x0102_0304,
        };
        assert_eq!(frame.encode(), [0x04, 10, 20, 30, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn decodes_frames_and_rejects_garbage() {
        let frame = Frame::decode(&[0x01, 255, 0, 0, 7, 0, 0, 0]).unwrap();
        assert_eq!(frame.command, Command::BeatSync);
        assert_eq!(frame.color, Rgb::new(255, 0, 0));
        assert_eq!(frame.packet_id, 7);

        assert!(Frame::decode(&[0x01, 0, 0]).is_err());
        let err = Frame::decode(&[0x02, 0, 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert!(format!("{err}").contains("0x02"));
    }

    #[test]
    fn counter_is_strictly_increasing_and_wraps() {
        let counter = PacketCounter::new();
        assert_eq!(counter.next_id(), 1);
        assert_eq!(counter.next_id(), 2);

        let counter = PacketCounter {
            last: Mutex::new(u32::MAX),
        };
        assert_eq!(counter.next_id(), 0);
        assert_eq!(counter.next_id(), 1);
    }

    #[test]
    fn counter_is_consistent_across_threads() {
        let counter = Arc::new(PacketCounter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || (0..250).map(|_| counter.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids: Vec<u32> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 1000);
        assert_eq!(ids.last(), Some(&1000));
    }

    #[test]
    fn tracker_classifies_arrivals() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(10), Arrival::First);
        assert_eq!(tracker.observe(11), Arrival::InOrder);
        assert_eq!(tracker.observe(14), Arrival::Gap { missed: 2 });
        assert_eq!(tracker.observe(14), Arrival::Stale);
        assert_eq!(tracker.observe(12), Arrival::Stale);
        assert_eq!(tracker.observe(15), Arrival::InOrder);
    }

    #[test]
    fn tracker_follows_wrap_around() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(u32::MAX - 1);
        assert_eq!(tracker.observe(u32::MAX), Arrival::InOrder);
        assert_eq!(tracker.observe(0), Arrival::InOrder);
        assert_eq!(tracker.observe(2), Arrival::Gap { missed: 1 });
    }
}
