use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{CancelToken, Exit, Scheduler, Transmitter};
use crate::{color::BLINK_PALETTE, protocol::Command, LightSyncError, Result, Rgb};

/// Preset effects the rig understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Blink,
}

impl Effect {
    pub fn name(self) -> &'static str {
        match self {
            Effect::Blink => "blink",
        }
    }
}

impl FromStr for Effect {
    type Err = LightSyncError;

    fn from_str(name: &str) -> Result<Self> {
        match name.trim() {
            "blink" => Ok(Effect::Blink),
            other => Err(LightSyncError::invalid(format!("unknown effect `{other}`"))),
        }
    }
}

/// Alternates palette colours with black, stepping through the palette on
/// every lit phase.
pub struct EffectScheduler {
    effect: Effect,
    interval: Duration,
    blink_on: bool,
    palette_index: usize,
}

impl EffectScheduler {
    pub fn new(effect: Effect, interval: Duration) -> Self {
        Self {
            effect,
            interval,
            blink_on: true,
            palette_index: 0,
        }
    }

    fn next_color(&mut self) -> Rgb {
        let color = if self.blink_on {
            let color = BLINK_PALETTE[self.palette_index];
            self.palette_index = (self.palette_index + 1) % BLINK_PALETTE.len();
            color
        } else {
            Rgb::BLACK
        };
        self.blink_on = !self.blink_on;
        color
    }
}

impl Scheduler for EffectScheduler {
    fn name(&self) -> &'static str {
        self.effect.name()
    }

    fn run(&mut self, tx: &mut Transmitter, cancel: &CancelToken) -> Result<Exit> {
        info!(effect = self.effect.name(), "effect started");
        while !cancel.is_cancelled() {
            let color = match self.effect {
                Effect::Blink => self.next_color(),
            };
            tx.send(Command::FxBlink, color)?;
            if cancel.wait(self.interval) {
                break;
            }
        }
        Ok(Exit::Cancelled)
    }
}
