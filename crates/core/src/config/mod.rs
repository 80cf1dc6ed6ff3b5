use std::{
    net::{Ipv4Addr, SocketAddrV4},
    path::Path,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{LightSyncError, Result};

/// Top-level configuration structure for the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub timing: TimingConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.timing.validate()
    }
}

/// Where frames go on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub multicast_group: Ipv4Addr,
    pub port: u16,
    /// Multicast TTL. Only 1 is accepted, which keeps commands on the local
    /// segment.
    pub ttl: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            multicast_group: Ipv4Addr::new(239, 1, 1, 1),
            port: 1234,
            ttl: 1,
        }
    }
}

impl NetworkConfig {
    pub fn destination(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.multicast_group, self.port)
    }

    fn validate(&self) -> Result<()> {
        if !self.multicast_group.is_multicast() {
            return Err(LightSyncError::Config(format!(
                "`{}` is not a multicast group address",
                self.multicast_group
            )));
        }
        if self.port == 0 {
            return Err(LightSyncError::Config("port must be non-zero".into()));
        }
        if self.ttl != 1 {
            return Err(LightSyncError::Config(format!(
                "ttl {} would route commands off the local segment, only 1 is allowed",
                self.ttl
            )));
        }
        Ok(())
    }
}

/// Scheduler and controller timing knobs, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub keep_alive_ms: u64,
    pub blink_interval_ms: u64,
    pub join_timeout_ms: u64,
    pub settle_ms: u64,
    pub min_sleep_ms: u64,
    /// Brightness floor applied to the quietest beat.
    pub min_intensity: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            keep_alive_ms: 900,
            blink_interval_ms: 500,
            join_timeout_ms: 1_000,
            settle_ms: 100,
            min_sleep_ms: 5,
            min_intensity: 0.3,
        }
    }
}

impl TimingConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn blink_interval(&self) -> Duration {
        Duration::from_millis(self.blink_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn min_sleep(&self) -> Duration {
        Duration::from_millis(self.min_sleep_ms)
    }

    fn validate(&self) -> Result<()> {
        let intervals = [
            ("keep_alive_ms", self.keep_alive_ms),
            ("blink_interval_ms", self.blink_interval_ms),
            ("min_sleep_ms", self.min_sleep_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(LightSyncError::Config(format!("{name} must be non-zero")));
            }
        }
        if !(0.0..=1.0).contains(&self.min_intensity) {
            return Err(LightSyncError::Config(format!(
                "min_intensity {} is outside [0, 1]",
                self.min_intensity
            )));
        }
        Ok(())
    }
}
