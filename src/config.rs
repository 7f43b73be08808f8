//! Bridge configuration
//!
//! Loaded from TOML. Every field has a default, so a partial file (or no
//! file at all) yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::args::ArgEntry;
use crate::constants::*;
use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Identifier reported to the event listener
    pub component_id: String,
    /// Block (or device) the streams are attached to
    pub block_id: String,
    pub stream: StreamFormatConfig,
    pub rx: RxConfig,
    pub tx: TxConfig,
    pub worker: WorkerConfig,
    /// Arguments applied to the block at construction
    pub args: Vec<ArgEntry>,
    pub sim: SimConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            component_id: "stream-bridge".to_string(),
            block_id: "0/FIFO_0".to_string(),
            stream: StreamFormatConfig::default(),
            rx: RxConfig::default(),
            tx: TxConfig::default(),
            worker: WorkerConfig::default(),
            args: Vec::new(),
            sim: SimConfig::default(),
        }
    }
}

/// Hardware stream format parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamFormatConfig {
    /// Host-side sample format
    pub cpu_format: String,
    /// Over-the-wire sample format
    pub wire_format: String,
    /// Block port the streamer attaches to
    pub block_port: u32,
    /// Samples per packet when the block does not advertise one
    pub default_spp: usize,
}

impl Default for StreamFormatConfig {
    fn default() -> Self {
        Self {
            cpu_format: DEFAULT_CPU_FORMAT.to_string(),
            wire_format: DEFAULT_WIRE_FORMAT.to_string(),
            block_port: 0,
            default_spp: DEFAULT_SPP,
        }
    }
}

/// Receive path parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RxConfig {
    /// Batch size expressed in hardware packets
    pub batch_packets: usize,
    /// Explicit batch size in samples, overrides `batch_packets`
    pub batch_samples: Option<usize>,
    /// Timeout handed to each hardware receive call
    pub recv_timeout_secs: f64,
    /// Timeout for receive calls while draining after a stop
    pub drain_timeout_secs: f64,
    /// Sample rate advertised in outgoing stream metadata
    pub sample_rate: f64,
}

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            batch_packets: DEFAULT_BATCH_PACKETS,
            batch_samples: None,
            recv_timeout_secs: 1.0,
            drain_timeout_secs: 0.1,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl RxConfig {
    /// Batch size in samples for the given samples-per-packet
    pub fn batch_size(&self, spp: usize) -> usize {
        self.batch_samples.unwrap_or(self.batch_packets * spp)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.recv_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.drain_timeout_secs)
    }
}

/// Transmit path parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TxConfig {
    /// How long one invocation waits for an input packet
    pub input_poll_ms: u64,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self { input_poll_ms: 100 }
    }
}

impl TxConfig {
    pub fn input_poll(&self) -> Duration {
        Duration::from_millis(self.input_poll_ms)
    }
}

/// Worker thread parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Idle time after a `NoOp` invocation
    pub noop_delay_ms: u64,
    /// Grace period `stop()` waits before killing the thread
    pub stop_grace_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            noop_delay_ms: DEFAULT_NOOP_DELAY_MS,
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
        }
    }
}

impl WorkerConfig {
    pub fn noop_delay(&self) -> Duration {
        Duration::from_millis(self.noop_delay_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Simulated hardware and demo parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    /// Loopback FIFO depth in samples
    pub fifo_depth: usize,
    /// Samples per packet advertised by the simulated block
    pub spp: Option<usize>,
    /// Tone frequency fed by the demo source
    pub tone_hz: f64,
    /// Stop the demo after this many seconds (runs until Ctrl-C when unset)
    pub run_secs: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fifo_depth: 1 << 20,
            spp: None,
            tone_hz: 10_000.0,
            run_secs: None,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, crate::Error> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the default location if it exists, or fall back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, crate::Error> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Ok(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Write configuration as TOML
    pub fn save(&self, path: &Path) -> Result<(), crate::Error> {
        let text = toml::to_string_pretty(self).map_err(ConfigError::from)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Platform configuration file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        directories::ProjectDirs::from("org", "sdr", "stream-bridge")
            .map(|dirs| dirs.config_dir().join("bridge.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Reject values the bridge cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_id.is_empty() {
            return Err(ConfigError::Invalid("block_id must not be empty".into()));
        }
        if self.stream.default_spp == 0 {
            return Err(ConfigError::Invalid("default_spp must be positive".into()));
        }
        if self.rx.batch_packets == 0 || self.rx.batch_samples == Some(0) {
            return Err(ConfigError::Invalid("receive batch size must be positive".into()));
        }
        if !(self.rx.recv_timeout_secs > 0.0) || !(self.rx.drain_timeout_secs > 0.0) {
            return Err(ConfigError::Invalid("receive timeouts must be positive".into()));
        }
        if !(self.rx.sample_rate > 0.0) {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.worker.stop_grace_ms == 0 {
            return Err(ConfigError::Invalid("stop_grace_ms must be positive".into()));
        }
        Ok(())
    }
}
