//! Hardware streaming capability
//!
//! The radio SDK is a black box to the bridge. It is reached only through
//! the traits in this module: a [`StreamDevice`] that hands out receive and
//! transmit streams, and a [`BlockControl`] for runtime arguments.

#[cfg(feature = "sim")]
pub mod sim;
#[cfg(test)]
pub(crate) mod testing;

use num_complex::Complex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::HardwareError;

/// One complex int16 sample (sc16)
pub type Sample = Complex<i16>;

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Rx,
    Tx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rx => write!(f, "RX"),
            Direction::Tx => write!(f, "TX"),
        }
    }
}

/// Hardware time: whole seconds plus fractional seconds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeSpec {
    pub full_secs: i64,
    pub frac_secs: f64,
}

impl TimeSpec {
    /// Build a normalized time spec (`0 <= frac_secs < 1`)
    pub fn new(full_secs: i64, frac_secs: f64) -> Self {
        let carry = frac_secs.floor();
        Self {
            full_secs: full_secs + carry as i64,
            frac_secs: frac_secs - carry,
        }
    }

    /// Time of the `count`-th sample at `rate` samples per second
    pub fn from_ticks(count: u64, rate: f64) -> Self {
        let whole = (count as f64 / rate).floor();
        let remainder = count as f64 - whole * rate;
        Self::new(whole as i64, remainder / rate)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.full_secs as f64 + self.frac_secs
    }
}

/// Status of one receive call
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RxErrorCode {
    #[default]
    None,
    Timeout,
    Overflow,
    /// Any other fault, with the hardware's description
    Other(String),
}

/// Metadata returned by a receive call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RxMetadata {
    pub time_spec: TimeSpec,
    pub end_of_burst: bool,
    pub error: RxErrorCode,
}

impl RxMetadata {
    pub fn with_error(error: RxErrorCode) -> Self {
        Self {
            error,
            ..Self::default()
        }
    }
}

/// Metadata handed to a send call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TxMetadata {
    /// Transmit at this time; `None` sends as soon as possible
    pub time_spec: Option<TimeSpec>,
    pub end_of_burst: bool,
}

impl TxMetadata {
    /// Metadata for the zero-length send that terminates a burst
    pub fn end_of_burst() -> Self {
        Self {
            time_spec: None,
            end_of_burst: true,
        }
    }
}

/// Streaming commands understood by a receive stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamCommand {
    /// Stream until told to stop, either now or at `time_spec`
    StartContinuous { stream_now: bool, time_spec: TimeSpec },
    StopContinuous,
}

impl StreamCommand {
    /// Start continuous streaming immediately
    pub fn start_now() -> Self {
        StreamCommand::StartContinuous {
            stream_now: true,
            time_spec: TimeSpec::default(),
        }
    }
}

/// Parameters a stream is opened with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpointConfig {
    pub block_id: String,
    pub port: u32,
    pub cpu_format: String,
    pub wire_format: String,
    pub samples_per_packet: usize,
}

impl fmt::Display for StreamEndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} block_id={},block_port={},spp={}",
            self.cpu_format, self.wire_format, self.block_id, self.port, self.samples_per_packet
        )
    }
}

/// A receive stream handle
pub trait RxStream: Send {
    /// Receive up to `buf.len()` samples, blocking at most `timeout`
    fn recv(&mut self, buf: &mut [Sample], timeout: Duration) -> (usize, RxMetadata);

    /// Issue a streaming command
    fn issue(&mut self, command: StreamCommand) -> Result<(), HardwareError>;
}

/// A transmit stream handle
pub trait TxStream: Send {
    /// Send samples, returning how many the hardware accepted
    fn send(&mut self, buf: &[Sample], metadata: &TxMetadata) -> usize;
}

/// Device able to open streams to its blocks
pub trait StreamDevice: Send + Sync {
    fn open_rx_stream(&self, config: &StreamEndpointConfig) -> Result<Box<dyn RxStream>, HardwareError>;

    fn open_tx_stream(&self, config: &StreamEndpointConfig) -> Result<Box<dyn TxStream>, HardwareError>;

    /// Resolve a processing block by id
    fn block(&self, block_id: &str) -> Option<Arc<dyn BlockControl>>;
}

/// Runtime argument access on a processing block
pub trait BlockControl: Send + Sync {
    fn block_id(&self) -> &str;

    fn set_arg(&self, id: &str, value: &str) -> Result<(), HardwareError>;

    fn get_arg(&self, id: &str) -> Option<String>;

    /// Block-advertised value such as `spp`
    fn hint(&self, name: &str) -> Option<String>;

    /// Reset the block to its idle state
    fn clear(&self);
}
