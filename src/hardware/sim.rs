//! Simulated loopback hardware
//!
//! Samples sent on a transmit stream come back out of the receive stream,
//! with burst boundaries preserved and timestamps derived from the sample
//! count. The FIFO between them is bounded: a full FIFO makes sends
//! partial and flags an overflow on the next receive.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::*;
use crate::constants::SPP_HINT;

/// How long a send waits for FIFO space before returning short
const SEND_WAIT: Duration = Duration::from_millis(50);

#[derive(Default)]
struct LoopbackState {
    fifo: VecDeque<Sample>,
    /// Absolute sample indices at which a burst ends
    burst_ends: VecDeque<u64>,
    written: u64,
    read: u64,
    streaming: bool,
    overflow: bool,
}

struct Loopback {
    state: Mutex<LoopbackState>,
    ready: Condvar,
    depth: usize,
    sample_rate: f64,
}

/// In-memory device with a single block and a TX -> RX loopback
pub struct SimDevice {
    block: Arc<SimBlock>,
    loopback: Arc<Loopback>,
}

impl SimDevice {
    pub fn new(block: SimBlock, fifo_depth: usize, sample_rate: f64) -> Self {
        Self {
            block: Arc::new(block),
            loopback: Arc::new(Loopback {
                state: Mutex::new(LoopbackState::default()),
                ready: Condvar::new(),
                depth: fifo_depth.max(1),
                sample_rate,
            }),
        }
    }

    /// Samples currently buffered in the loopback FIFO
    pub fn buffered(&self) -> usize {
        self.loopback.state.lock().fifo.len()
    }

    pub fn sim_block(&self) -> &Arc<SimBlock> {
        &self.block
    }
}

impl StreamDevice for SimDevice {
    fn open_rx_stream(&self, config: &StreamEndpointConfig) -> Result<Box<dyn RxStream>, HardwareError> {
        self.check_endpoint(config)?;
        tracing::debug!("sim: opened RX stream {}", config);
        Ok(Box::new(SimRxStream {
            loopback: self.loopback.clone(),
        }))
    }

    fn open_tx_stream(&self, config: &StreamEndpointConfig) -> Result<Box<dyn TxStream>, HardwareError> {
        self.check_endpoint(config)?;
        tracing::debug!("sim: opened TX stream {}", config);
        Ok(Box::new(SimTxStream {
            loopback: self.loopback.clone(),
        }))
    }

    fn block(&self, block_id: &str) -> Option<Arc<dyn BlockControl>> {
        if self.block.block_id() == block_id {
            Some(self.block.clone() as Arc<dyn BlockControl>)
        } else {
            None
        }
    }
}

impl SimDevice {
    fn check_endpoint(&self, config: &StreamEndpointConfig) -> Result<(), HardwareError> {
        if config.block_id != self.block.block_id() {
            return Err(HardwareError::BlockNotFound(config.block_id.clone()));
        }
        if config.cpu_format != "sc16" || config.wire_format != "sc16" {
            return Err(HardwareError::StreamRejected(format!(
                "unsupported format {}/{}",
                config.cpu_format, config.wire_format
            )));
        }
        Ok(())
    }
}

struct SimRxStream {
    loopback: Arc<Loopback>,
}

impl RxStream for SimRxStream {
    fn recv(&mut self, buf: &mut [Sample], timeout: Duration) -> (usize, RxMetadata) {
        let lb = &self.loopback;
        let deadline = Instant::now() + timeout;
        let mut state = lb.state.lock();

        while state.fifo.is_empty() {
            // Once stopped, only what is already buffered comes out
            if !state.streaming || lb.ready.wait_until(&mut state, deadline).timed_out() {
                if state.fifo.is_empty() {
                    return (0, RxMetadata::with_error(RxErrorCode::Timeout));
                }
            }
        }

        let mut count = buf.len().min(state.fifo.len());
        let mut end_of_burst = false;
        if let Some(&end) = state.burst_ends.front() {
            let until_end = (end - state.read) as usize;
            if until_end <= count {
                count = until_end;
                end_of_burst = true;
                state.burst_ends.pop_front();
            }
        }

        for (slot, sample) in buf.iter_mut().zip(state.fifo.drain(..count)) {
            *slot = sample;
        }

        let time_spec = TimeSpec::from_ticks(state.read, lb.sample_rate);
        state.read += count as u64;

        let error = if std::mem::take(&mut state.overflow) {
            RxErrorCode::Overflow
        } else {
            RxErrorCode::None
        };
        drop(state);
        lb.ready.notify_all();

        (
            count,
            RxMetadata {
                time_spec,
                end_of_burst,
                error,
            },
        )
    }

    fn issue(&mut self, command: StreamCommand) -> Result<(), HardwareError> {
        let mut state = self.loopback.state.lock();
        state.streaming = matches!(command, StreamCommand::StartContinuous { .. });
        drop(state);
        self.loopback.ready.notify_all();
        Ok(())
    }
}

struct SimTxStream {
    loopback: Arc<Loopback>,
}

impl TxStream for SimTxStream {
    fn send(&mut self, buf: &[Sample], metadata: &TxMetadata) -> usize {
        let lb = &self.loopback;
        let mut state = lb.state.lock();

        if state.fifo.len() >= lb.depth && !buf.is_empty() {
            state.overflow = true;
            let deadline = Instant::now() + SEND_WAIT;
            while state.fifo.len() >= lb.depth {
                if lb.ready.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
        }

        let accepted = buf.len().min(lb.depth.saturating_sub(state.fifo.len()));
        state.fifo.extend(&buf[..accepted]);
        state.written += accepted as u64;

        // A burst ends after the last accepted sample of an end-of-burst send
        if metadata.end_of_burst && accepted == buf.len() {
            let written = state.written;
            if state.burst_ends.back().map_or(written > state.read, |&end| end < written) {
                state.burst_ends.push_back(written);
            }
        }
        drop(state);
        lb.ready.notify_all();

        accepted
    }
}

/// Simulated processing block
pub struct SimBlock {
    id: String,
    args: Mutex<HashMap<String, String>>,
    /// Allowed values per argument; writes of other values are ignored
    allowed: HashMap<String, Vec<String>>,
    hints: HashMap<String, String>,
}

impl SimBlock {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            args: Mutex::new(HashMap::new()),
            allowed: HashMap::new(),
            hints: HashMap::new(),
        }
    }

    pub fn with_spp(mut self, spp: usize) -> Self {
        self.hints.insert(SPP_HINT.to_string(), spp.to_string());
        self
    }

    /// Restrict `id` to the given values
    pub fn with_allowed(mut self, id: &str, values: &[&str]) -> Self {
        self.allowed
            .insert(id.to_string(), values.iter().map(|v| v.to_string()).collect());
        self
    }
}

impl BlockControl for SimBlock {
    fn block_id(&self) -> &str {
        &self.id
    }

    fn set_arg(&self, id: &str, value: &str) -> Result<(), HardwareError> {
        if let Some(allowed) = self.allowed.get(id) {
            if !allowed.iter().any(|v| v == value) {
                tracing::debug!("sim: {} ignoring {}={}", self.id, id, value);
                return Ok(());
            }
        }
        self.args.lock().insert(id.to_string(), value.to_string());
        Ok(())
    }

    fn get_arg(&self, id: &str) -> Option<String> {
        self.args.lock().get(id).cloned()
    }

    fn hint(&self, name: &str) -> Option<String> {
        self.hints.get(name).cloned()
    }

    fn clear(&self) {
        self.args.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> StreamEndpointConfig {
        StreamEndpointConfig {
            block_id: "0/FIFO_0".into(),
            port: 0,
            cpu_format: "sc16".into(),
            wire_format: "sc16".into(),
            samples_per_packet: 64,
        }
    }

    fn ramp(n: usize) -> Vec<Sample> {
        (0..n as i16).map(|i| Sample::new(i, -i)).collect()
    }

    #[test]
    fn test_loopback_preserves_samples_and_bursts() {
        let device = SimDevice::new(SimBlock::new("0/FIFO_0"), 1024, 1000.0);
        let mut rx = device.open_rx_stream(&endpoint()).unwrap();
        let mut tx = device.open_tx_stream(&endpoint()).unwrap();
        rx.issue(StreamCommand::start_now()).unwrap();

        assert_eq!(tx.send(&ramp(10), &TxMetadata::default()), 10);
        assert_eq!(tx.send(&[], &TxMetadata::end_of_burst()), 0);
        assert_eq!(tx.send(&ramp(5), &TxMetadata::default()), 5);

        let mut buf = vec![Sample::default(); 32];
        let (n, md) = rx.recv(&mut buf, Duration::from_millis(10));
        assert_eq!(n, 10);
        assert!(md.end_of_burst);
        assert_eq!(md.error, RxErrorCode::None);
        assert_eq!(buf[9], Sample::new(9, -9));

        let (n, md) = rx.recv(&mut buf, Duration::from_millis(10));
        assert_eq!(n, 5);
        assert!(!md.end_of_burst);
        assert_eq!(md.time_spec, TimeSpec::from_ticks(10, 1000.0));
    }

    #[test]
    fn test_full_fifo_gives_partial_send_and_overflow() {
        let device = SimDevice::new(SimBlock::new("0/FIFO_0"), 8, 1000.0);
        let mut rx = device.open_rx_stream(&endpoint()).unwrap();
        let mut tx = device.open_tx_stream(&endpoint()).unwrap();
        rx.issue(StreamCommand::start_now()).unwrap();

        assert_eq!(tx.send(&ramp(12), &TxMetadata::default()), 8);
        assert_eq!(tx.send(&ramp(4), &TxMetadata::default()), 0);

        let mut buf = vec![Sample::default(); 16];
        let (n, md) = rx.recv(&mut buf, Duration::from_millis(10));
        assert_eq!(n, 8);
        assert_eq!(md.error, RxErrorCode::Overflow);
    }

    #[test]
    fn test_stopped_stream_times_out_when_empty() {
        let device = SimDevice::new(SimBlock::new("0/FIFO_0"), 8, 1000.0);
        let mut rx = device.open_rx_stream(&endpoint()).unwrap();
        let mut buf = vec![Sample::default(); 4];
        let (n, md) = rx.recv(&mut buf, Duration::from_millis(1));
        assert_eq!(n, 0);
        assert_eq!(md.error, RxErrorCode::Timeout);
    }

    #[test]
    fn test_block_rejects_disallowed_values() {
        let block = SimBlock::new("0/FIFO_0").with_allowed("mode", &["a", "b"]);
        block.set_arg("mode", "a").unwrap();
        block.set_arg("mode", "z").unwrap();
        assert_eq!(block.get_arg("mode").as_deref(), Some("a"));
    }

    #[test]
    fn test_unknown_block_and_format_rejected() {
        let device = SimDevice::new(SimBlock::new("0/FIFO_0"), 8, 1000.0);
        let mut config = endpoint();
        config.cpu_format = "fc32".into();
        assert!(device.open_rx_stream(&config).is_err());
        assert!(device.block("0/Radio_0").is_none());
    }
}
