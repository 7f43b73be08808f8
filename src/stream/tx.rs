//! Transmit bridge: input port -> hardware stream

use std::sync::Arc;
use std::time::Duration;

use super::negotiator::{StreamNegotiator, TxSlot};
use super::{bump, TxStats};
use crate::hardware::{TimeSpec, TxMetadata};
use crate::port::InputPort;
use crate::worker::{WorkFunction, WorkState};

/// Transmit-side work function
pub struct TxBridge {
    block_id: String,
    stream: TxSlot,
    negotiator: Arc<StreamNegotiator>,
    input: Arc<dyn InputPort>,
    stats: Arc<TxStats>,
    poll: Duration,
}

impl TxBridge {
    /// Build a bridge and acquire its stream. An unavailable stream leaves
    /// the bridge idle rather than failing.
    pub fn new(negotiator: Arc<StreamNegotiator>, input: Arc<dyn InputPort>, stats: Arc<TxStats>, poll: Duration) -> Self {
        let mut bridge = Self {
            block_id: negotiator.block_id().to_string(),
            stream: None,
            negotiator,
            input,
            stats,
            poll,
        };
        bridge.negotiator.acquire_tx(&mut bridge.stream);
        bridge
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Drop the stream handle
    pub fn release(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("{}: released TX stream", self.block_id);
        }
    }

    /// Forward one input packet
    pub fn process(&mut self) -> WorkState {
        tracing::trace!("{}: TX service function", self.block_id);

        if self.stream.is_none() {
            return WorkState::NoOp;
        }

        let Some(packet) = self.input.get_packet(self.poll) else {
            return WorkState::NoOp;
        };

        if packet.payload.is_empty() {
            if packet.end_of_stream {
                tracing::debug!("{}: EOS", self.block_id);
                self.send_end_of_burst();
            }
            return WorkState::NoOp;
        }

        tracing::debug!("{}: Received {} samples", self.block_id, packet.payload.len());

        let total = packet.payload.len();
        let mut metadata = TxMetadata {
            time_spec: packet.timestamp.map(TimeSpec::from),
            end_of_burst: false,
        };
        let mut sent = 0;

        while sent < total {
            let Some(stream) = self.stream.as_mut() else {
                break;
            };
            let accepted = stream.send(&packet.payload[sent..], &metadata);

            if accepted == 0 {
                tracing::warn!(
                    "{}: TX stream accepted no samples ({} of {} sent), re-acquiring",
                    self.block_id,
                    sent,
                    total
                );
                bump(&self.stats.reacquisitions, 1);
                self.negotiator.acquire_tx(&mut self.stream);
                return if sent > 0 { WorkState::Normal } else { WorkState::NoOp };
            }

            if sent + accepted < total {
                tracing::debug!("{}: partial send of {} samples", self.block_id, accepted);
                bump(&self.stats.partial_sends, 1);
            }
            sent += accepted;
            bump(&self.stats.samples, accepted as u64);

            // The remainder continues the same burst right after this piece
            metadata.time_spec = None;
        }

        bump(&self.stats.packets, 1);
        tracing::debug!("{}: Sent data", self.block_id);

        if packet.end_of_stream {
            tracing::debug!("{}: EOS", self.block_id);
            self.send_end_of_burst();
        }

        WorkState::Normal
    }

    /// Zero-length send carrying only the end-of-burst flag
    fn send_end_of_burst(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.send(&[], &TxMetadata::end_of_burst());
            bump(&self.stats.end_of_streams, 1);
        }
    }
}

impl WorkFunction for TxBridge {
    fn work(&mut self) -> WorkState {
        self.process()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamFormatConfig;
    use crate::hardware::testing::{MockBlock, MockDevice, ScriptedTx, SendRecord};
    use crate::hardware::{BlockControl, Direction, Sample, TxStream};
    use crate::port::{InputPacket, InputQueue, PrecisionTime};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::Ordering;

    struct Fixture {
        bridge: TxBridge,
        input: Arc<InputQueue>,
        device: Arc<MockDevice>,
        logs: Arc<Mutex<Vec<Arc<Mutex<Vec<SendRecord>>>>>>,
        stats: Arc<TxStats>,
    }

    impl Fixture {
        /// Sends across every stream opened so far
        fn sends(&self) -> Vec<SendRecord> {
            self.logs.lock().iter().flat_map(|log| log.lock().clone()).collect()
        }
    }

    /// Each opened stream takes the next script; later streams accept everything
    fn fixture(scripts: Vec<Vec<usize>>) -> Fixture {
        let scripts = Mutex::new(VecDeque::from(scripts));
        let logs = Arc::new(Mutex::new(Vec::new()));
        let opened = logs.clone();
        let device = Arc::new(MockDevice::new(None).with_tx(move || -> Box<dyn TxStream> {
            let script = scripts.lock().pop_front().unwrap_or_default();
            let (tx, log) = ScriptedTx::new(script);
            opened.lock().push(log);
            Box::new(tx)
        }));
        let block: Arc<dyn BlockControl> = Arc::new(MockBlock::new("b"));
        let negotiator = Arc::new(StreamNegotiator::new(device.clone(), block, StreamFormatConfig::default()));

        let input = Arc::new(InputQueue::new(8));
        let stats = Arc::new(TxStats::default());
        let bridge = TxBridge::new(negotiator, input.clone(), stats.clone(), Duration::from_millis(1));
        Fixture {
            bridge,
            input,
            device,
            logs,
            stats,
        }
    }

    fn ramp(n: usize) -> Vec<Sample> {
        (0..n as i16).map(|i| Sample::new(i, i)).collect()
    }

    #[test]
    fn test_no_packet_is_noop() {
        let mut f = fixture(Vec::new());
        assert_eq!(f.bridge.process(), WorkState::NoOp);
        assert!(f.sends().is_empty());
    }

    #[test]
    fn test_empty_eos_packet_sends_end_of_burst() {
        let mut f = fixture(Vec::new());
        f.input.push(InputPacket::end_of_stream("s"));

        assert_eq!(f.bridge.process(), WorkState::NoOp);
        let sends = f.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].requested, 0);
        assert!(sends[0].metadata.end_of_burst);
    }

    #[test]
    fn test_empty_packet_without_eos_sends_nothing() {
        let mut f = fixture(Vec::new());
        f.input.push(InputPacket::default());
        assert_eq!(f.bridge.process(), WorkState::NoOp);
        assert!(f.sends().is_empty());
    }

    #[test]
    fn test_partial_send_is_retried() {
        let mut f = fixture(vec![vec![3]]);
        f.input
            .push(InputPacket::new("s", ramp(10), PrecisionTime::new(5.0, 0.25)));

        assert_eq!(f.bridge.process(), WorkState::Normal);
        let sends = f.sends();
        assert_eq!(sends.len(), 2);
        assert_eq!(sends.iter().map(|s| s.accepted).sum::<usize>(), 10);
        assert_eq!(sends[1].requested, 7);
        assert_eq!(sends[1].first_value, Some(Sample::new(3, 3)));
        assert_eq!(sends[0].metadata.time_spec, Some(TimeSpec::new(5, 0.25)));
        assert_eq!(sends[1].metadata.time_spec, None);
        assert!(!sends[1].metadata.end_of_burst);

        assert_eq!(f.device.open_count(Direction::Tx), 1);
        assert_eq!(f.stats.partial_sends.load(Ordering::Relaxed), 1);
        assert_eq!(f.stats.reacquisitions.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_zero_progress_reacquires_and_abandons_packet() {
        let mut f = fixture(vec![vec![4, 0]]);
        f.input.push(InputPacket::new("s", ramp(10), PrecisionTime::default()));
        f.input.push(InputPacket::new("s", ramp(6), PrecisionTime::default()));

        assert_eq!(f.bridge.process(), WorkState::Normal);
        assert_eq!(f.device.open_count(Direction::Tx), 2);
        assert_eq!(f.sends().len(), 2);

        // The rest of the first packet is not retried; the next packet uses the new stream
        assert_eq!(f.bridge.process(), WorkState::Normal);
        let sends = f.sends();
        assert_eq!(sends.len(), 3);
        assert_eq!(sends[2].requested, 6);
    }

    #[test]
    fn test_zero_progress_on_first_attempt_is_noop() {
        let mut f = fixture(vec![vec![0]]);
        f.input.push(InputPacket::new("s", ramp(4), PrecisionTime::default()));
        assert_eq!(f.bridge.process(), WorkState::NoOp);
        assert_eq!(f.stats.reacquisitions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_eos_after_payload() {
        let mut f = fixture(Vec::new());
        let mut packet = InputPacket::new("s", ramp(5), PrecisionTime::default());
        packet.end_of_stream = true;
        f.input.push(packet);

        assert_eq!(f.bridge.process(), WorkState::Normal);
        let sends = f.sends();
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[0].requested, 5);
        assert!(!sends[0].metadata.end_of_burst);
        assert_eq!(sends[1].requested, 0);
        assert!(sends[1].metadata.end_of_burst);
    }

    #[test]
    fn test_missing_stream_is_noop() {
        let device = Arc::new(MockDevice::new(None));
        let block: Arc<dyn BlockControl> = Arc::new(MockBlock::new("b"));
        let negotiator = Arc::new(StreamNegotiator::new(device, block, StreamFormatConfig::default()));
        let input = Arc::new(InputQueue::new(1));
        input.push(InputPacket::new("s", ramp(2), PrecisionTime::default()));

        let mut bridge = TxBridge::new(negotiator, input.clone(), Arc::default(), Duration::from_millis(1));
        assert!(!bridge.has_stream());
        assert_eq!(bridge.process(), WorkState::NoOp);
        // The packet stays queued
        assert_eq!(input.len(), 1);
    }
}
