//! Packetized dataflow ports

pub mod packet;
pub mod queue;

use std::time::Duration;

pub use packet::{InputPacket, OutputPacket, PrecisionTime, StreamSri};
pub use queue::{InputQueue, OutputQueue, QueueStats};

/// Source of packets for the transmit bridge
pub trait InputPort: Send + Sync {
    /// Next packet, waiting at most `timeout`
    fn get_packet(&self, timeout: Duration) -> Option<InputPacket>;
}

/// Sink for packets produced by the receive bridge
pub trait OutputPort: Send + Sync {
    /// Announce metadata for a stream before (or between) its packets
    fn push_sri(&self, sri: &StreamSri);

    fn push_packet(&self, packet: OutputPacket);
}
