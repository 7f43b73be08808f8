//! Hardware stream bridging
//!
//! The receive and transmit bridges are the work functions run by the two
//! worker threads. Each owns its stream handle outright.

pub mod controller;
pub mod negotiator;
pub mod rx;
pub mod tx;

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

pub use controller::ContinuousStreamController;
pub use negotiator::{RxSlot, StreamNegotiator, TxSlot};
pub use rx::RxBridge;
pub use tx::TxBridge;

use crate::port::StreamSri;

/// Destination stream identity announced from upstream.
///
/// The receive bridge emits nothing until this has been opened once.
#[derive(Default)]
pub struct StreamGate {
    active: RwLock<Option<StreamSri>>,
}

impl StreamGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the active stream, replacing any previous one
    pub fn open(&self, sri: StreamSri) {
        *self.active.write() = Some(sri);
    }

    /// Close the gate if `stream_id` is the active stream
    pub fn close(&self, stream_id: &str) -> bool {
        let mut active = self.active.write();
        if active.as_ref().is_some_and(|sri| sri.stream_id == stream_id) {
            *active = None;
            true
        } else {
            false
        }
    }

    pub fn current(&self) -> Option<StreamSri> {
        self.active.read().clone()
    }

    pub fn is_open(&self) -> bool {
        self.active.read().is_some()
    }
}

/// Receive path counters
#[derive(Debug, Default)]
pub struct RxStats {
    pub packets: AtomicU64,
    pub samples: AtomicU64,
    pub overflows: AtomicU64,
    pub timeouts: AtomicU64,
    pub restarts: AtomicU64,
}

/// Transmit path counters
#[derive(Debug, Default)]
pub struct TxStats {
    pub packets: AtomicU64,
    pub samples: AtomicU64,
    pub partial_sends: AtomicU64,
    pub reacquisitions: AtomicU64,
    pub end_of_streams: AtomicU64,
}

/// Point-in-time copy of the counters of both paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub rx_packets: u64,
    pub rx_samples: u64,
    pub rx_overflows: u64,
    pub rx_timeouts: u64,
    pub rx_restarts: u64,
    pub tx_packets: u64,
    pub tx_samples: u64,
    pub tx_partial_sends: u64,
    pub tx_reacquisitions: u64,
    pub tx_end_of_streams: u64,
}

impl StatsSnapshot {
    pub fn capture(rx: &RxStats, tx: &TxStats) -> Self {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        Self {
            rx_packets: load(&rx.packets),
            rx_samples: load(&rx.samples),
            rx_overflows: load(&rx.overflows),
            rx_timeouts: load(&rx.timeouts),
            rx_restarts: load(&rx.restarts),
            tx_packets: load(&tx.packets),
            tx_samples: load(&tx.samples),
            tx_partial_sends: load(&tx.partial_sends),
            tx_reacquisitions: load(&tx.reacquisitions),
            tx_end_of_streams: load(&tx.end_of_streams),
        }
    }
}

pub(crate) fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}
