//! # SDR Stream Bridge
//!
//! Moves complex samples between a continuously streaming radio block and
//! packetized dataflow ports.
//!
//! ## Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────┐
//!   lifecycle thread ───▶│  BridgeComponent (component) │──▶ BridgeEvents
//!                        └───────┬──────────────┬───────┘
//!                  on_enable(Rx) │              │ on_enable(Tx)
//!                                ▼              ▼
//!                     ┌──────────────┐   ┌──────────────┐
//!                     │ RX worker    │   │ TX worker    │   (worker)
//!                     │ ┌──────────┐ │   │ ┌──────────┐ │
//!                     │ │ RxBridge │ │   │ │ TxBridge │ │   (stream)
//!                     │ └────┬─────┘ │   │ └────▲─────┘ │
//!                     └──────┼───────┘   └──────┼───────┘
//!         recv(batch)        │                  │ get_packet(poll)
//!   ┌─────────────┐          ▼                  │          ┌────────────┐
//!   │ RxStream    │──▶ OutputPort         InputPort ──────▶│ TxStream   │
//!   │ (hardware)  │   push_sri/packet                send  │ (hardware) │
//!   └─────────────┘                                        └────────────┘
//! ```
//!
//! Each direction owns its stream handle exclusively. The lifecycle thread
//! only touches a handle while the worker that owns it is stopped.

pub mod args;
pub mod component;
pub mod config;
pub mod error;
pub mod hardware;
pub mod port;
pub mod stream;
pub mod worker;

pub use component::{BridgeComponent, BridgeEvents, LifecycleHooks, ShutdownSignal};
pub use error::{Error, Result};
pub use hardware::Direction;

/// Bridge-wide constants
pub mod constants {
    /// Samples per packet assumed when the block does not report one
    pub const DEFAULT_SPP: usize = 1024;

    /// Name of the samples-per-packet hint on the block
    pub const SPP_HINT: &str = "spp";

    /// Receive batch size in packets
    pub const DEFAULT_BATCH_PACKETS: usize = 100;

    /// Host-side sample format (complex int16)
    pub const DEFAULT_CPU_FORMAT: &str = "sc16";

    /// Over-the-wire sample format (complex int16)
    pub const DEFAULT_WIRE_FORMAT: &str = "sc16";

    /// Idle delay after a NoOp invocation
    pub const DEFAULT_NOOP_DELAY_MS: u64 = 100;

    /// Grace period before a worker is killed
    pub const DEFAULT_STOP_GRACE_MS: u64 = 2000;

    /// Default advertised sample rate
    pub const DEFAULT_SAMPLE_RATE: f64 = 1_000_000.0;

    /// Capacity of packet queues between bridge and application
    pub const PACKET_QUEUE_CAPACITY: usize = 256;
}
