//! Stream negotiation
//!
//! Builds the endpoint configuration for a block and swaps stream handles
//! in and out of the slot their bridge owns.

use std::sync::Arc;

use crate::config::StreamFormatConfig;
use crate::constants::SPP_HINT;
use crate::error::HardwareError;
use crate::hardware::{BlockControl, Direction, RxStream, StreamDevice, StreamEndpointConfig, TxStream};

/// Slot holding a receive stream handle
pub type RxSlot = Option<Box<dyn RxStream>>;

/// Slot holding a transmit stream handle
pub type TxSlot = Option<Box<dyn TxStream>>;

/// Acquires stream handles for one block
pub struct StreamNegotiator {
    device: Arc<dyn StreamDevice>,
    block: Arc<dyn BlockControl>,
    format: StreamFormatConfig,
}

impl StreamNegotiator {
    pub fn new(device: Arc<dyn StreamDevice>, block: Arc<dyn BlockControl>, format: StreamFormatConfig) -> Self {
        Self { device, block, format }
    }

    pub fn block_id(&self) -> &str {
        self.block.block_id()
    }

    /// Current endpoint parameters.
    ///
    /// The samples-per-packet hint is read from the block every time, since
    /// the block default may change between acquisitions.
    pub fn endpoint_config(&self) -> StreamEndpointConfig {
        let samples_per_packet = match self.block.hint(SPP_HINT) {
            Some(value) => match value.trim().parse::<usize>() {
                Ok(spp) if spp > 0 => spp,
                _ => {
                    tracing::warn!(
                        "{}: ignoring invalid {} hint {:?}, using {}",
                        self.block_id(),
                        SPP_HINT,
                        value,
                        self.format.default_spp
                    );
                    self.format.default_spp
                }
            },
            None => self.format.default_spp,
        };

        StreamEndpointConfig {
            block_id: self.block_id().to_string(),
            port: self.format.block_port,
            cpu_format: self.format.cpu_format.clone(),
            wire_format: self.format.wire_format.clone(),
            samples_per_packet,
        }
    }

    /// Replace the handle in `slot` with a fresh receive stream.
    ///
    /// Returns the configuration used, or `None` (and an empty slot) if the
    /// device rejected the request.
    pub fn acquire_rx(&self, slot: &mut RxSlot) -> Option<StreamEndpointConfig> {
        self.acquire(Direction::Rx, slot, |config| self.device.open_rx_stream(config))
    }

    /// Replace the handle in `slot` with a fresh transmit stream.
    pub fn acquire_tx(&self, slot: &mut TxSlot) -> Option<StreamEndpointConfig> {
        self.acquire(Direction::Tx, slot, |config| self.device.open_tx_stream(config))
    }

    fn acquire<S: ?Sized>(
        &self,
        direction: Direction,
        slot: &mut Option<Box<S>>,
        open: impl FnOnce(&StreamEndpointConfig) -> Result<Box<S>, HardwareError>,
    ) -> Option<StreamEndpointConfig> {
        // The old handle goes before a new one is requested
        if slot.take().is_some() {
            tracing::debug!("{}: released previous {} stream", self.block_id(), direction);
        }

        let config = self.endpoint_config();
        tracing::debug!("{}: requesting {} stream with {}", self.block_id(), direction, config);

        match open(&config) {
            Ok(stream) => {
                *slot = Some(stream);
                tracing::info!("{}: acquired {} stream ({})", self.block_id(), direction, config);
                Some(config)
            }
            Err(e) => {
                tracing::error!("{}: unable to acquire {} stream: {}", self.block_id(), direction, e);
                None
            }
        }
    }
}
