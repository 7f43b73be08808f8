//! Receive bridge: hardware stream -> output port

use std::sync::Arc;
use std::time::Duration;

use super::controller::ContinuousStreamController;
use super::{bump, RxStats, StreamGate};
use crate::hardware::{RxErrorCode, RxMetadata, Sample};
use crate::port::{OutputPacket, OutputPort};
use crate::worker::{WorkFunction, WorkState};

/// Receive-side work function
pub struct RxBridge {
    block_id: String,
    controller: ContinuousStreamController,
    output: Arc<dyn OutputPort>,
    gate: Arc<StreamGate>,
    stats: Arc<RxStats>,
    /// Accumulation buffer, exactly one batch long
    batch: Vec<Sample>,
    recv_timeout: Duration,
    /// Stream whose metadata was last pushed downstream
    announced: Option<String>,
}

impl RxBridge {
    pub fn new(
        controller: ContinuousStreamController,
        output: Arc<dyn OutputPort>,
        gate: Arc<StreamGate>,
        stats: Arc<RxStats>,
        batch_size: usize,
        recv_timeout: Duration,
        block_id: impl Into<String>,
    ) -> Self {
        Self {
            block_id: block_id.into(),
            controller,
            output,
            gate,
            stats,
            batch: vec![Sample::default(); batch_size.max(1)],
            recv_timeout,
            announced: None,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch.len()
    }

    pub fn controller(&self) -> &ContinuousStreamController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ContinuousStreamController {
        &mut self.controller
    }

    /// Fill one batch and forward it
    pub fn process(&mut self) -> WorkState {
        tracing::trace!("{}: RX service function", self.block_id);

        if !self.controller.has_stream() {
            return WorkState::NoOp;
        }

        // No destination identity yet: nothing may be emitted
        let Some(sri) = self.gate.current() else {
            return WorkState::NoOp;
        };

        if !self.controller.start() {
            return WorkState::NoOp;
        }

        let batch_size = self.batch.len();
        let mut filled = 0;
        let mut last = RxMetadata::default();

        while filled < batch_size {
            let Some((count, metadata)) = self.controller.recv(&mut self.batch[filled..], self.recv_timeout) else {
                return WorkState::NoOp;
            };

            match &metadata.error {
                RxErrorCode::None => {}
                RxErrorCode::Timeout => {
                    tracing::error!("{}: Timeout while streaming", self.block_id);
                    bump(&self.stats.timeouts, 1);
                    return WorkState::NoOp;
                }
                RxErrorCode::Overflow => {
                    tracing::warn!("{}: Overflow while streaming", self.block_id);
                    bump(&self.stats.overflows, 1);
                }
                RxErrorCode::Other(reason) => {
                    tracing::warn!("{}: {}, restarting stream", self.block_id, reason);
                    bump(&self.stats.restarts, 1);
                    self.controller.restart();
                    return WorkState::NoOp;
                }
            }

            tracing::debug!("{}: Received {} samples", self.block_id, count);
            // Never trust a count beyond the slice handed out
            filled += count.min(batch_size - filled);
            last = metadata;
        }

        if self.announced.as_deref() != Some(sri.stream_id.as_str()) {
            let mut announce = sri.clone();
            announce.complex = true;
            self.output.push_sri(&announce);
            tracing::debug!("{}: announced output stream {}", self.block_id, sri.stream_id);
            self.announced = Some(sri.stream_id.clone());
        }

        self.output.push_packet(OutputPacket {
            payload: self.batch.clone(),
            timestamp: last.time_spec.into(),
            end_of_burst: last.end_of_burst,
            stream_id: sri.stream_id,
        });
        bump(&self.stats.packets, 1);
        bump(&self.stats.samples, batch_size as u64);

        WorkState::Normal
    }
}

impl WorkFunction for RxBridge {
    fn work(&mut self) -> WorkState {
        self.process()
    }
}
