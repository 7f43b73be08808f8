//! Continuous-stream control for the receive path
//!
//! Owns the receive handle and its started flag. Start is never issued
//! twice without a stop in between, and every stop drains whatever the
//! hardware still had buffered so it cannot surface after the next start.

use std::time::Duration;

use crate::constants::DEFAULT_SPP;
use crate::hardware::{RxErrorCode, RxMetadata, Sample, StreamCommand, StreamEndpointConfig};
use crate::stream::negotiator::{RxSlot, StreamNegotiator};

/// Upper bound on receive calls spent draining after one stop
const MAX_DRAIN_CALLS: usize = 10_000;

/// Start/stop state machine around a receive stream
pub struct ContinuousStreamController {
    block_id: String,
    stream: RxSlot,
    started: bool,
    drain_timeout: Duration,
    drain_buf: Vec<Sample>,
}

impl ContinuousStreamController {
    pub fn new(block_id: impl Into<String>, drain_timeout: Duration) -> Self {
        Self {
            block_id: block_id.into(),
            stream: None,
            started: false,
            drain_timeout,
            drain_buf: Vec::new(),
        }
    }

    /// Stop any current stream and acquire a fresh one
    pub fn acquire(&mut self, negotiator: &StreamNegotiator) -> Option<StreamEndpointConfig> {
        self.stop();
        let config = negotiator.acquire_rx(&mut self.stream)?;
        self.drain_buf.resize(config.samples_per_packet, Sample::default());
        Some(config)
    }

    /// Stop streaming and drop the handle
    pub fn release(&mut self) {
        self.stop();
        if self.stream.take().is_some() {
            tracing::debug!("{}: released RX stream", self.block_id);
        }
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Begin continuous streaming now. Returns whether the stream is started.
    pub fn start(&mut self) -> bool {
        if self.started {
            return true;
        }
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };

        match stream.issue(StreamCommand::start_now()) {
            Ok(()) => {
                tracing::debug!("{}: started continuous streaming", self.block_id);
                self.started = true;
            }
            Err(e) => tracing::error!("{}: failed to start streaming: {}", self.block_id, e),
        }
        self.started
    }

    /// Stop continuous streaming and drain in-flight samples
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;

        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        if let Err(e) = stream.issue(StreamCommand::StopContinuous) {
            tracing::error!("{}: failed to stop streaming: {}", self.block_id, e);
        }

        if self.drain_buf.is_empty() {
            self.drain_buf.resize(DEFAULT_SPP, Sample::default());
        }

        // Data flagged with an error is still stale data: keep going until empty
        let mut discarded = 0usize;
        for _ in 0..MAX_DRAIN_CALLS {
            let (count, metadata) = stream.recv(&mut self.drain_buf, self.drain_timeout);
            if count == 0 {
                tracing::debug!("{}: drained {} samples after stop", self.block_id, discarded);
                return;
            }
            if metadata.error != RxErrorCode::None {
                tracing::debug!("{}: {:?} while draining", self.block_id, metadata.error);
            }
            discarded += count;
        }
        tracing::warn!(
            "{}: stream still producing after {} drain calls ({} samples discarded)",
            self.block_id,
            MAX_DRAIN_CALLS,
            discarded
        );
    }

    /// Forget the started state without commanding the hardware
    pub fn mark_stopped(&mut self) {
        self.started = false;
    }

    /// Re-issue the start command after a stream fault
    pub fn restart(&mut self) -> bool {
        self.mark_stopped();
        self.start()
    }

    /// Receive into `buf`; `None` if there is no stream
    pub fn recv(&mut self, buf: &mut [Sample], timeout: Duration) -> Option<(usize, RxMetadata)> {
        self.stream.as_mut().map(|stream| stream.recv(buf, timeout))
    }
}

impl Drop for ContinuousStreamController {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamFormatConfig;
    use crate::hardware::testing::{MockBlock, MockDevice, RxLog, ScriptedRx};
    use crate::hardware::{BlockControl, RxStream};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn controller_with(rx: ScriptedRx) -> ContinuousStreamController {
        let rx = Mutex::new(Some(rx));
        let device = Arc::new(
            MockDevice::new(None).with_rx(move || -> Box<dyn RxStream> {
                Box::new(rx.lock().take().expect("stream opened twice"))
            }),
        );
        let block: Arc<dyn BlockControl> = Arc::new(MockBlock::new("b").with_hint("spp", "16"));
        let negotiator = StreamNegotiator::new(device, block, StreamFormatConfig::default());

        let mut controller = ContinuousStreamController::new("b", Duration::from_millis(5));
        assert!(controller.acquire(&negotiator).is_some());
        controller
    }

    fn ok(count: usize) -> (usize, RxMetadata) {
        (count, RxMetadata::default())
    }

    fn stops(log: &Arc<Mutex<RxLog>>) -> usize {
        log.lock()
            .commands
            .iter()
            .filter(|c| **c == StreamCommand::StopContinuous)
            .count()
    }

    #[test]
    fn test_start_is_idempotent() {
        let (rx, log) = ScriptedRx::new(Vec::new());
        let mut controller = controller_with(rx);

        assert!(controller.start());
        assert!(controller.start());
        assert_eq!(log.lock().commands, vec![StreamCommand::start_now()]);
    }

    #[test]
    fn test_stop_twice_drains_once() {
        let (rx, log) = ScriptedRx::new(vec![ok(16), ok(16), ok(3), ok(0)]);
        let mut controller = controller_with(rx);

        controller.stop();
        assert_eq!(log.lock().commands.len(), 0);

        controller.start();
        controller.stop();
        controller.stop();

        assert_eq!(stops(&log), 1);
        // Three data-bearing calls plus the empty one that ends the drain
        assert_eq!(log.lock().recv_calls, 4);
        assert!(!controller.is_started());
        assert!(log.lock().recv_timeouts.iter().all(|t| *t == Duration::from_millis(5)));
    }

    #[test]
    fn test_drain_continues_past_overflow() {
        let (rx, log) = ScriptedRx::new(vec![
            ok(16),
            (16, RxMetadata::with_error(RxErrorCode::Overflow)),
            ok(16),
            ok(0),
        ]);
        let mut controller = controller_with(rx);

        controller.start();
        controller.stop();
        assert_eq!(log.lock().recv_calls, 4);

        // Nothing buffered before the stop surfaces after the next start
        controller.start();
        let mut buf = [Sample::default(); 16];
        let (count, _) = controller.recv(&mut buf, Duration::ZERO).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_empty_timeout_ends_drain() {
        let (rx, log) = ScriptedRx::new(vec![ok(16), (0, RxMetadata::with_error(RxErrorCode::Timeout)), ok(16)]);
        let mut controller = controller_with(rx);

        controller.start();
        controller.stop();
        assert_eq!(log.lock().recv_calls, 2);
    }

    #[test]
    fn test_drop_stops_started_stream() {
        let (rx, log) = ScriptedRx::new(vec![ok(16)]);
        let mut controller = controller_with(rx);

        controller.start();
        drop(controller);
        assert_eq!(stops(&log), 1);
        // One data-bearing call, then the exhausted script reports empty
        assert_eq!(log.lock().recv_calls, 2);
    }

    #[test]
    fn test_restart_reissues_start() {
        let (rx, log) = ScriptedRx::new(Vec::new());
        let mut controller = controller_with(rx);

        controller.start();
        assert!(controller.restart());
        assert_eq!(log.lock().commands, vec![StreamCommand::start_now(), StreamCommand::start_now()]);
    }

    #[test]
    fn test_failed_start_stays_stopped() {
        let (rx, log) = ScriptedRx::new(Vec::new());
        let mut controller = controller_with(rx.failing_commands());

        assert!(!controller.start());
        assert!(!controller.is_started());
        controller.stop();
        assert_eq!(log.lock().commands.len(), 1);
    }

    #[test]
    fn test_release_stops_and_drops_stream() {
        let (rx, log) = ScriptedRx::new(Vec::new());
        let mut controller = controller_with(rx);

        controller.start();
        controller.release();
        assert!(!controller.has_stream());
        assert_eq!(stops(&log), 1);
        assert!(controller.recv(&mut [Sample::default(); 4], Duration::ZERO).is_none());
    }
}
