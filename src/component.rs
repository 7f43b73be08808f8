//! Bridge component
//!
//! Owns the block, both bridges and their workers, and exposes the hooks
//! the hosting framework drives: start/stop, per-direction enable/disable,
//! argument changes and connection bookkeeping.

use dashmap::{DashMap, DashSet};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::args::{ArgEntry, ArgumentValidator};
use crate::config::BridgeConfig;
use crate::error::{Error, HardwareError, Result, WorkerError};
use crate::hardware::{Direction, StreamDevice};
use crate::port::{InputPort, OutputPort, StreamSri};
use crate::stream::{
    ContinuousStreamController, RxBridge, RxStats, StatsSnapshot, StreamGate, StreamNegotiator, TxBridge, TxStats,
};
use crate::worker::{ThreadedWorker, WorkFunction};

/// Hooks invoked by the hosting framework
pub trait LifecycleHooks {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn on_enable(&mut self, direction: Direction) -> Result<()>;
    fn on_disable(&mut self, direction: Direction) -> Result<()>;
    fn on_arguments_changed(&mut self, old: &[ArgEntry], new: &[ArgEntry]);
}

/// Notifications to whoever hosts the component.
///
/// Called synchronously, after the component's own bookkeeping is updated.
pub trait BridgeEvents: Send + Sync {
    fn on_block_identity(&self, _component_id: &str, _block_ids: &[String]) {}
    fn on_incoming_connection(&self, _component_id: &str, _stream_id: &str) {}
    fn on_outgoing_connection(&self, _component_id: &str, _connection_id: &str) {}
    fn on_removed_incoming_connection(&self, _component_id: &str, _stream_id: &str) {}
    fn on_removed_outgoing_connection(&self, _component_id: &str, _connection_id: &str) {}
}

/// Listener that ignores everything
pub struct NoEvents;

impl BridgeEvents for NoEvents {}

/// One-shot signal fired when the component is released
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        let (fired, ready) = &*self.inner;
        *fired.lock() = true;
        ready.notify_all();
    }

    pub fn is_fired(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Block until fired
    pub fn wait(&self) {
        let (fired, ready) = &*self.inner;
        let mut fired = fired.lock();
        while !*fired {
            ready.wait(&mut fired);
        }
    }

    /// Block until fired or `timeout` elapses; returns whether it fired
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (fired, ready) = &*self.inner;
        let mut fired = fired.lock();
        while !*fired {
            if ready.wait_until(&mut fired, deadline).timed_out() {
                break;
            }
        }
        *fired
    }
}

/// Packet ports the bridges read from and write to
#[derive(Clone)]
pub struct BridgePorts {
    pub input: Arc<dyn InputPort>,
    pub output: Arc<dyn OutputPort>,
}

/// Streaming bridge between one block and a pair of packet ports
pub struct BridgeComponent {
    id: String,
    config: BridgeConfig,
    validator: ArgumentValidator,
    args: Vec<ArgEntry>,
    negotiator: Arc<StreamNegotiator>,
    ports: BridgePorts,
    events: Arc<dyn BridgeEvents>,
    shutdown: ShutdownSignal,
    gate: Arc<StreamGate>,
    /// Upstream streams by id
    upstream: DashMap<String, StreamSri>,
    outgoing: DashSet<String>,
    rx: Option<ThreadedWorker<RxBridge>>,
    tx: Option<ThreadedWorker<TxBridge>>,
    rx_stats: Arc<RxStats>,
    tx_stats: Arc<TxStats>,
    started: bool,
    released: bool,
}

impl BridgeComponent {
    /// Bind to the configured block and apply the initial arguments.
    ///
    /// Fails if the device has no such block.
    pub fn new(
        config: BridgeConfig,
        device: Arc<dyn StreamDevice>,
        ports: BridgePorts,
        events: Arc<dyn BridgeEvents>,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        config.validate()?;

        let id = if config.component_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            config.component_id.clone()
        };

        let Some(block) = device.block(&config.block_id) else {
            tracing::error!("Unable to retrieve block with ID: {}", config.block_id);
            return Err(HardwareError::BlockNotFound(config.block_id.clone()).into());
        };
        tracing::debug!("Got the block: {}", config.block_id);

        let validator = ArgumentValidator::new(Some(block.clone()));
        let mut args = config.args.clone();
        validator.apply(&mut args);

        let negotiator = Arc::new(StreamNegotiator::new(device, block, config.stream.clone()));

        let component = Self {
            id,
            config,
            validator,
            args,
            negotiator,
            ports,
            events,
            shutdown,
            gate: Arc::new(StreamGate::new()),
            upstream: DashMap::new(),
            outgoing: DashSet::new(),
            rx: None,
            tx: None,
            rx_stats: Arc::default(),
            tx_stats: Arc::default(),
            started: false,
            released: false,
        };

        component
            .events
            .on_block_identity(&component.id, &[component.config.block_id.clone()]);
        tracing::info!("{}: component {} ready", component.block_id(), component.id);

        Ok(component)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn block_id(&self) -> &str {
        &self.config.block_id
    }

    /// Arguments currently applied to the block
    pub fn args(&self) -> &[ArgEntry] {
        &self.args
    }

    /// Replace the argument set, reverting if it cannot be applied
    pub fn set_args(&mut self, new: Vec<ArgEntry>) {
        let old = std::mem::take(&mut self.args);
        self.on_arguments_changed(&old, &new);
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::capture(&self.rx_stats, &self.tx_stats)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether `direction` has a stream and worker
    pub fn is_streaming(&self, direction: Direction) -> bool {
        match direction {
            Direction::Rx => self.rx.is_some(),
            Direction::Tx => self.tx.is_some(),
        }
    }

    /// Whether the worker for `direction` is currently running
    pub fn is_running(&self, direction: Direction) -> bool {
        match direction {
            Direction::Rx => self.rx.as_ref().is_some_and(|w| w.is_running()),
            Direction::Tx => self.tx.as_ref().is_some_and(|w| w.is_running()),
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Record stream metadata from upstream; the receive path starts
    /// emitting once at least one stream is known
    pub fn announce_upstream_sri(&self, sri: StreamSri) {
        let stream_id = sri.stream_id.clone();
        let is_new = self.upstream.insert(stream_id.clone(), sri.clone()).is_none();
        self.gate.open(sri);

        if is_new {
            tracing::debug!("{}: new upstream stream {}", self.block_id(), stream_id);
            self.events.on_incoming_connection(&self.id, &stream_id);
        }
    }

    /// Forget an upstream stream. If it was the active one, another known
    /// stream takes its place.
    pub fn remove_upstream_stream(&self, stream_id: &str) -> bool {
        if self.upstream.remove(stream_id).is_none() {
            return false;
        }

        if self.gate.close(stream_id) {
            let next = self.upstream.iter().next().map(|entry| entry.value().clone());
            if let Some(sri) = next {
                self.gate.open(sri);
            }
        }

        self.events.on_removed_incoming_connection(&self.id, stream_id);
        true
    }

    pub fn upstream_streams(&self) -> Vec<String> {
        self.upstream.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Record an outgoing connection, generating an id if none is given
    pub fn connect_output(&self, connection_id: Option<&str>) -> String {
        let connection_id = connection_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if self.outgoing.insert(connection_id.clone()) {
            self.events.on_outgoing_connection(&self.id, &connection_id);
        }
        connection_id
    }

    pub fn disconnect_output(&self, connection_id: &str) -> bool {
        if self.outgoing.remove(connection_id).is_none() {
            return false;
        }
        self.events.on_removed_outgoing_connection(&self.id, connection_id);
        true
    }

    pub fn outgoing_connections(&self) -> Vec<String> {
        self.outgoing.iter().map(|id| id.key().clone()).collect()
    }

    /// Tear down both directions, reset the block and fire the shutdown
    /// signal. Further lifecycle calls fail with [`Error::Released`].
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        tracing::info!("{}: releasing component {}", self.block_id(), self.id);

        self.disable_rx();
        self.disable_tx();
        if let Err(e) = LifecycleHooks::stop(self) {
            tracing::warn!("{}: {}", self.block_id(), e);
        }

        if let Some(block) = self.validator.unbind() {
            block.clear();
        }

        self.released = true;
        self.shutdown.fire();
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released {
            return Err(Error::Released);
        }
        Ok(())
    }

    fn enable_rx(&mut self) -> Result<()> {
        if self.rx.is_some() {
            tracing::debug!("{}: Attempted to set RX streamer, but already streaming", self.block_id());
            return Ok(());
        }
        tracing::debug!("{}: Attempting to set RX streamer", self.block_id());

        let mut controller = ContinuousStreamController::new(self.block_id(), self.config.rx.drain_timeout());
        let Some(endpoint) = controller.acquire(&self.negotiator) else {
            return Ok(());
        };
        controller.start();

        let bridge = RxBridge::new(
            controller,
            self.ports.output.clone(),
            self.gate.clone(),
            self.rx_stats.clone(),
            self.config.rx.batch_size(endpoint.samples_per_packet),
            self.config.rx.recv_timeout(),
            self.block_id(),
        );
        let mut worker = ThreadedWorker::new(format!("{}:rx", self.block_id()), bridge, self.config.worker);
        if self.started {
            worker.start()?;
        }
        self.rx = Some(worker);
        Ok(())
    }

    fn disable_rx(&mut self) {
        let Some(worker) = self.rx.take() else {
            tracing::debug!("{}: Attempted to unset RX streamer, but not streaming", self.block_id());
            return;
        };

        match worker.into_work() {
            Ok(Some(mut bridge)) => bridge.controller_mut().release(),
            Ok(None) => {}
            Err(e) => tracing::warn!("{}: RX Thread had to be killed: {}", self.block_id(), e),
        }
    }

    fn enable_tx(&mut self) -> Result<()> {
        if self.tx.is_some() {
            tracing::debug!("{}: Attempted to set TX streamer, but already streaming", self.block_id());
            return Ok(());
        }
        tracing::debug!("{}: Attempting to set TX streamer", self.block_id());

        let bridge = TxBridge::new(
            self.negotiator.clone(),
            self.ports.input.clone(),
            self.tx_stats.clone(),
            self.config.tx.input_poll(),
        );
        if !bridge.has_stream() {
            return Ok(());
        }

        let mut worker = ThreadedWorker::new(format!("{}:tx", self.block_id()), bridge, self.config.worker);
        if self.started {
            worker.start()?;
        }
        self.tx = Some(worker);
        Ok(())
    }

    fn disable_tx(&mut self) {
        let Some(worker) = self.tx.take() else {
            tracing::debug!("{}: Attempted to unset TX streamer, but not streaming", self.block_id());
            return;
        };

        match worker.into_work() {
            Ok(Some(mut bridge)) => bridge.release(),
            Ok(None) => {}
            Err(e) => tracing::warn!("{}: TX Thread had to be killed: {}", self.block_id(), e),
        }
    }
}

/// Stop one worker. A worker that had to be killed (or panicked) has lost
/// its work state and is dropped; enabling the direction again builds a
/// fresh one.
fn stop_worker<W: WorkFunction>(slot: &mut Option<ThreadedWorker<W>>, block_id: &str, direction: Direction) {
    let Some(worker) = slot.as_mut() else {
        return;
    };

    match worker.stop() {
        Ok(()) => {}
        Err(WorkerError::Unresponsive { .. }) => {
            tracing::warn!("{}: {} Thread had to be killed", block_id, direction);
            *slot = None;
        }
        Err(e) => {
            tracing::warn!("{}: {}", block_id, e);
            *slot = None;
        }
    }
}

impl LifecycleHooks for BridgeComponent {
    fn start(&mut self) -> Result<()> {
        self.ensure_live()?;
        tracing::info!("{}: starting", self.block_id());

        if let Some(worker) = self.rx.as_mut() {
            worker.start()?;
        }
        if let Some(worker) = self.tx.as_mut() {
            worker.start()?;
        }
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        tracing::info!("{}: stopping", self.block_id());

        let block_id = self.config.block_id.clone();
        stop_worker(&mut self.rx, &block_id, Direction::Rx);
        stop_worker(&mut self.tx, &block_id, Direction::Tx);
        self.started = false;
        Ok(())
    }

    fn on_enable(&mut self, direction: Direction) -> Result<()> {
        self.ensure_live()?;
        match direction {
            Direction::Rx => self.enable_rx(),
            Direction::Tx => self.enable_tx(),
        }
    }

    fn on_disable(&mut self, direction: Direction) -> Result<()> {
        self.ensure_live()?;
        match direction {
            Direction::Rx => self.disable_rx(),
            Direction::Tx => self.disable_tx(),
        }
        Ok(())
    }

    fn on_arguments_changed(&mut self, old: &[ArgEntry], new: &[ArgEntry]) {
        let mut applied = new.to_vec();
        if self.validator.apply(&mut applied) {
            self.args = applied;
        } else {
            tracing::warn!("{}: Unable to apply arguments, reverting", self.block_id());
            self.args = old.to_vec();
        }
    }
}

impl Drop for BridgeComponent {
    fn drop(&mut self) {
        self.release();
    }
}
