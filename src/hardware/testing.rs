//! Scripted hardware doubles for unit tests

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::*;

/// Everything a scripted receive stream was asked to do
#[derive(Debug, Default)]
pub struct RxLog {
    pub commands: Vec<StreamCommand>,
    pub recv_calls: usize,
    pub recv_timeouts: Vec<Duration>,
}

/// Receive stream replaying a fixed list of results
pub struct ScriptedRx {
    script: VecDeque<(usize, RxMetadata)>,
    log: Arc<Mutex<RxLog>>,
    next_value: i16,
    fail_commands: bool,
}

impl ScriptedRx {
    pub fn new(script: Vec<(usize, RxMetadata)>) -> (Self, Arc<Mutex<RxLog>>) {
        let log = Arc::new(Mutex::new(RxLog::default()));
        let rx = Self {
            script: script.into(),
            log: log.clone(),
            next_value: 0,
            fail_commands: false,
        };
        (rx, log)
    }

    pub fn failing_commands(mut self) -> Self {
        self.fail_commands = true;
        self
    }
}

impl RxStream for ScriptedRx {
    fn recv(&mut self, buf: &mut [Sample], timeout: Duration) -> (usize, RxMetadata) {
        {
            let mut log = self.log.lock();
            log.recv_calls += 1;
            log.recv_timeouts.push(timeout);
        }

        // An exhausted script behaves like an idle stream
        let (count, metadata) = self
            .script
            .pop_front()
            .unwrap_or_else(|| (0, RxMetadata::with_error(RxErrorCode::Timeout)));

        let count = count.min(buf.len());
        for sample in &mut buf[..count] {
            *sample = Sample::new(self.next_value, self.next_value.wrapping_neg());
            self.next_value = self.next_value.wrapping_add(1);
        }
        (count, metadata)
    }

    fn issue(&mut self, command: StreamCommand) -> Result<(), HardwareError> {
        self.log.lock().commands.push(command);
        if self.fail_commands {
            return Err(HardwareError::CommandFailed("scripted failure".into()));
        }
        Ok(())
    }
}

/// One recorded send call
#[derive(Debug, Clone)]
pub struct SendRecord {
    pub requested: usize,
    pub accepted: usize,
    pub first_value: Option<Sample>,
    pub metadata: TxMetadata,
}

/// Transmit stream accepting scripted amounts
pub struct ScriptedTx {
    script: VecDeque<usize>,
    log: Arc<Mutex<Vec<SendRecord>>>,
}

impl ScriptedTx {
    /// `script` caps each send; once exhausted every send is accepted in full
    pub fn new(script: Vec<usize>) -> (Self, Arc<Mutex<Vec<SendRecord>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let tx = Self {
            script: script.into(),
            log: log.clone(),
        };
        (tx, log)
    }
}

impl TxStream for ScriptedTx {
    fn send(&mut self, buf: &[Sample], metadata: &TxMetadata) -> usize {
        let accepted = match self.script.pop_front() {
            Some(cap) => cap.min(buf.len()),
            None => buf.len(),
        };
        self.log.lock().push(SendRecord {
            requested: buf.len(),
            accepted,
            first_value: buf.first().copied(),
            metadata: metadata.clone(),
        });
        accepted
    }
}

/// Block with an in-memory argument table
#[derive(Default)]
pub struct MockBlock {
    id: String,
    args: Mutex<HashMap<String, String>>,
    hints: HashMap<String, String>,
    /// Arguments whose writes are silently ignored
    ignored: HashSet<String>,
    pub set_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub cleared: AtomicBool,
}

impl MockBlock {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_hint(mut self, name: &str, value: &str) -> Self {
        self.hints.insert(name.to_string(), value.to_string());
        self
    }

    pub fn ignoring(mut self, id: &str) -> Self {
        self.ignored.insert(id.to_string());
        self
    }

    pub fn arg(&self, id: &str) -> Option<String> {
        self.args.lock().get(id).cloned()
    }
}

impl BlockControl for MockBlock {
    fn block_id(&self) -> &str {
        &self.id
    }

    fn set_arg(&self, id: &str, value: &str) -> Result<(), HardwareError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if !self.ignored.contains(id) {
            self.args.lock().insert(id.to_string(), value.to_string());
        }
        Ok(())
    }

    fn get_arg(&self, id: &str) -> Option<String> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.args.lock().get(id).cloned()
    }

    fn hint(&self, name: &str) -> Option<String> {
        self.hints.get(name).cloned()
    }

    fn clear(&self) {
        self.cleared.store(true, Ordering::SeqCst);
    }
}

type RxFactory = Box<dyn Fn() -> Box<dyn RxStream> + Send + Sync>;
type TxFactory = Box<dyn Fn() -> Box<dyn TxStream> + Send + Sync>;

/// Device handing out streams built by test-supplied factories
pub struct MockDevice {
    block: Option<Arc<MockBlock>>,
    rx_factory: Option<RxFactory>,
    tx_factory: Option<TxFactory>,
    pub opened: Mutex<Vec<(Direction, StreamEndpointConfig)>>,
}

impl MockDevice {
    pub fn new(block: Option<Arc<MockBlock>>) -> Self {
        Self {
            block,
            rx_factory: None,
            tx_factory: None,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rx(mut self, factory: impl Fn() -> Box<dyn RxStream> + Send + Sync + 'static) -> Self {
        self.rx_factory = Some(Box::new(factory));
        self
    }

    pub fn with_tx(mut self, factory: impl Fn() -> Box<dyn TxStream> + Send + Sync + 'static) -> Self {
        self.tx_factory = Some(Box::new(factory));
        self
    }

    pub fn open_count(&self, direction: Direction) -> usize {
        self.opened.lock().iter().filter(|(d, _)| *d == direction).count()
    }
}

impl StreamDevice for MockDevice {
    fn open_rx_stream(&self, config: &StreamEndpointConfig) -> Result<Box<dyn RxStream>, HardwareError> {
        let factory = self
            .rx_factory
            .as_ref()
            .ok_or_else(|| HardwareError::StreamRejected("no rx streams".into()))?;
        self.opened.lock().push((Direction::Rx, config.clone()));
        Ok(factory())
    }

    fn open_tx_stream(&self, config: &StreamEndpointConfig) -> Result<Box<dyn TxStream>, HardwareError> {
        let factory = self
            .tx_factory
            .as_ref()
            .ok_or_else(|| HardwareError::StreamRejected("no tx streams".into()))?;
        self.opened.lock().push((Direction::Tx, config.clone()));
        Ok(factory())
    }

    fn block(&self, block_id: &str) -> Option<Arc<dyn BlockControl>> {
        self.block
            .as_ref()
            .filter(|block| block.block_id() == block_id)
            .map(|block| block.clone() as Arc<dyn BlockControl>)
    }
}
