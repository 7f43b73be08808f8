//! Bounded packet queues backing the dataflow ports
//!
//! The input side is a blocking channel so the transmit bridge can wait for
//! data with a timeout. The output side is a lock-free ring consumers drain
//! at their own pace; stream metadata is kept per stream id alongside it.

use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::packet::{InputPacket, OutputPacket, StreamSri};
use super::{InputPort, OutputPort};

/// Blocking input queue feeding the transmit bridge
pub struct InputQueue {
    tx: Sender<InputPacket>,
    rx: Receiver<InputPacket>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl InputQueue {
    /// Create a new input queue with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Queue a packet without blocking
    /// Returns false if the queue is full (overflow)
    pub fn push(&self, packet: InputPacket) -> bool {
        match self.tx.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Queue a packet, waiting up to `timeout` for space
    pub fn push_timeout(&self, packet: InputPacket, timeout: Duration) -> bool {
        self.tx.send_timeout(packet, timeout).is_ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.rx.len(),
            capacity: self.rx.capacity().unwrap_or(0),
            overflow: self.overflow_count.load(Ordering::Relaxed),
            underrun: self.underrun_count.load(Ordering::Relaxed),
        }
    }
}

impl InputPort for InputQueue {
    fn get_packet(&self, timeout: Duration) -> Option<InputPacket> {
        match self.rx.recv_timeout(timeout) {
            Ok(packet) => Some(packet),
            Err(RecvTimeoutError::Timeout) => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Output ring filled by the receive bridge
pub struct OutputQueue {
    queue: ArrayQueue<OutputPacket>,
    sri: DashMap<String, StreamSri>,
    sri_pushes: AtomicUsize,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl OutputQueue {
    /// Create a new output queue with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            sri: DashMap::new(),
            sri_pushes: AtomicUsize::new(0),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Pop a packet from the queue
    /// Returns None if empty (underrun)
    pub fn pop(&self) -> Option<OutputPacket> {
        match self.queue.pop() {
            Some(packet) => Some(packet),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Pop without counting underrun
    pub fn try_pop(&self) -> Option<OutputPacket> {
        self.queue.pop()
    }

    /// Most recent metadata announced for a stream
    pub fn sri(&self, stream_id: &str) -> Option<StreamSri> {
        self.sri.get(stream_id).map(|entry| entry.value().clone())
    }

    /// Number of metadata announcements seen
    pub fn sri_pushes(&self) -> usize {
        self.sri_pushes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.queue.len(),
            capacity: self.queue.capacity(),
            overflow: self.overflow_count.load(Ordering::Relaxed),
            underrun: self.underrun_count.load(Ordering::Relaxed),
        }
    }
}

impl OutputPort for OutputQueue {
    fn push_sri(&self, sri: &StreamSri) {
        self.sri.insert(sri.stream_id.clone(), sri.clone());
        self.sri_pushes.fetch_add(1, Ordering::Relaxed);
    }

    fn push_packet(&self, packet: OutputPacket) {
        if self.queue.push(packet).is_err() {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub len: usize,
    pub capacity: usize,
    pub overflow: usize,
    pub underrun: usize,
}

impl QueueStats {
    /// Fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        if self.capacity == 0 {
            0.0
        } else {
            self.len as f32 / self.capacity as f32
        }
    }
}
