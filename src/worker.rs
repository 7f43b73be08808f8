//! Threaded worker
//!
//! Runs one work function repeatedly on a dedicated thread. The work state
//! is moved into the thread while running and handed back when the thread
//! is joined, so the owner regains exclusive access to it (and to any
//! stream handle it holds) only once the loop has provably stopped.
//!
//! Cancellation is cooperative and only observed between invocations. A
//! thread stuck inside an invocation past the grace period is abandoned:
//! it is detached together with its work state and exits on its own once
//! the blocking call returns.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// Result of one work function invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    /// Did useful work, invoke again immediately
    Normal,
    /// Nothing to do, idle briefly before the next invocation
    NoOp,
    /// Stop the loop for good
    Finish,
}

/// A repeatable unit of work
pub trait WorkFunction: Send + 'static {
    fn work(&mut self) -> WorkState;
}

/// Adapter running a closure as a work function
pub struct FnWork<F>(F);

impl<F> WorkFunction for FnWork<F>
where
    F: FnMut() -> WorkState + Send + 'static,
{
    fn work(&mut self) -> WorkState {
        (self.0)()
    }
}

/// Wrap a closure as a work function
pub fn from_fn<F>(f: F) -> FnWork<F>
where
    F: FnMut() -> WorkState + Send + 'static,
{
    FnWork(f)
}

struct Running<W> {
    handle: JoinHandle<W>,
    /// Dropping this sender is the cancellation signal
    cancel: Sender<()>,
    /// Disconnects when the thread leaves its loop
    done: Receiver<()>,
}

enum Slot<W> {
    Idle(W),
    Running(Running<W>),
    /// Work state was lost to a killed or panicked thread
    Abandoned,
}

/// Cancellable thread running a [`WorkFunction`]
pub struct ThreadedWorker<W: WorkFunction> {
    name: String,
    slot: Slot<W>,
    noop_delay: Duration,
    stop_grace: Duration,
    forced_terminations: usize,
}

impl<W: WorkFunction> ThreadedWorker<W> {
    /// Create a stopped worker
    pub fn new(name: impl Into<String>, work: W, config: WorkerConfig) -> Self {
        Self {
            name: name.into(),
            slot: Slot::Idle(work),
            noop_delay: config.noop_delay(),
            stop_grace: config.stop_grace(),
            forced_terminations: 0,
        }
    }

    /// Start the loop. Starting a running worker does nothing.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        let mut work = match std::mem::replace(&mut self.slot, Slot::Abandoned) {
            Slot::Idle(work) => work,
            running @ Slot::Running(_) => {
                self.slot = running;
                return Ok(());
            }
            Slot::Abandoned => return Err(WorkerError::Abandoned(self.name.clone())),
        };

        let (cancel, cancel_rx) = bounded::<()>(0);
        let (done_tx, done) = bounded::<()>(0);
        let noop_delay = self.noop_delay;

        let handle = thread::Builder::new()
            .name(format!("{}-worker", self.name))
            .spawn(move || {
                let _done = done_tx;

                loop {
                    if let Err(TryRecvError::Disconnected) = cancel_rx.try_recv() {
                        break;
                    }

                    match work.work() {
                        WorkState::Normal => {}
                        WorkState::NoOp => {
                            // Idle, but wake up at once if cancelled
                            if let Err(RecvTimeoutError::Disconnected) = cancel_rx.recv_timeout(noop_delay) {
                                break;
                            }
                        }
                        WorkState::Finish => break,
                    }
                }

                work
            })
            .map_err(|e| WorkerError::Spawn {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!("{}: worker started", self.name);
        self.slot = Slot::Running(Running { handle, cancel, done });
        Ok(())
    }

    /// Stop the loop, waiting up to the grace period.
    ///
    /// Returns [`WorkerError::Unresponsive`] if the thread had to be killed.
    /// Stopping a worker that is not running does nothing.
    pub fn stop(&mut self) -> Result<(), WorkerError> {
        let running = match std::mem::replace(&mut self.slot, Slot::Abandoned) {
            Slot::Running(running) => running,
            other => {
                self.slot = other;
                return Ok(());
            }
        };

        let Running { handle, cancel, done } = running;
        drop(cancel);

        match done.recv_timeout(self.stop_grace) {
            Err(RecvTimeoutError::Timeout) => {
                // Detach: the thread exits by itself once its call returns
                drop(handle);
                self.forced_terminations += 1;
                Err(WorkerError::Unresponsive {
                    name: self.name.clone(),
                    grace: self.stop_grace,
                })
            }
            _ => match handle.join() {
                Ok(work) => {
                    tracing::debug!("{}: worker stopped", self.name);
                    self.slot = Slot::Idle(work);
                    Ok(())
                }
                Err(_) => Err(WorkerError::Panicked(self.name.clone())),
            },
        }
    }

    /// Whether the loop is still running
    pub fn is_running(&self) -> bool {
        match &self.slot {
            Slot::Running(running) => !running.handle.is_finished(),
            _ => false,
        }
    }

    /// Access the work state while stopped
    pub fn work_mut(&mut self) -> Option<&mut W> {
        match &mut self.slot {
            Slot::Idle(work) => Some(work),
            _ => None,
        }
    }

    /// Stop the worker and take back its work state
    pub fn into_work(mut self) -> Result<Option<W>, WorkerError> {
        self.stop()?;
        match std::mem::replace(&mut self.slot, Slot::Abandoned) {
            Slot::Idle(work) => Ok(Some(work)),
            _ => Ok(None),
        }
    }

    /// How many times a thread had to be abandoned
    pub fn forced_terminations(&self) -> usize {
        self.forced_terminations
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<W: WorkFunction> Drop for ThreadedWorker<W> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("{}", e);
        }
    }
}
