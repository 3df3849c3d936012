//! A single channel: one connection between a task instance and one specific
//! instance of a directly linked task.
//!
//! The inbound queue is fed by the transport's network-event thread and
//! drained by the owning task's worker thread. Whenever the queue turns
//! non-empty the channel enqueues its index into the owning absorber's
//! ready-queue, so the absorber never has to poll every channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Sender;
use parking_lot::{Condvar, Mutex};

use crate::descriptor::TaskId;
use crate::event::{ChannelHandle, DataEvent};
use crate::gate::TransportError;

/// Ready-queue token that unblocks the absorber without naming a channel.
pub(crate) const INTERRUPT_TOKEN: usize = usize::MAX;

/// One connection to one remote task instance. Owned exclusively by its gate.
pub struct Channel {
    index: usize,
    remote: TaskId,
    queue: Mutex<VecDeque<DataEvent>>,
    not_empty: Condvar,
    ready_tx: Sender<usize>,
    connected: AtomicBool,
    closed: AtomicBool,
    interrupted: AtomicBool,
    handle: Mutex<Option<Arc<dyn ChannelHandle>>>,
}

impl Channel {
    pub(crate) fn new(index: usize, remote: TaskId, ready_tx: Sender<usize>) -> Self {
        Self {
            index,
            remote,
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            ready_tx,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Channel index within the owning gate.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Identity of the remote task instance.
    #[inline]
    pub fn remote(&self) -> TaskId {
        self.remote
    }

    /// Whether the transport has bound a delivery handle.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether the close handshake has marked this channel closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_closed(&self, closed: bool) {
        self.closed.store(closed, Ordering::SeqCst);
    }

    /// Number of queued events.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Bind the delivery handle. Called on `CHANNEL_CONNECTED`.
    pub(crate) fn connect(&self, handle: Arc<dyn ChannelHandle>) {
        *self.handle.lock() = Some(handle);
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Hand one outbound event to the transport.
    pub(crate) fn deliver(&self, event: DataEvent, gate: usize) -> Result<(), TransportError> {
        let handle = self.handle.lock().clone();
        match handle {
            Some(handle) => handle.deliver(event),
            None => Err(TransportError::NotConnected {
                gate,
                channel: self.index,
            }),
        }
    }

    /// Enqueue one inbound event. Thread-safe hand-off from the transport.
    pub(crate) fn push(&self, event: DataEvent) {
        let was_empty = {
            let mut queue = self.queue.lock();
            let was_empty = queue.is_empty();
            queue.push_back(event);
            was_empty
        };
        self.not_empty.notify_one();
        if was_empty {
            // Absorber may already be gone during teardown.
            let _ = self.ready_tx.send(self.index);
        }
    }

    /// Dequeue one event and report whether more remain, atomically.
    pub(crate) fn poll_and_check(&self) -> (Option<DataEvent>, bool) {
        let mut queue = self.queue.lock();
        let event = queue.pop_front();
        (event, !queue.is_empty())
    }

    /// Dequeue one event, waiting up to `timeout` for one to arrive.
    pub(crate) fn poll_timeout(&self, timeout: Duration) -> Option<DataEvent> {
        let deadline = std::time::Instant::now() + timeout;
        let mut queue = self.queue.lock();
        loop {
            if let Some(event) = queue.pop_front() {
                return Some(event);
            }
            if self.interrupted.load(Ordering::SeqCst) {
                return None;
            }
            if self.not_empty.wait_until(&mut queue, deadline).timed_out() {
                return None;
            }
        }
    }

    /// Dequeue one event, blocking until one arrives or the task is torn down.
    pub(crate) fn take_blocking(&self) -> Result<DataEvent, TransportError> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(event) = queue.pop_front() {
                return Ok(event);
            }
            if self.interrupted.load(Ordering::SeqCst) {
                return Err(TransportError::Interrupted);
            }
            self.not_empty.wait(&mut queue);
        }
    }

    /// Wake any blocked reader with an interrupt.
    pub(crate) fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.not_empty.notify_all();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("index", &self.index)
            .field("remote", &self.remote)
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .field("pending", &self.pending())
            .finish()
    }
}
