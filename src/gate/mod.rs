//! Gates and channels.
//!
//! A gate is a task's endpoint for one logical dataflow edge. It owns a fixed
//! set of channels, one per connected remote task instance; the channel count
//! equals the edge's fan-in (input gates) or fan-out (output gates) and is
//! fixed at bind time.
//!
//! The input side merges a gate's channels through [`RoundRobinAbsorber`]
//! into one fair extraction point; [`DataConsumer`] layers the exhaustion and
//! close-handshake protocol on top. [`DataProducer`] is the outbound mirror.

mod absorber;
mod channel;
mod consumer;
mod producer;

pub use absorber::RoundRobinAbsorber;
pub use channel::Channel;
pub use consumer::DataConsumer;
pub use producer::DataProducer;

use crossbeam::channel::Sender;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::descriptor::{GateDirection, TaskDescriptor};
use crate::event::ProtocolError;
use crate::memory::MemoryError;

/// Data-path failure on a gate or channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A blocking wait was interrupted by task uninstall or node shutdown.
    /// Propagated as cancellation, never retried internally.
    #[error("blocking transport operation interrupted")]
    Interrupted,

    /// The channel has no bound delivery handle yet.
    #[error("channel {channel} of gate {gate} is not connected")]
    NotConnected { gate: usize, channel: usize },

    /// The remote end rejected or dropped a delivery.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Handshake or lifecycle protocol violation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Buffer pool failure while producing.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Record encoding failed.
    #[error("record encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Type-definition encoding failed.
    #[error("type definition encode failed: {0}")]
    Schema(#[from] serde_json::Error),
}

/// One logical dataflow edge endpoint: an ordered, fixed set of channels.
pub struct Gate {
    index: usize,
    direction: GateDirection,
    channels: SmallVec<[Arc<Channel>; 4]>,
    open: AtomicBool,
}

impl Gate {
    pub(crate) fn new(
        index: usize,
        direction: GateDirection,
        remotes: &[TaskDescriptor],
        ready_tx: Sender<usize>,
    ) -> Self {
        let channels = remotes
            .iter()
            .enumerate()
            .map(|(channel_index, remote)| {
                Arc::new(Channel::new(channel_index, remote.task_id, ready_tx.clone()))
            })
            .collect();
        Self {
            index,
            direction,
            channels,
            open: AtomicBool::new(false),
        }
    }

    /// Gate index within the owning task's binding.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Direction relative to the owning task.
    #[inline]
    pub fn direction(&self) -> GateDirection {
        self.direction
    }

    /// Number of channels realizing this edge.
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Channel by index. Panics on out-of-range index (caller error).
    #[inline]
    pub fn channel(&self, channel_index: usize) -> &Arc<Channel> {
        &self.channels[channel_index]
    }

    /// All channels, in bind order.
    #[inline]
    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    /// Whether the gate currently accepts/emits.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("index", &self.index)
            .field("direction", &self.direction)
            .field("channels", &self.channels.len())
            .field("open", &self.is_open())
            .finish()
    }
}
