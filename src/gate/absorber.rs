//! Round-robin fan-in over a gate's channels.
//!
//! Each channel enqueues its index into the shared ready-queue when its
//! inbound queue turns non-empty; `take` dequeues one ready index, polls
//! exactly one event from that channel, and re-enqueues the index at the
//! tail while events remain. Per-channel FIFO order is preserved;
//! cross-channel interleaving is approximate round-robin.

use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use crate::event::DataEvent;
use crate::gate::channel::INTERRUPT_TOKEN;
use crate::gate::{Gate, TransportError};

/// Fair extraction point for one input gate.
pub struct RoundRobinAbsorber {
    gate: Arc<Gate>,
    ready_rx: Receiver<usize>,
    ready_tx: Sender<usize>,
}

impl RoundRobinAbsorber {
    pub(crate) fn new(gate: Arc<Gate>, ready_rx: Receiver<usize>, ready_tx: Sender<usize>) -> Self {
        Self {
            gate,
            ready_rx,
            ready_tx,
        }
    }

    /// Blocking extraction of the next event from anywhere in the gate.
    ///
    /// A ready token with an already-drained queue is tolerated and skipped;
    /// tokens are only a wakeup hint, the queue is the source of truth.
    pub fn take(&self) -> Result<DataEvent, TransportError> {
        loop {
            let token = self
                .ready_rx
                .recv()
                .map_err(|_| TransportError::Interrupted)?;
            if token == INTERRUPT_TOKEN {
                return Err(TransportError::Interrupted);
            }
            let channel = self.gate.channel(token);
            let (event, still_pending) = channel.poll_and_check();
            if still_pending {
                let _ = self.ready_tx.send(token);
            }
            if let Some(event) = event {
                return Ok(event);
            }
        }
    }

    /// Unblock a reader stuck in [`take`](Self::take).
    pub(crate) fn interrupt(&self) {
        let _ = self.ready_tx.send(INTERRUPT_TOKEN);
    }

    /// The gate this absorber drains.
    #[inline]
    pub fn gate(&self) -> &Arc<Gate> {
        &self.gate
    }
}

impl std::fmt::Debug for RoundRobinAbsorber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundRobinAbsorber")
            .field("gate", &self.gate.index())
            .finish()
    }
}
