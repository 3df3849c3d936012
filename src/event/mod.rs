//! Dataflow event model.
//!
//! Everything that crosses a channel is one of a closed set of event kinds:
//! payload buffers, the exhaustion signal, the connect notification, and the
//! two halves of the gate-close handshake. The transport layer delivers these
//! asynchronously; routing inside a task goes through [`EventDispatcher`],
//! a fixed handler table over [`EventKind`] that is complete by construction.

mod dispatch;

pub use dispatch::{EventDispatcher, EventHandler};

use std::sync::Arc;

use thiserror::Error;

use crate::descriptor::{GateDirection, TaskId};
use crate::memory::Buffer;
use crate::task::{TaskState, TaskTransition};

/// Outbound delivery seam bound to one channel at connect time.
///
/// Implementations carry the event to the remote endpoint; the substrate
/// never opens sockets or manages reconnection.
pub trait ChannelHandle: Send + Sync {
    /// Hand one event to the transport for delivery to the remote task.
    fn deliver(&self, event: DataEvent) -> Result<(), crate::gate::TransportError>;
}

/// Closed union of everything that can travel over a channel.
pub enum DataEvent {
    /// A payload buffer. Ownership of the buffer moves with the event.
    Data {
        src: TaskId,
        dst: TaskId,
        buffer: Buffer,
    },
    /// The source will send no further data on this channel.
    SourceExhausted { src: TaskId, dst: TaskId },
    /// The transport established one channel and bound a delivery handle.
    ///
    /// `direction` names the side being notified: `Input` events go to the
    /// consuming task (`dst`), `Output` events to the producing task (`src`).
    ChannelConnected {
        src: TaskId,
        dst: TaskId,
        direction: GateDirection,
        handle: Arc<dyn ChannelHandle>,
    },
    /// Consumer-initiated close request for the remote output gate.
    GateClose { src: TaskId, dst: TaskId },
    /// Producer acknowledgement of a close request.
    GateCloseAck { src: TaskId, dst: TaskId },
}

impl DataEvent {
    /// Discriminant of this event.
    #[inline]
    pub fn kind(&self) -> EventKind {
        match self {
            DataEvent::Data { .. } => EventKind::Data,
            DataEvent::SourceExhausted { .. } => EventKind::SourceExhausted,
            DataEvent::ChannelConnected { .. } => EventKind::ChannelConnected,
            DataEvent::GateClose { .. } => EventKind::GateClose,
            DataEvent::GateCloseAck { .. } => EventKind::GateCloseAck,
        }
    }

    /// Originating task.
    #[inline]
    pub fn src(&self) -> TaskId {
        match self {
            DataEvent::Data { src, .. }
            | DataEvent::SourceExhausted { src, .. }
            | DataEvent::ChannelConnected { src, .. }
            | DataEvent::GateClose { src, .. }
            | DataEvent::GateCloseAck { src, .. } => *src,
        }
    }

    /// Destination task.
    #[inline]
    pub fn dst(&self) -> TaskId {
        match self {
            DataEvent::Data { dst, .. }
            | DataEvent::SourceExhausted { dst, .. }
            | DataEvent::ChannelConnected { dst, .. }
            | DataEvent::GateClose { dst, .. }
            | DataEvent::GateCloseAck { dst, .. } => *dst,
        }
    }
}

impl std::fmt::Debug for DataEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("DataEvent");
        d.field("kind", &self.kind())
            .field("src", &self.src())
            .field("dst", &self.dst());
        if let DataEvent::Data { buffer, .. } = self {
            d.field("payload_len", &buffer.readable());
        }
        d.finish()
    }
}

/// Fieldless discriminants of [`DataEvent`], usable as a table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Data = 0,
    SourceExhausted = 1,
    ChannelConnected = 2,
    GateClose = 3,
    GateCloseAck = 4,
}

impl EventKind {
    /// Number of event kinds; the dispatcher table length.
    pub const COUNT: usize = 5;
}

/// Violation of the channel or lifecycle protocol.
///
/// These are never silently absorbed: they abort the owning task and drive
/// its state machine toward failure.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A connect event arrived for a gate whose channels are all connected.
    #[error("unexpected channel connect from {src} on {direction} gate {gate}")]
    UnexpectedConnect {
        src: TaskId,
        direction: GateDirection,
        gate: usize,
    },

    /// A channel reported exhaustion twice, or was never active.
    #[error("duplicate exhaustion report from {src} on gate {gate}")]
    DuplicateExhaustion { src: TaskId, gate: usize },

    /// A close acknowledgement from a channel not expected to close.
    #[error("unexpected close ack from {src} on gate {gate}")]
    UnexpectedCloseAck { src: TaskId, gate: usize },

    /// An event arrived for a task or channel this node does not track.
    #[error("no route for {kind:?} event from {src} to {dst}")]
    UnknownRoute {
        kind: EventKind,
        src: TaskId,
        dst: TaskId,
    },

    /// An event kind that never belongs in a channel queue was enqueued.
    #[error("unexpected {kind:?} event queued on gate {gate}")]
    UnexpectedQueuedEvent { kind: EventKind, gate: usize },

    /// A lifecycle transition absent from the transition table.
    #[error("illegal transition {transition:?} from state {state:?} for task {task}")]
    IllegalTransition {
        task: TaskId,
        state: TaskState,
        transition: TaskTransition,
    },
}
