//! Event routing table.
//!
//! The original design dispatched on runtime type tags; here the table is a
//! fixed array over [`EventKind`], and the constructor takes one handler per
//! kind, so a missing handler is a compile error rather than a silent drop.

use crate::event::{DataEvent, EventKind};
use crate::gate::TransportError;

/// One registered handler. Receives the event by value (buffers move).
pub type EventHandler = Box<dyn Fn(DataEvent) -> Result<(), TransportError> + Send + Sync>;

/// Fixed handler table indexed by event kind.
pub struct EventDispatcher {
    handlers: [EventHandler; EventKind::COUNT],
}

impl EventDispatcher {
    /// Build a dispatcher with a handler for every event kind.
    pub fn new(
        on_data: EventHandler,
        on_source_exhausted: EventHandler,
        on_channel_connected: EventHandler,
        on_gate_close: EventHandler,
        on_gate_close_ack: EventHandler,
    ) -> Self {
        Self {
            handlers: [
                on_data,
                on_source_exhausted,
                on_channel_connected,
                on_gate_close,
                on_gate_close_ack,
            ],
        }
    }

    /// Route one event to its registered handler.
    pub fn dispatch(&self, event: DataEvent) -> Result<(), TransportError> {
        self.handlers[event.kind() as usize](event)
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("kinds", &EventKind::COUNT)
            .finish()
    }
}
