//! Crate-level error umbrella.
//!
//! Module-local error types stay next to the code that raises them
//! (`memory::MemoryError`, `event::ProtocolError`, ...); this enum folds
//! them into one surface for callers of the task manager.

use thiserror::Error;

use crate::descriptor::{BindingError, TaskId};
use crate::event::ProtocolError;
use crate::gate::TransportError;
use crate::memory::MemoryError;
use crate::util::config::ConfigError;

/// Any error the substrate can surface to a caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed binding at install time; the task is never installed.
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// Runtime configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Buffer pool failure (timeout or shutdown).
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Unexpected handshake or lifecycle event; drives the task to failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Data-path failure (interrupted wait, unconnected channel, codec).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Operation referenced a task this node does not know.
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
