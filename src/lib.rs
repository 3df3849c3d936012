//! TianHe (天河) Dataflow Substrate
//!
//! The per-task data-transport and execution layer of a distributed dataflow
//! runtime. Each task exchanges typed records with its peers over multiplexed,
//! gated channels backed by a bounded pool of fixed-size buffers, while a
//! lifecycle state machine and a worker-pool scheduler decide when and where
//! the task runs.
//!
//! # Example
//!
//! ```no_run
//! use tianhe::scheduler::TaskManager;
//! use tianhe::util::config::RuntimeConfig;
//!
//! let manager = TaskManager::new(RuntimeConfig::default());
//! let allocator = manager.get_allocator();
//! ```

#![doc(html_root_url = "https://docs.rs/tianhe")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod descriptor;
pub mod event;
pub mod gate;
pub mod memory;
pub mod record;
pub mod scheduler;
pub mod task;

// Utility modules
pub mod util;

mod error;

// Re-exports
pub use anyhow::Context;
pub use error::{Error, Result};

pub use descriptor::{BindingDescriptor, TaskDescriptor, TaskId};
pub use event::{ChannelHandle, DataEvent, EventKind};
pub use memory::{Buffer, BufferPool};
pub use task::{TaskDriver, TaskInvokable, TaskState, TaskTransition};

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runtime name
pub const NAME: &str = "TianHe (天河)";
