//! Task lifecycle state machine.
//!
//! A Moore machine over the task lifecycle, driven by connection-completion
//! and execution events. The whole transition space is one explicit
//! `(state, transition) -> next` table evaluated under a single per-task
//! lock; entering [`TaskState::Ready`] is the only state entry with a side
//! effect (submission to the scheduler, via the registered observer).

mod driver;

pub use driver::{TaskDriver, TaskInvokable};

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use crate::descriptor::{TaskDescriptor, TaskId};
use crate::event::ProtocolError;

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Installed, no side fully connected yet.
    NotConnected,
    /// Every channel of every input gate is connected.
    InputsConnected,
    /// Every channel of every output gate is connected.
    OutputsConnected,
    /// Both sides connected; submitted to the scheduler on entry.
    Ready,
    /// Executing on its pinned execution unit.
    Running,
    /// Ran to completion. Terminal.
    Finished,
    /// Aborted by an error or protocol violation. Terminal.
    Failure,
    /// Reachable only through a transition-table bug; always fatal.
    Undefined,
}

impl TaskState {
    /// Whether the state has no outgoing transitions.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Failure)
    }
}

/// Task lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskTransition {
    /// All input gates fully connected.
    InputsConnected,
    /// All output gates fully connected.
    OutputsConnected,
    /// An execution unit picked the task up.
    Run,
    /// The task body returned successfully.
    Finish,
    /// The task body failed or a protocol violation aborted it.
    Fail,
}

/// The complete transition space. Anything absent is illegal.
pub fn transition_table(state: TaskState, transition: TaskTransition) -> Option<TaskState> {
    match (state, transition) {
        (TaskState::NotConnected, TaskTransition::InputsConnected) => {
            Some(TaskState::InputsConnected)
        }
        (TaskState::NotConnected, TaskTransition::OutputsConnected) => {
            Some(TaskState::OutputsConnected)
        }
        (TaskState::InputsConnected, TaskTransition::OutputsConnected) => Some(TaskState::Ready),
        (TaskState::OutputsConnected, TaskTransition::InputsConnected) => Some(TaskState::Ready),
        (TaskState::Ready, TaskTransition::Run) => Some(TaskState::Running),
        (TaskState::Running, TaskTransition::Finish) => Some(TaskState::Finished),
        (
            TaskState::NotConnected
            | TaskState::InputsConnected
            | TaskState::OutputsConnected
            | TaskState::Ready
            | TaskState::Running,
            TaskTransition::Fail,
        ) => Some(TaskState::Failure),
        _ => None,
    }
}

/// Observer invoked on every state entry, under the task lock.
pub type StateObserver = Box<dyn Fn(TaskState) + Send + Sync>;

/// Per-task lifecycle automaton.
///
/// Connection events arrive from concurrent network-event threads, so every
/// transition runs under this machine's exclusive lock.
pub struct StateMachine {
    task: TaskId,
    name: String,
    state: Mutex<TaskState>,
    observer: RwLock<Option<StateObserver>>,
}

impl StateMachine {
    /// Create a machine in [`TaskState::NotConnected`].
    pub fn new(descriptor: &TaskDescriptor) -> Self {
        Self {
            task: descriptor.task_id,
            name: descriptor.name.clone(),
            state: Mutex::new(TaskState::NotConnected),
            observer: RwLock::new(None),
        }
    }

    /// Owning task identity.
    #[inline]
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// Current state.
    pub fn current(&self) -> TaskState {
        *self.state.lock()
    }

    /// Register the Moore observer. The scheduler registers one that submits
    /// the task on entry to [`TaskState::Ready`].
    pub fn set_observer(&self, observer: StateObserver) {
        *self.observer.write() = Some(observer);
    }

    /// Apply one transition.
    ///
    /// An attempted transition absent from the table is never silently
    /// ignored: it drives a non-terminal task to [`TaskState::Failure`] and
    /// surfaces as a protocol violation.
    pub fn transition(&self, transition: TaskTransition) -> Result<TaskState, ProtocolError> {
        let mut state = self.state.lock();
        let from = *state;
        match transition_table(from, transition) {
            Some(next) if next != TaskState::Undefined => {
                *state = next;
                info!(
                    "change state of task {} [{}] from {:?} to {:?}",
                    self.name, self.task, from, next
                );
                self.notify(next);
                Ok(next)
            }
            _ => {
                if !from.is_terminal() {
                    *state = TaskState::Failure;
                    self.notify(TaskState::Failure);
                }
                error!(
                    "transition {:?} of task {} [{}] from state {:?} is not defined",
                    transition, self.name, self.task, from
                );
                Err(ProtocolError::IllegalTransition {
                    task: self.task,
                    state: from,
                    transition,
                })
            }
        }
    }

    fn notify(&self, entered: TaskState) {
        if let Some(observer) = self.observer.read().as_ref() {
            observer(entered);
        }
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("task", &self.task)
            .field("state", &self.current())
            .finish()
    }
}

/// Shared handle alias used across consumer/producer seams.
pub type SharedStateMachine = Arc<StateMachine>;

#[cfg(test)]
mod tests;
