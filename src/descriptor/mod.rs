//! Task and binding descriptors.
//!
//! Descriptors are supplied by an external topology/deployment component at
//! install time. A binding lists, per gate, the remote endpoints that realize
//! one dataflow edge; the gate's channel count is fixed by that list.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a fresh random identifier.
    #[inline]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for TaskId {
    fn from(val: Uuid) -> Self {
        Self(val)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one deployed task instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique task ID.
    pub task_id: TaskId,
    /// Task name for logging.
    pub name: String,
}

impl TaskDescriptor {
    /// Create a descriptor with a fresh ID.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            task_id: TaskId::generate(),
            name: name.into(),
        }
    }

    /// Create a descriptor with a caller-chosen ID.
    pub fn with_id(task_id: TaskId, name: impl Into<String>) -> Self {
        Self {
            task_id,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for TaskDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.name, self.task_id)
    }
}

/// Gate direction relative to the owning task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateDirection {
    /// The gate consumes records from upstream tasks.
    Input,
    /// The gate emits records to downstream tasks.
    Output,
}

impl std::fmt::Display for GateDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateDirection::Input => write!(f, "input"),
            GateDirection::Output => write!(f, "output"),
        }
    }
}

/// Per-task binding: one endpoint list per gate, in gate order.
///
/// `input_gates[g]` holds the remote producers feeding input gate `g`;
/// `output_gates[g]` holds the remote consumers fed by output gate `g`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingDescriptor {
    /// Remote endpoints per input gate.
    pub input_gates: Vec<Vec<TaskDescriptor>>,
    /// Remote endpoints per output gate.
    pub output_gates: Vec<Vec<TaskDescriptor>>,
}

/// Binding validation failure. Fails fast at install time.
#[derive(Debug, Error)]
pub enum BindingError {
    /// A gate with no endpoints cannot carry an edge.
    #[error("{direction} gate {gate} has no endpoints")]
    EmptyGate {
        direction: GateDirection,
        gate: usize,
    },

    /// Channel lookup is keyed by remote task ID, so duplicates are rejected.
    #[error("duplicate endpoint {task} on {direction} gate {gate}")]
    DuplicateEndpoint {
        direction: GateDirection,
        gate: usize,
        task: TaskId,
    },
}

impl BindingDescriptor {
    /// Create an empty binding (a task with no edges).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an input gate bound to the given remote producers.
    pub fn add_input_gate(mut self, endpoints: Vec<TaskDescriptor>) -> Self {
        self.input_gates.push(endpoints);
        self
    }

    /// Append an output gate bound to the given remote consumers.
    pub fn add_output_gate(mut self, endpoints: Vec<TaskDescriptor>) -> Self {
        self.output_gates.push(endpoints);
        self
    }

    /// Validate the binding. Called before any gate is constructed.
    pub fn validate(&self) -> Result<(), BindingError> {
        Self::validate_side(&self.input_gates, GateDirection::Input)?;
        Self::validate_side(&self.output_gates, GateDirection::Output)
    }

    fn validate_side(
        gates: &[Vec<TaskDescriptor>],
        direction: GateDirection,
    ) -> Result<(), BindingError> {
        for (gate, endpoints) in gates.iter().enumerate() {
            if endpoints.is_empty() {
                return Err(BindingError::EmptyGate { direction, gate });
            }
            let mut seen = hashbrown::HashSet::new();
            for endpoint in endpoints {
                if !seen.insert(endpoint.task_id) {
                    return Err(BindingError::DuplicateEndpoint {
                        direction,
                        gate,
                        task: endpoint.task_id,
                    });
                }
            }
        }
        Ok(())
    }
}
