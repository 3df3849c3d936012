//! Output side of a task: outbound gates, emit/broadcast, the exhaustion
//! announcement, and the producer half of the close handshake.

use std::sync::Arc;

use crossbeam::channel::unbounded;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::descriptor::{GateDirection, TaskDescriptor, TaskId};
use crate::event::{ChannelHandle, DataEvent, EventKind, ProtocolError};
use crate::gate::{Gate, TransportError};
use crate::memory::{Buffer, BufferPool};
use crate::task::{StateMachine, TaskTransition};

/// The producing endpoint of a task: all output gates.
pub struct DataProducer {
    task: TaskDescriptor,
    state: Arc<StateMachine>,
    allocator: Arc<BufferPool>,
    gates: Vec<Arc<Gate>>,
    binding: Vec<Vec<TaskDescriptor>>,
    remaining_connect: Mutex<Vec<i64>>,
    gate_index_of: HashMap<TaskId, usize>,
    channel_index_of: HashMap<TaskId, usize>,
}

impl DataProducer {
    /// Build the output gates from the binding's endpoint lists.
    ///
    /// Normally driven through `TaskDriver::install`; exposed for harnesses
    /// that wire a producer directly.
    pub fn bind(
        task: TaskDescriptor,
        output_binding: &[Vec<TaskDescriptor>],
        allocator: Arc<BufferPool>,
        state: Arc<StateMachine>,
    ) -> Arc<Self> {
        let mut gates = Vec::with_capacity(output_binding.len());
        let mut remaining_connect = Vec::with_capacity(output_binding.len());
        let mut gate_index_of = HashMap::new();
        let mut channel_index_of = HashMap::new();

        for (gate_index, endpoints) in output_binding.iter().enumerate() {
            // Output channels never enqueue inbound events; the ready-queue
            // receiver is dropped on purpose.
            let (ready_tx, _ready_rx) = unbounded();
            gates.push(Arc::new(Gate::new(
                gate_index,
                GateDirection::Output,
                endpoints,
                ready_tx,
            )));
            for (channel_index, endpoint) in endpoints.iter().enumerate() {
                gate_index_of.insert(endpoint.task_id, gate_index);
                channel_index_of.insert(endpoint.task_id, channel_index);
            }
            remaining_connect.push(endpoints.len() as i64);
        }

        Arc::new(Self {
            task,
            state,
            allocator,
            gates,
            binding: output_binding.to_vec(),
            remaining_connect: Mutex::new(remaining_connect),
            gate_index_of,
            channel_index_of,
        })
    }

    /// Number of output gates.
    #[inline]
    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    /// Gate by index. Panics on out-of-range index (caller error).
    #[inline]
    pub fn gate(&self, gate_index: usize) -> &Arc<Gate> {
        &self.gates[gate_index]
    }

    /// Remote consumers of the given gate, in channel order.
    #[inline]
    pub fn binding(&self, gate_index: usize) -> &[TaskDescriptor] {
        &self.binding[gate_index]
    }

    /// Owning task identity.
    #[inline]
    pub fn task_id(&self) -> TaskId {
        self.task.task_id
    }

    /// The shared buffer pool outbound payloads are drawn from.
    #[inline]
    pub fn allocator(&self) -> &Arc<BufferPool> {
        &self.allocator
    }

    /// Send one event on one specific channel of a gate.
    pub fn emit(
        &self,
        gate_index: usize,
        channel_index: usize,
        event: DataEvent,
    ) -> Result<(), TransportError> {
        self.gates[gate_index]
            .channel(channel_index)
            .deliver(event, gate_index)
    }

    /// Send one payload buffer to every channel of a gate.
    ///
    /// Channels beyond the first receive fresh pool buffers carrying a copy
    /// of the payload; the original buffer moves to channel 0.
    pub fn broadcast(&self, gate_index: usize, buffer: Buffer) -> Result<(), TransportError> {
        let gate = &self.gates[gate_index];
        for channel in gate.channels().iter().skip(1) {
            let mut copy = self.allocator.alloc()?;
            copy.write(buffer.as_slice());
            channel.deliver(
                DataEvent::Data {
                    src: self.task.task_id,
                    dst: channel.remote(),
                    buffer: copy,
                },
                gate_index,
            )?;
        }
        let first = gate.channel(0);
        first.deliver(
            DataEvent::Data {
                src: self.task.task_id,
                dst: first.remote(),
                buffer,
            },
            gate_index,
        )
    }

    /// Announce on every channel of the gate that no further data follows.
    pub fn done(&self, gate_index: usize) -> Result<(), TransportError> {
        for channel in self.gates[gate_index].channels() {
            channel.deliver(
                DataEvent::SourceExhausted {
                    src: self.task.task_id,
                    dst: channel.remote(),
                },
                gate_index,
            )?;
        }
        Ok(())
    }

    /// Let the gate emit data.
    pub fn open_gate(&self, gate_index: usize) {
        self.gates[gate_index].set_open(true);
    }

    /// Wire up one connected output channel and count down the handshake.
    pub fn on_channel_connected(
        &self,
        dst: TaskId,
        handle: Arc<dyn ChannelHandle>,
    ) -> Result<(), TransportError> {
        let gate_index = self
            .gate_index_of
            .get(&dst)
            .copied()
            .ok_or(ProtocolError::UnknownRoute {
                kind: EventKind::ChannelConnected,
                src: self.task.task_id,
                dst,
            })?;
        let channel_index = self.channel_index_of[&dst];
        self.gates[gate_index].channel(channel_index).connect(handle);
        debug!(
            "output connection from task {} to [{}] established",
            self.task, dst
        );

        let fully_connected = {
            let mut remaining = self.remaining_connect.lock();
            remaining[gate_index] -= 1;
            if remaining[gate_index] < 0 {
                return Err(ProtocolError::UnexpectedConnect {
                    src: dst,
                    direction: GateDirection::Output,
                    gate: gate_index,
                }
                .into());
            }
            remaining[gate_index] == 0 && remaining.iter().all(|count| *count == 0)
        };

        if fully_connected {
            self.state.transition(TaskTransition::OutputsConnected)?;
        }
        Ok(())
    }

    /// Producer half of the close handshake: mark the channel closed and
    /// acknowledge to the requesting consumer.
    pub fn on_gate_close(&self, requester: TaskId) -> Result<(), TransportError> {
        let gate_index =
            self.gate_index_of
                .get(&requester)
                .copied()
                .ok_or(ProtocolError::UnknownRoute {
                    kind: EventKind::GateClose,
                    src: requester,
                    dst: self.task.task_id,
                })?;
        let channel_index = self.channel_index_of[&requester];
        let channel = self.gates[gate_index].channel(channel_index);
        channel.set_closed(true);
        debug!(
            gate = gate_index,
            channel = channel_index,
            "close requested by [{}]",
            requester
        );
        channel.deliver(
            DataEvent::GateCloseAck {
                src: self.task.task_id,
                dst: requester,
            },
            gate_index,
        )
    }
}

impl std::fmt::Debug for DataProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProducer")
            .field("task", &self.task.name)
            .field("gates", &self.gates.len())
            .finish()
    }
}
