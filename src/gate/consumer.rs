//! Input side of a task: gate construction, the absorb protocol loop,
//! exhaustion tracking, and the close handshake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::unbounded;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::descriptor::{GateDirection, TaskDescriptor, TaskId};
use crate::event::{ChannelHandle, DataEvent, EventKind, ProtocolError};
use crate::gate::{Gate, RoundRobinAbsorber, TransportError};
use crate::memory::BufferPool;
use crate::task::{StateMachine, TaskTransition};

/// How long `absorb_channel` polls before dumping queue depths and falling
/// back to an unbounded blocking take. Diagnostic only.
const ABSORB_PROBE_TIMEOUT: Duration = Duration::from_secs(20);

/// Per-gate close-handshake bookkeeping.
struct CloseTracker {
    /// Whether a close is in flight since the latest `close_gate`.
    pending: bool,
    /// Ack received per remote channel since the latest `close_gate`.
    acked: HashMap<TaskId, bool>,
}

/// What one digested event means for the absorb loop.
enum Digest {
    /// A payload event to hand to the caller.
    Deliver(DataEvent),
    /// The gate has nothing further to yield right now.
    Drained,
    /// Control event consumed; keep retrieving.
    Continue,
}

/// The consuming endpoint of a task: all input gates and their protocol state.
pub struct DataConsumer {
    task: TaskDescriptor,
    state: Arc<StateMachine>,
    allocator: Arc<BufferPool>,
    gates: Vec<Arc<Gate>>,
    absorbers: Vec<RoundRobinAbsorber>,
    /// Channels (by remote task) that may still send data, per gate.
    active: Vec<Mutex<HashSet<TaskId>>>,
    closed: Vec<Mutex<CloseTracker>>,
    close_finished: Vec<AtomicBool>,
    exhausted: AtomicBool,
    remaining_connect: Mutex<Vec<i64>>,
    gate_index_of: HashMap<TaskId, usize>,
    channel_index_of: HashMap<TaskId, usize>,
}

impl DataConsumer {
    /// Build the input gates from the binding's endpoint lists.
    ///
    /// Normally driven through `TaskDriver::install`; exposed for harnesses
    /// that wire a consumer directly.
    pub fn bind(
        task: TaskDescriptor,
        input_binding: &[Vec<TaskDescriptor>],
        allocator: Arc<BufferPool>,
        state: Arc<StateMachine>,
    ) -> Arc<Self> {
        let mut gates = Vec::with_capacity(input_binding.len());
        let mut absorbers = Vec::with_capacity(input_binding.len());
        let mut active = Vec::with_capacity(input_binding.len());
        let mut closed = Vec::with_capacity(input_binding.len());
        let mut close_finished = Vec::with_capacity(input_binding.len());
        let mut remaining_connect = Vec::with_capacity(input_binding.len());
        let mut gate_index_of = HashMap::new();
        let mut channel_index_of = HashMap::new();

        for (gate_index, endpoints) in input_binding.iter().enumerate() {
            let (ready_tx, ready_rx) = unbounded();
            let gate = Arc::new(Gate::new(
                gate_index,
                GateDirection::Input,
                endpoints,
                ready_tx.clone(),
            ));
            absorbers.push(RoundRobinAbsorber::new(gate.clone(), ready_rx, ready_tx));
            gates.push(gate);

            let mut active_set = HashSet::new();
            let mut acked = HashMap::new();
            for (channel_index, endpoint) in endpoints.iter().enumerate() {
                active_set.insert(endpoint.task_id);
                acked.insert(endpoint.task_id, false);
                gate_index_of.insert(endpoint.task_id, gate_index);
                channel_index_of.insert(endpoint.task_id, channel_index);
            }
            active.push(Mutex::new(active_set));
            closed.push(Mutex::new(CloseTracker {
                pending: false,
                acked,
            }));
            close_finished.push(AtomicBool::new(false));
            remaining_connect.push(endpoints.len() as i64);
        }

        Arc::new(Self {
            task,
            state,
            allocator,
            gates,
            absorbers,
            active,
            closed,
            close_finished,
            exhausted: AtomicBool::new(false),
            remaining_connect: Mutex::new(remaining_connect),
            gate_index_of,
            channel_index_of,
        })
    }

    /// Number of input gates.
    #[inline]
    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    /// Gate by index. Panics on out-of-range index (caller error).
    #[inline]
    pub fn gate(&self, gate_index: usize) -> &Arc<Gate> {
        &self.gates[gate_index]
    }

    /// The shared buffer pool records are drained into and released to.
    #[inline]
    pub fn allocator(&self) -> &Arc<BufferPool> {
        &self.allocator
    }

    /// Blocking extraction of the next data event from anywhere in the gate.
    ///
    /// Returns `Ok(None)` once the gate is exhausted or a close handshake
    /// completed; control events are digested internally.
    pub fn absorb(&self, gate_index: usize) -> Result<Option<DataEvent>, TransportError> {
        if self.active[gate_index].lock().is_empty() {
            return Ok(None);
        }
        loop {
            let event = self.absorbers[gate_index].take()?;
            match self.digest(gate_index, event)? {
                Digest::Deliver(event) => return Ok(Some(event)),
                Digest::Drained => return Ok(None),
                Digest::Continue => {}
            }
        }
    }

    /// Blocking extraction from one specific channel of a gate.
    ///
    /// Used when ordering across specific inputs matters to the caller.
    pub fn absorb_channel(
        &self,
        gate_index: usize,
        channel_index: usize,
    ) -> Result<Option<DataEvent>, TransportError> {
        if self.active[gate_index].lock().is_empty() {
            return Ok(None);
        }
        loop {
            let channel = self.gates[gate_index].channel(channel_index);
            let event = match channel.poll_timeout(ABSORB_PROBE_TIMEOUT) {
                Some(event) => event,
                None => {
                    for other in self.gates[gate_index].channels() {
                        warn!(
                            gate = gate_index,
                            channel = other.index(),
                            depth = other.pending(),
                            "absorb stalled, channel queue depth"
                        );
                    }
                    channel.take_blocking()?
                }
            };
            match self.digest(gate_index, event)? {
                Digest::Deliver(event) => return Ok(Some(event)),
                Digest::Drained => return Ok(None),
                Digest::Continue => {}
            }
        }
    }

    /// Consume one control event, or pass a data event through.
    fn digest(&self, gate_index: usize, event: DataEvent) -> Result<Digest, TransportError> {
        match event {
            DataEvent::Data { .. } => Ok(Digest::Deliver(event)),

            DataEvent::SourceExhausted { src, .. } => {
                let drained = {
                    let mut active = self.active[gate_index].lock();
                    if !active.remove(&src) {
                        return Err(ProtocolError::DuplicateExhaustion {
                            src,
                            gate: gate_index,
                        }
                        .into());
                    }
                    active.is_empty()
                };

                let all_exhausted = self.active.iter().all(|set| set.lock().is_empty());
                self.exhausted.store(all_exhausted, Ordering::SeqCst);

                if drained {
                    debug!(gate = gate_index, "all channels exhausted");
                    Ok(Digest::Drained)
                } else {
                    Ok(Digest::Continue)
                }
            }

            DataEvent::GateCloseAck { src, .. } => {
                let mut tracker = self.closed[gate_index].lock();
                if !tracker.pending || !tracker.acked.contains_key(&src) {
                    return Err(ProtocolError::UnexpectedCloseAck {
                        src,
                        gate: gate_index,
                    }
                    .into());
                }
                tracker.acked.insert(src, true);

                if tracker.acked.values().all(|acked| *acked) {
                    tracker.pending = false;
                    self.close_finished[gate_index].store(true, Ordering::SeqCst);
                    Ok(Digest::Drained)
                } else {
                    Ok(Digest::Continue)
                }
            }

            other => Err(ProtocolError::UnexpectedQueuedEvent {
                kind: other.kind(),
                gate: gate_index,
            }
            .into()),
        }
    }

    /// Let the gate accept data.
    pub fn open_gate(&self, gate_index: usize) {
        self.gates[gate_index].set_open(true);
    }

    /// Request close of the remote output gates feeding this gate.
    ///
    /// Sends a close signal on every channel; the gate counts as closed only
    /// once every channel has acknowledged since this call.
    pub fn close_gate(&self, gate_index: usize) -> Result<(), TransportError> {
        self.close_finished[gate_index].store(false, Ordering::SeqCst);
        {
            let mut tracker = self.closed[gate_index].lock();
            tracker.pending = true;
            for acked in tracker.acked.values_mut() {
                *acked = false;
            }
        }
        let gate = &self.gates[gate_index];
        gate.set_open(false);
        for channel in gate.channels() {
            channel.deliver(
                DataEvent::GateClose {
                    src: self.task.task_id,
                    dst: channel.remote(),
                },
                gate_index,
            )?;
        }
        Ok(())
    }

    /// Whether every channel acknowledged the latest `close_gate`.
    pub fn is_gate_closed(&self, gate_index: usize) -> bool {
        self.close_finished[gate_index].load(Ordering::SeqCst)
    }

    /// Whether every channel of every gate reported exhaustion.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }

    /// Whether the given remote already reported exhaustion on this gate.
    pub fn is_channel_exhausted(&self, gate_index: usize, src: TaskId) -> bool {
        !self.active[gate_index].lock().contains(&src)
    }

    /// Gate index fed by the given remote task, if any.
    pub fn gate_index_of(&self, src: TaskId) -> Option<usize> {
        self.gate_index_of.get(&src).copied()
    }

    /// Channel index fed by the given remote task, if any.
    pub fn channel_index_of(&self, src: TaskId) -> Option<usize> {
        self.channel_index_of.get(&src).copied()
    }

    /// Wire up one connected input channel and count down the handshake.
    pub fn on_channel_connected(
        &self,
        src: TaskId,
        handle: Arc<dyn ChannelHandle>,
    ) -> Result<(), TransportError> {
        let gate_index = self.gate_index_of(src).ok_or(ProtocolError::UnknownRoute {
            kind: EventKind::ChannelConnected,
            src,
            dst: self.task.task_id,
        })?;
        let channel_index = self.channel_index_of[&src];
        self.gates[gate_index].channel(channel_index).connect(handle);
        debug!(
            "input connection from [{}] to task {} established",
            src, self.task
        );

        let fully_connected = {
            let mut remaining = self.remaining_connect.lock();
            remaining[gate_index] -= 1;
            if remaining[gate_index] < 0 {
                return Err(ProtocolError::UnexpectedConnect {
                    src,
                    direction: GateDirection::Input,
                    gate: gate_index,
                }
                .into());
            }
            remaining[gate_index] == 0 && remaining.iter().all(|count| *count == 0)
        };

        if fully_connected {
            self.state.transition(TaskTransition::InputsConnected)?;
        }
        Ok(())
    }

    /// Thread-safe hand-off of one transport event into its channel queue.
    pub fn enqueue(&self, event: DataEvent) -> Result<(), TransportError> {
        let src = event.src();
        let gate_index = self.gate_index_of(src).ok_or(ProtocolError::UnknownRoute {
            kind: event.kind(),
            src,
            dst: self.task.task_id,
        })?;
        let channel_index = self.channel_index_of[&src];
        self.gates[gate_index].channel(channel_index).push(event);
        Ok(())
    }

    /// Unblock every reader; used on task uninstall.
    pub(crate) fn interrupt(&self) {
        for absorber in &self.absorbers {
            absorber.interrupt();
        }
        for gate in &self.gates {
            for channel in gate.channels() {
                channel.interrupt();
            }
        }
    }
}

impl std::fmt::Debug for DataConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataConsumer")
            .field("task", &self.task.name)
            .field("gates", &self.gates.len())
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}
