//! Per-task aggregate: descriptor, binding, both transport endpoints, the
//! state machine, and the user-code seam.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::descriptor::{BindingDescriptor, GateDirection, TaskDescriptor, TaskId};
use crate::event::{DataEvent, EventDispatcher, EventHandler, ProtocolError};
use crate::gate::{DataConsumer, DataProducer, TransportError};
use crate::memory::BufferPool;
use crate::task::{StateMachine, TaskTransition};

/// User-supplied task body.
///
/// Runs to completion on the task's pinned execution unit. A blocking point
/// interrupted by uninstall surfaces as an error; the body must treat it as
/// terminal.
pub trait TaskInvokable: Send {
    /// Execute the task against its driver.
    fn run(&mut self, driver: &TaskDriver) -> anyhow::Result<()>;
}

impl<F> TaskInvokable for F
where
    F: FnMut(&TaskDriver) -> anyhow::Result<()> + Send,
{
    fn run(&mut self, driver: &TaskDriver) -> anyhow::Result<()> {
        self(driver)
    }
}

/// Everything one installed task owns.
///
/// Created at install time, torn down at uninstall. Gates and channels live
/// inside the consumer/producer and share the driver's lifetime.
pub struct TaskDriver {
    descriptor: TaskDescriptor,
    binding: BindingDescriptor,
    state: Arc<StateMachine>,
    consumer: Arc<DataConsumer>,
    producer: Arc<DataProducer>,
    dispatcher: EventDispatcher,
    invokable: Mutex<Option<Box<dyn TaskInvokable>>>,
    allocator: Arc<BufferPool>,
}

impl TaskDriver {
    /// Validate the binding and build the task's transport endpoints.
    ///
    /// A malformed binding fails here, synchronously, before any scheduling.
    pub fn install(
        descriptor: TaskDescriptor,
        binding: BindingDescriptor,
        allocator: Arc<BufferPool>,
        invokable: Box<dyn TaskInvokable>,
    ) -> crate::Result<Arc<Self>> {
        binding.validate()?;

        let state = Arc::new(StateMachine::new(&descriptor));
        let consumer = DataConsumer::bind(
            descriptor.clone(),
            &binding.input_gates,
            allocator.clone(),
            state.clone(),
        );
        let producer = DataProducer::bind(
            descriptor.clone(),
            &binding.output_gates,
            allocator.clone(),
            state.clone(),
        );
        let dispatcher = Self::build_dispatcher(consumer.clone(), producer.clone());

        Ok(Arc::new(Self {
            descriptor,
            binding,
            state,
            consumer,
            producer,
            dispatcher,
            invokable: Mutex::new(Some(invokable)),
            allocator,
        }))
    }

    /// One handler per event kind; completeness is enforced by the
    /// dispatcher constructor.
    fn build_dispatcher(
        consumer: Arc<DataConsumer>,
        producer: Arc<DataProducer>,
    ) -> EventDispatcher {
        let on_data: EventHandler = {
            let consumer = consumer.clone();
            Box::new(move |event: DataEvent| consumer.enqueue(event))
        };
        let on_source_exhausted: EventHandler = {
            let consumer = consumer.clone();
            Box::new(move |event: DataEvent| consumer.enqueue(event))
        };
        let on_channel_connected: EventHandler = {
            let consumer = consumer.clone();
            let producer = producer.clone();
            Box::new(move |event: DataEvent| match event {
                DataEvent::ChannelConnected {
                    src,
                    dst,
                    direction,
                    handle,
                } => match direction {
                    GateDirection::Input => consumer.on_channel_connected(src, handle),
                    GateDirection::Output => producer.on_channel_connected(dst, handle),
                },
                other => Err(ProtocolError::UnknownRoute {
                    kind: other.kind(),
                    src: other.src(),
                    dst: other.dst(),
                }
                .into()),
            })
        };
        let on_gate_close: EventHandler = {
            let producer = producer.clone();
            Box::new(move |event: DataEvent| producer.on_gate_close(event.src()))
        };
        let on_gate_close_ack: EventHandler =
            Box::new(move |event: DataEvent| consumer.enqueue(event));

        EventDispatcher::new(
            on_data,
            on_source_exhausted,
            on_channel_connected,
            on_gate_close,
            on_gate_close_ack,
        )
    }

    /// Dispatch the immediate connected-transitions for sides with no edges.
    ///
    /// Called by the task manager after the driver is registered, so the
    /// Ready side effect can already reach the scheduler.
    pub fn complete_install(&self) -> Result<(), ProtocolError> {
        if self.binding.input_gates.is_empty() {
            self.state.transition(TaskTransition::InputsConnected)?;
        }
        if self.binding.output_gates.is_empty() {
            self.state.transition(TaskTransition::OutputsConnected)?;
        }
        Ok(())
    }

    /// Route one transport event through the task's handler table.
    pub fn dispatch_event(&self, event: DataEvent) -> Result<(), TransportError> {
        self.dispatcher.dispatch(event)
    }

    /// Owning task identity.
    #[inline]
    pub fn task_id(&self) -> TaskId {
        self.descriptor.task_id
    }

    /// Task descriptor.
    #[inline]
    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    /// Binding this task was installed with.
    #[inline]
    pub fn binding(&self) -> &BindingDescriptor {
        &self.binding
    }

    /// Lifecycle state machine.
    #[inline]
    pub fn state(&self) -> &Arc<StateMachine> {
        &self.state
    }

    /// Input endpoint.
    #[inline]
    pub fn consumer(&self) -> &Arc<DataConsumer> {
        &self.consumer
    }

    /// Output endpoint.
    #[inline]
    pub fn producer(&self) -> &Arc<DataProducer> {
        &self.producer
    }

    /// The node's shared buffer pool.
    #[inline]
    pub fn allocator(&self) -> &Arc<BufferPool> {
        &self.allocator
    }

    /// Take the task body for execution. Yields `None` after the first call.
    pub fn take_invokable(&self) -> Option<Box<dyn TaskInvokable>> {
        self.invokable.lock().take()
    }

    /// Interrupt every blocking point; used on uninstall.
    pub fn interrupt(&self) {
        self.consumer.interrupt();
    }
}

impl std::fmt::Debug for TaskDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDriver")
            .field("task", &self.descriptor.name)
            .field("state", &self.state.current())
            .finish()
    }
}
