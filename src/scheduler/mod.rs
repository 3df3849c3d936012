//! Task installation and the greedy load-balancing scheduler.
//!
//! The manager owns a fixed pool of execution units and the node's shared
//! buffer pool. Entering Ready submits a task to the unit with the strictly
//! smallest queue, ties broken by lowest unit index; placement is pinned, so
//! there is no rebalancing or work-stealing afterwards. Concurrency comes
//! from having multiple units, not from preempting within one.

mod unit;

pub use unit::ExecutionUnit;

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::info;

use crate::descriptor::{BindingDescriptor, GateDirection, TaskDescriptor, TaskId};
use crate::event::DataEvent;
use crate::memory::BufferPool;
use crate::task::{TaskDriver, TaskInvokable, TaskState};
use crate::util::config::RuntimeConfig;
use crate::Error;

/// Per-node task manager: install/uninstall surface, transport event entry
/// point, and the execution unit pool.
pub struct TaskManager {
    config: RuntimeConfig,
    pool: Arc<BufferPool>,
    units: Arc<Vec<ExecutionUnit>>,
    tasks: Mutex<IndexMap<TaskId, Arc<TaskDriver>>>,
}

impl TaskManager {
    /// Start the unit pool and the shared buffer pool.
    pub fn new(config: RuntimeConfig) -> Self {
        assert!(config.execution_units > 0, "need at least one execution unit");
        let pool = Arc::new(BufferPool::new(config.buffer_size, config.pool_capacity));
        let units = Arc::new(
            (0..config.execution_units)
                .map(ExecutionUnit::start)
                .collect::<Vec<_>>(),
        );
        info!(
            units = config.execution_units,
            buffer_size = config.buffer_size,
            pool_capacity = config.pool_capacity,
            "task manager started"
        );
        Self {
            config,
            pool,
            units,
            tasks: Mutex::new(IndexMap::new()),
        }
    }

    /// Runtime configuration this manager was started with.
    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The node's shared buffer allocator.
    pub fn get_allocator(&self) -> Arc<BufferPool> {
        self.pool.clone()
    }

    /// The execution unit pool, in index order.
    #[inline]
    pub fn units(&self) -> &[ExecutionUnit] {
        &self.units
    }

    /// Install one task from its descriptor, binding, and executable body.
    ///
    /// Fails synchronously on a malformed binding, before any scheduling.
    /// Sides with no edges count as connected immediately, so a task with an
    /// empty binding becomes Ready inside this call.
    pub fn install_task(
        &self,
        descriptor: TaskDescriptor,
        binding: BindingDescriptor,
        invokable: Box<dyn TaskInvokable>,
    ) -> crate::Result<()> {
        let driver = TaskDriver::install(descriptor, binding, self.pool.clone(), invokable)?;

        let units = self.units.clone();
        let weak = Arc::downgrade(&driver);
        driver.state().set_observer(Box::new(move |state| {
            if state == TaskState::Ready {
                if let Some(driver) = weak.upgrade() {
                    schedule_task(&units, driver);
                }
            }
        }));

        self.tasks.lock().insert(driver.task_id(), driver.clone());
        info!("installed task {}", driver.descriptor());
        driver.complete_install()?;
        Ok(())
    }

    /// Uninstall a task, interrupting its blocking points.
    ///
    /// Calling this twice for one task is caller error; a second call finds
    /// the task gone and reports it unknown.
    pub fn uninstall_task(&self, task_id: TaskId) -> crate::Result<()> {
        let driver = self
            .tasks
            .lock()
            .shift_remove(&task_id)
            .ok_or(Error::UnknownTask(task_id))?;
        driver.interrupt();
        info!("uninstalled task {}", driver.descriptor());
        Ok(())
    }

    /// Entry point for the external transport: route one event to the task
    /// it notifies.
    pub fn dispatch_event(&self, event: DataEvent) -> crate::Result<()> {
        let target = match &event {
            DataEvent::ChannelConnected { src, dst, direction, .. } => match direction {
                GateDirection::Input => *dst,
                GateDirection::Output => *src,
            },
            other => other.dst(),
        };
        let driver = self
            .tasks
            .lock()
            .get(&target)
            .cloned()
            .ok_or(Error::UnknownTask(target))?;
        driver.dispatch_event(event)?;
        Ok(())
    }

    /// Look up one installed task.
    pub fn task(&self, task_id: TaskId) -> Option<Arc<TaskDriver>> {
        self.tasks.lock().get(&task_id).cloned()
    }

    /// Number of installed tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether every input channel of every gate of the task is exhausted.
    pub fn is_exhausted(&self, task_id: TaskId) -> crate::Result<bool> {
        let driver = self.task(task_id).ok_or(Error::UnknownTask(task_id))?;
        Ok(driver.consumer().is_exhausted())
    }

    /// Whether the task's input gate finished its latest close handshake.
    pub fn is_gate_closed(&self, task_id: TaskId, gate_index: usize) -> crate::Result<bool> {
        let driver = self.task(task_id).ok_or(Error::UnknownTask(task_id))?;
        Ok(driver.consumer().is_gate_closed(gate_index))
    }

    /// Interrupt all tasks, release the pool's waiters, and drain the units.
    ///
    /// Blocking points must be woken before the unit workers are joined, or
    /// a task stalled in `absorb` or `alloc` would block the join forever.
    pub fn shutdown(&self) {
        for driver in self.tasks.lock().values() {
            driver.interrupt();
        }
        self.pool.shutdown();
        for unit in self.units.iter() {
            unit.shutdown();
        }
        info!("task manager shut down");
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("units", &self.units.len())
            .field("tasks", &self.task_count())
            .finish()
    }
}

/// Greedy placement: the unit with the strictly smallest queue wins; on a
/// tie the lowest index is kept, so placement is reproducible.
fn schedule_task(units: &[ExecutionUnit], driver: Arc<TaskDriver>) {
    let mut selected = 0;
    let mut min_depth = units[0].enqueued_count();
    for (index, unit) in units.iter().enumerate().skip(1) {
        let depth = unit.enqueued_count();
        if depth < min_depth {
            min_depth = depth;
            selected = index;
        }
    }
    info!(
        "execute task {} on execution unit ({})",
        driver.descriptor(),
        units[selected].id()
    );
    units[selected].enqueue(driver);
}

#[cfg(test)]
mod tests;
