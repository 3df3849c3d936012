//! 调度器单元测试
//!
//! 验证贪心最小负载放置、确定性平局处理和卸载中断。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::descriptor::{BindingDescriptor, GateDirection, TaskDescriptor};
use crate::event::DataEvent;
use crate::gate::TransportError;
use crate::scheduler::TaskManager;
use crate::task::{TaskDriver, TaskState};
use crate::util::config::RuntimeConfig;

/// Blocks every task until the test releases it.
struct Latch {
    open: Mutex<bool>,
    opened: Condvar,
}

impl Latch {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            opened: Condvar::new(),
        })
    }

    fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }

    fn release(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }
}

fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn small_config(units: usize) -> RuntimeConfig {
    RuntimeConfig {
        buffer_size: 256,
        pool_capacity: 64,
        execution_units: units,
    }
}

#[test]
fn test_empty_binding_task_runs_to_finished() {
    let manager = TaskManager::new(small_config(2));
    let descriptor = TaskDescriptor::new("standalone");
    let task_id = descriptor.task_id;
    let ran = Arc::new(AtomicUsize::new(0));

    let body = {
        let ran = ran.clone();
        Box::new(move |_driver: &TaskDriver| -> anyhow::Result<()> {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };
    manager
        .install_task(descriptor, BindingDescriptor::new(), body)
        .unwrap();

    let manager_ref = &manager;
    assert!(wait_until(
        move || {
            manager_ref
                .task(task_id)
                .map(|driver| driver.state().current() == TaskState::Finished)
                .unwrap_or(false)
        },
        Duration::from_secs(5)
    ));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_greedy_placement_stays_balanced() {
    const UNITS: usize = 4;
    const TASKS: usize = 10;

    let manager = TaskManager::new(small_config(UNITS));
    let latch = Latch::new();

    for index in 0..TASKS {
        let latch = latch.clone();
        manager
            .install_task(
                TaskDescriptor::new(format!("blocked-{}", index)),
                BindingDescriptor::new(),
                Box::new(move |_driver: &TaskDriver| -> anyhow::Result<()> {
                    latch.wait();
                    Ok(())
                }),
            )
            .unwrap();

        // Each assignment must prefer a strictly smaller queue: the spread
        // between any two units never exceeds 1.
        let depths: Vec<_> = manager.units().iter().map(|u| u.enqueued_count()).collect();
        let max = *depths.iter().max().unwrap();
        let min = *depths.iter().min().unwrap();
        assert!(max - min <= 1, "unbalanced after {} installs: {:?}", index + 1, depths);
    }

    let total: usize = manager.units().iter().map(|u| u.enqueued_count()).sum();
    assert_eq!(total, TASKS);

    latch.release();
    let manager_ref = &manager;
    assert!(wait_until(
        move || manager_ref.units().iter().all(|u| u.enqueued_count() == 0),
        Duration::from_secs(5)
    ));
}

#[test]
fn test_ties_break_toward_lowest_unit_index() {
    const UNITS: usize = 3;
    let manager = TaskManager::new(small_config(UNITS));
    let latch = Latch::new();

    // With all units empty, the first three installs must land on units
    // 0, 1, 2 in that order.
    for index in 0..UNITS {
        let latch = latch.clone();
        manager
            .install_task(
                TaskDescriptor::new(format!("tie-{}", index)),
                BindingDescriptor::new(),
                Box::new(move |_driver: &TaskDriver| -> anyhow::Result<()> {
                    latch.wait();
                    Ok(())
                }),
            )
            .unwrap();
        let depths: Vec<_> = manager.units().iter().map(|u| u.enqueued_count()).collect();
        for (unit, depth) in depths.iter().enumerate() {
            let expected = usize::from(unit <= index);
            assert_eq!(*depth, expected, "after install {}: {:?}", index, depths);
        }
    }

    latch.release();
}

#[test]
fn test_failing_task_reaches_failure_state() {
    let manager = TaskManager::new(small_config(1));
    let descriptor = TaskDescriptor::new("failing");
    let task_id = descriptor.task_id;

    manager
        .install_task(
            descriptor,
            BindingDescriptor::new(),
            Box::new(|_driver: &TaskDriver| -> anyhow::Result<()> { anyhow::bail!("task body exploded") }),
        )
        .unwrap();

    let manager_ref = &manager;
    assert!(wait_until(
        move || {
            manager_ref
                .task(task_id)
                .map(|driver| driver.state().current() == TaskState::Failure)
                .unwrap_or(false)
        },
        Duration::from_secs(5)
    ));
}

#[test]
fn test_uninstall_interrupts_blocked_absorb() {
    let manager = TaskManager::new(small_config(1));

    let upstream = TaskDescriptor::new("upstream");
    let sink = TaskDescriptor::new("sink");
    let task_id = sink.task_id;
    let observed = Arc::new(Mutex::new(None));

    let body = {
        let observed = observed.clone();
        Box::new(move |driver: &TaskDriver| -> anyhow::Result<()> {
            // No data ever arrives; uninstall must interrupt this wait.
            match driver.consumer().absorb(0) {
                Err(TransportError::Interrupted) => {
                    *observed.lock() = Some(true);
                    anyhow::bail!("interrupted")
                }
                other => {
                    *observed.lock() = Some(false);
                    anyhow::bail!("unexpected absorb result: {:?}", other.is_ok())
                }
            }
        })
    };
    manager
        .install_task(
            sink.clone(),
            BindingDescriptor::new().add_input_gate(vec![upstream.clone()]),
            body,
        )
        .unwrap();

    // Connect the single input channel so the task becomes Ready. The handle
    // is never used because the task only blocks on absorb.
    struct NullHandle;
    impl crate::event::ChannelHandle for NullHandle {
        fn deliver(&self, _event: DataEvent) -> Result<(), TransportError> {
            Ok(())
        }
    }
    manager
        .dispatch_event(DataEvent::ChannelConnected {
            src: upstream.task_id,
            dst: sink.task_id,
            direction: GateDirection::Input,
            handle: Arc::new(NullHandle),
        })
        .unwrap();

    let driver = manager.task(task_id).unwrap();
    assert!(wait_until(
        || driver.state().current() == TaskState::Running,
        Duration::from_secs(5)
    ));

    manager.uninstall_task(task_id).unwrap();
    assert!(wait_until(
        || driver.state().current() == TaskState::Failure,
        Duration::from_secs(5)
    ));
    assert_eq!(*observed.lock(), Some(true));

    // A second uninstall is caller error and reports the task unknown.
    assert!(manager.uninstall_task(task_id).is_err());
}

#[test]
fn test_dispatch_to_unknown_task_is_rejected() {
    let manager = TaskManager::new(small_config(1));
    let err = manager
        .dispatch_event(DataEvent::SourceExhausted {
            src: TaskDescriptor::new("ghost-src").task_id,
            dst: TaskDescriptor::new("ghost-dst").task_id,
        })
        .unwrap_err();
    assert!(matches!(err, crate::Error::UnknownTask(_)));
}
