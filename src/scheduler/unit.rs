//! One execution unit: a dedicated worker thread and its FIFO run queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::task::{TaskDriver, TaskTransition};

/// A single-threaded, non-preemptive worker. Tasks run to completion, one at
/// a time; a task is pinned to its unit for its entire run and never
/// migrated.
pub struct ExecutionUnit {
    id: usize,
    /// Queued tasks plus the one currently executing.
    depth: Arc<AtomicUsize>,
    run_tx: Mutex<Option<Sender<Arc<TaskDriver>>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ExecutionUnit {
    /// Spawn the unit's worker thread.
    pub(crate) fn start(id: usize) -> Self {
        let (run_tx, run_rx) = unbounded::<Arc<TaskDriver>>();
        let depth = Arc::new(AtomicUsize::new(0));

        let worker = {
            let depth = depth.clone();
            thread::Builder::new()
                .name(format!("tianhe-unit-{}", id))
                .spawn(move || {
                    while let Ok(driver) = run_rx.recv() {
                        Self::run_task(id, &driver);
                        depth.fetch_sub(1, Ordering::SeqCst);
                    }
                    debug!(unit = id, "execution unit drained, worker exiting");
                })
                .expect("failed to spawn execution unit worker")
        };

        Self {
            id,
            depth,
            run_tx: Mutex::new(Some(run_tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Unit index within the scheduler pool.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Queued tasks plus the one currently executing.
    pub fn enqueued_count(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Append one ready task to the run queue.
    pub(crate) fn enqueue(&self, driver: Arc<TaskDriver>) {
        self.depth.fetch_add(1, Ordering::SeqCst);
        let tx = self.run_tx.lock();
        match tx.as_ref() {
            Some(tx) => {
                let _ = tx.send(driver);
            }
            None => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                warn!(unit = self.id, "enqueue after shutdown dropped");
            }
        }
    }

    /// Close the run queue and join the worker.
    pub(crate) fn shutdown(&self) {
        *self.run_tx.lock() = None;
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!(unit = self.id, "execution unit worker panicked");
            }
        }
    }

    /// Drive one task from Ready through its terminal state.
    fn run_task(unit_id: usize, driver: &Arc<TaskDriver>) {
        if let Err(err) = driver.state().transition(TaskTransition::Run) {
            warn!(unit = unit_id, "task {} not runnable: {}", driver.descriptor(), err);
            return;
        }

        let result = match driver.take_invokable() {
            Some(mut invokable) => invokable.run(driver),
            None => Err(anyhow::anyhow!("task has no invokable body")),
        };

        match result {
            Ok(()) => {
                if let Err(err) = driver.state().transition(TaskTransition::Finish) {
                    warn!(
                        unit = unit_id,
                        "task {} finish transition rejected: {}",
                        driver.descriptor(),
                        err
                    );
                }
            }
            Err(err) => {
                error!(
                    unit = unit_id,
                    "task {} failed: {:#}",
                    driver.descriptor(),
                    err
                );
                // Already-failed tasks reject the transition; nothing to do.
                let _ = driver.state().transition(TaskTransition::Fail);
            }
        }
    }
}

impl std::fmt::Debug for ExecutionUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionUnit")
            .field("id", &self.id)
            .field("enqueued", &self.enqueued_count())
            .finish()
    }
}
