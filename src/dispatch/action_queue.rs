//! Thread-safe FIFO of deferred tasks executed on the consumer thread.
//!
//! Producers append from any thread; the consumer drains. The lock is held
//! only to push or to pop a single task, never while a task body runs.

use color_eyre::{eyre::eyre, Result};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{error, trace};

/// Deferred unit of work.
///
/// The task receives the consumer-owned context `C` when it is drained. With
/// `C = ()` this is a plain zero-argument callback.
pub type ActionTask<C = ()> = Box<dyn FnOnce(&mut C) -> Result<()> + Send + 'static>;

/// Outcome of one drain pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks removed from the queue and run (faulted ones included)
    pub executed: usize,
    /// Tasks that returned an error or panicked
    pub faulted: usize,
}

/// FIFO queue of [`ActionTask`]s guarded by a single mutex
pub struct ActionQueue<C = ()> {
    tasks: Mutex<VecDeque<ActionTask<C>>>,
}

impl<C> Default for ActionQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ActionQueue<C> {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    // Task bodies never run under the lock, so a poisoned lock still guards a
    // consistent VecDeque.
    fn lock(&self) -> MutexGuard<'_, VecDeque<ActionTask<C>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a closure to the tail and returns the depth after the append
    pub fn enqueue<F>(&self, task: F) -> usize
    where
        F: FnOnce(&mut C) -> Result<()> + Send + 'static,
    {
        self.push(Box::new(task))
    }

    /// Appends an already boxed task and returns the depth after the append
    pub fn push(&self, task: ActionTask<C>) -> usize {
        let mut tasks = self.lock();
        tasks.push_back(task);
        tasks.len()
    }

    /// Appends `task` if present. An absent task is a no-op and yields `None`.
    pub fn enqueue_maybe(&self, task: Option<ActionTask<C>>) -> Option<usize> {
        match task {
            Some(task) => Some(self.push(task)),
            None => {
                trace!("Ignoring absent task");
                None
            }
        }
    }

    /// Runs queued tasks in FIFO order until the queue is observed empty.
    ///
    /// Must only be called from the consumer thread. Tasks appended by other
    /// threads while the drain is in progress run in this pass if they land
    /// before the next pop. A faulting task is logged and skipped.
    pub fn drain_and_run(&self, context: &mut C) -> DrainReport {
        let mut report = DrainReport::default();

        loop {
            let next = {
                let mut tasks = self.lock();
                tasks.pop_front().map(|task| (task, tasks.len()))
            };
            let Some((task, remaining)) = next else {
                break;
            };

            trace!(
                "Executing task on consumer thread. Remaining queue size: {}",
                remaining
            );
            report.executed += 1;

            if let Err(e) = run_guarded(task, context) {
                report.faulted += 1;
                error!("Error executing task on consumer thread: {:#}", e);
            }
        }

        report
    }

    /// Lock-guarded snapshot of the current depth
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every pending task without running it, returning how many
    pub fn clear(&self) -> usize {
        let mut tasks = self.lock();
        let dropped = tasks.len();
        tasks.clear();
        dropped
    }
}

/// Runs `task`, turning a panic in its body into an error
pub(crate) fn run_guarded<C>(task: ActionTask<C>, context: &mut C) -> Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| task(context))) {
        Ok(result) => result,
        Err(payload) => Err(eyre!("task panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
