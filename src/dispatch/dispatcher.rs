//! Consumer-thread dispatcher with explicit registration
//!
//! A [`DispatcherRegistry`] admits at most one live [`Dispatcher`]. Producers
//! hold cheap [`DispatchHandle`]s that resolve the registered dispatcher on
//! every call, so a handle created before the dispatcher exists (or kept after
//! it is gone) reports [`DispatchError::NotReady`] instead of buffering work.
//!
//! ```text
//! producer threads ──► DispatchHandle ──► ActionQueue ──► Dispatcher::tick (consumer)
//! ```

use crate::dispatch::action_queue::{run_guarded, ActionQueue, ActionTask, DrainReport};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tracing::{debug, error, info, trace, warn};

/// Tuning knobs for the dispatcher
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Queue depth above which a warning is logged once per crossing.
    /// The queue is never bounded.
    pub backlog_warn_threshold: usize,

    /// Log every accepted task at debug level
    pub trace_tasks: bool,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            backlog_warn_threshold: 1024,
            trace_tasks: false,
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No dispatcher is registered; the task was dropped
    #[error("Dispatcher not ready, task dropped")]
    NotReady,

    /// Another dispatcher already owns the registry
    #[error("Dispatcher #{id} is already registered")]
    AlreadyRegistered { id: u64 },
}

struct Shared<C> {
    id: u64,
    queue: ActionQueue<C>,
    consumer_thread: ThreadId,
    settings: DispatcherSettings,
}

struct RegistryInner<C> {
    slot: Mutex<Option<Arc<Shared<C>>>>,
    next_id: AtomicU64,
}

impl<C> RegistryInner<C> {
    // Lock order is always slot, then queue.
    fn slot(&self) -> MutexGuard<'_, Option<Arc<Shared<C>>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registration slot admitting at most one live [`Dispatcher`]
pub struct DispatcherRegistry<C = ()> {
    inner: Arc<RegistryInner<C>>,
}

impl<C> Default for DispatcherRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> DispatcherRegistry<C> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                slot: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Handle for producers; valid before, during and after any dispatcher's life
    pub fn handle(&self) -> DispatchHandle<C> {
        DispatchHandle {
            registry: Arc::clone(&self.inner),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.slot().is_some()
    }

    /// Id of the registered dispatcher, if any
    pub fn registered_id(&self) -> Option<u64> {
        self.inner.slot().as_ref().map(|shared| shared.id)
    }
}

/// Owner of the consumer-side queue.
///
/// Created on the consumer thread and ticked there once per frame. Dropping
/// it clears the registration and discards whatever is still queued.
pub struct Dispatcher<C = ()> {
    shared: Arc<Shared<C>>,
    registry: Arc<RegistryInner<C>>,
}

impl<C> Dispatcher<C> {
    /// Registers a new dispatcher owned by the calling (consumer) thread.
    ///
    /// The first live dispatcher wins: if one is already registered this
    /// attempt is rejected and the registered one is left untouched.
    pub fn create(
        registry: &DispatcherRegistry<C>,
        settings: Option<DispatcherSettings>,
    ) -> Result<Self, DispatchError> {
        let settings = settings.unwrap_or_default();
        let mut slot = registry.inner.slot();

        if let Some(existing) = slot.as_ref() {
            warn!(
                "Dispatcher #{} already registered, discarding duplicate",
                existing.id
            );
            return Err(DispatchError::AlreadyRegistered { id: existing.id });
        }

        let id = registry.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared {
            id,
            queue: ActionQueue::new(),
            consumer_thread: thread::current().id(),
            settings,
        });
        *slot = Some(Arc::clone(&shared));

        info!(
            "Dispatcher #{} initialized on consumer thread {:?}",
            id, shared.consumer_thread
        );
        debug!("Dispatcher settings: {:?}", shared.settings);

        Ok(Self {
            shared,
            registry: Arc::clone(&registry.inner),
        })
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn consumer_thread(&self) -> ThreadId {
        self.shared.consumer_thread
    }

    pub fn handle(&self) -> DispatchHandle<C> {
        DispatchHandle {
            registry: Arc::clone(&self.registry),
        }
    }

    /// Per-tick entry point: drains the queue exactly once.
    ///
    /// Call before any other per-tick logic that reads state the tasks update.
    pub fn tick(&self, context: &mut C) -> DrainReport {
        if thread::current().id() != self.shared.consumer_thread {
            warn!(
                "Dispatcher #{} ticked off its consumer thread",
                self.shared.id
            );
        }

        let report = self.shared.queue.drain_and_run(context);
        if report.faulted > 0 {
            warn!(
                "Tick finished with {} of {} tasks faulted",
                report.faulted, report.executed
            );
        } else if report.executed > 0 {
            trace!("Tick executed {} tasks", report.executed);
        }
        report
    }

    /// Current queue depth
    pub fn queue_depth(&self) -> usize {
        self.shared.queue.len()
    }

    /// Drops all pending tasks. Only for deliberate recovery.
    pub fn clear_queue(&self) -> usize {
        let dropped = self.shared.queue.clear();
        warn!(
            "Dispatcher #{} queue cleared, {} pending tasks dropped",
            self.shared.id, dropped
        );
        dropped
    }

    pub fn log_queue_depth(&self) {
        info!(
            "Dispatcher #{} queue count: {}",
            self.shared.id,
            self.queue_depth()
        );
    }
}

impl<C> Drop for Dispatcher<C> {
    fn drop(&mut self) {
        let mut slot = self.registry.slot();
        if slot.as_ref().map(|shared| shared.id) == Some(self.shared.id) {
            *slot = None;
        }
        drop(slot);

        let discarded = self.shared.queue.clear();
        if discarded > 0 {
            warn!(
                "Dispatcher #{} destroyed with {} pending tasks discarded",
                self.shared.id, discarded
            );
        } else {
            info!("Dispatcher #{} destroyed", self.shared.id);
        }
    }
}

/// Where a task routed through [`DispatchHandle::execute_on_consumer`] ended up
pub enum Routed<C> {
    /// Caller is already on the consumer thread and must run the task itself
    Immediate(ActionTask<C>),
    /// Task was appended to the queue
    Queued,
}

impl<C> Routed<C> {
    /// Runs an immediate task against `context`; no-op for queued tasks.
    ///
    /// Faults are caught and logged as in a drain, then returned.
    pub fn run_now(self, context: &mut C) -> Result<()> {
        match self {
            Routed::Immediate(task) => run_guarded(task, context).inspect_err(|e| {
                error!("Error executing task on consumer thread: {:#}", e);
            }),
            Routed::Queued => Ok(()),
        }
    }
}

/// Cloneable producer-side entry point
pub struct DispatchHandle<C = ()> {
    registry: Arc<RegistryInner<C>>,
}

impl<C> Clone for DispatchHandle<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<C> DispatchHandle<C> {
    /// Schedules `task` on the consumer thread. Callable from any thread.
    ///
    /// Without a registered dispatcher the task is dropped, a warning is
    /// logged and [`DispatchError::NotReady`] is returned. Nothing is buffered.
    pub fn enqueue_on_consumer<F>(&self, task: F) -> Result<usize, DispatchError>
    where
        F: FnOnce(&mut C) -> Result<()> + Send + 'static,
    {
        self.submit(Box::new(task))
    }

    /// Like [`enqueue_on_consumer`](Self::enqueue_on_consumer) for an optional
    /// task; an absent task is accepted as a no-op.
    pub fn enqueue_task(&self, task: Option<ActionTask<C>>) -> Result<(), DispatchError> {
        match task {
            Some(task) => self.submit(task).map(|_| ()),
            None => {
                trace!("Ignoring absent task");
                Ok(())
            }
        }
    }

    fn submit(&self, task: ActionTask<C>) -> Result<usize, DispatchError> {
        let slot = self.registry.slot();
        let Some(shared) = slot.as_ref() else {
            warn!("Dispatcher not ready yet, task dropped");
            return Err(DispatchError::NotReady);
        };

        let depth = shared.queue.push(task);
        if shared.settings.trace_tasks {
            debug!(
                "Task queued on dispatcher #{}, depth {}",
                shared.id, depth
            );
        }
        if depth == shared.settings.backlog_warn_threshold.saturating_add(1) {
            warn!(
                "Dispatcher #{} backlog exceeded {} tasks; is the consumer ticking?",
                shared.id, shared.settings.backlog_warn_threshold
            );
        }
        Ok(depth)
    }

    /// Hands `task` back for immediate execution when called on the consumer
    /// thread, otherwise enqueues it.
    pub fn execute_on_consumer<F>(&self, task: F) -> Result<Routed<C>, DispatchError>
    where
        F: FnOnce(&mut C) -> Result<()> + Send + 'static,
    {
        if self.is_consumer_thread() {
            return Ok(Routed::Immediate(Box::new(task)));
        }
        self.enqueue_on_consumer(task).map(|_| Routed::Queued)
    }

    pub fn is_ready(&self) -> bool {
        self.registry.slot().is_some()
    }

    /// True when called on the registered dispatcher's consumer thread
    pub fn is_consumer_thread(&self) -> bool {
        self.registry
            .slot()
            .as_ref()
            .is_some_and(|shared| shared.consumer_thread == thread::current().id())
    }

    /// Queue depth of the registered dispatcher, if any
    pub fn queue_depth(&self) -> Option<usize> {
        self.registry.slot().as_ref().map(|shared| shared.queue.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;
    use std::thread;

    #[test]
    fn enqueue_before_creation_is_dropped() {
        let registry: DispatcherRegistry<u32> = DispatcherRegistry::new();
        let handle = registry.handle();

        let result = handle.enqueue_on_consumer(|count: &mut u32| {
            *count += 1;
            Ok(())
        });
        assert_eq!(result, Err(DispatchError::NotReady));

        let dispatcher = Dispatcher::create(&registry, None).unwrap();
        assert_eq!(dispatcher.queue_depth(), 0);

        let mut count = 0;
        assert_eq!(dispatcher.tick(&mut count).executed, 0);
        assert_eq!(count, 0);
    }

    #[test]
    fn first_dispatcher_wins() {
        let registry: DispatcherRegistry = DispatcherRegistry::new();
        let first = Dispatcher::create(&registry, None).unwrap();

        let second = Dispatcher::create(&registry, None);
        assert!(matches!(
            second,
            Err(DispatchError::AlreadyRegistered { id }) if id == first.id()
        ));
        assert_eq!(registry.registered_id(), Some(first.id()));

        registry.handle().enqueue_on_consumer(|_: &mut ()| Ok(())).unwrap();
        assert_eq!(first.queue_depth(), 1);
    }

    #[test]
    fn destroying_the_registered_dispatcher_allows_a_successor() {
        let registry: DispatcherRegistry<u32> = DispatcherRegistry::new();
        let handle = registry.handle();

        let first = Dispatcher::create(&registry, None).unwrap();
        let first_id = first.id();
        handle
            .enqueue_on_consumer(|count: &mut u32| {
                *count += 1;
                Ok(())
            })
            .unwrap();
        drop(first);

        assert!(!registry.is_ready());
        assert_eq!(
            handle.enqueue_on_consumer(|_: &mut u32| Ok(())),
            Err(DispatchError::NotReady)
        );

        let second = Dispatcher::create(&registry, None).unwrap();
        assert_ne!(second.id(), first_id);
        // Work queued on the destroyed dispatcher is not carried over.
        assert_eq!(second.queue_depth(), 0);
        assert!(handle.is_ready());
    }

    #[test]
    fn tick_runs_tasks_from_other_threads_and_survives_faults() {
        let registry: DispatcherRegistry<Vec<u32>> = DispatcherRegistry::new();
        let dispatcher = Dispatcher::create(&registry, None).unwrap();
        let handle = registry.handle();

        thread::spawn(move || {
            handle
                .enqueue_on_consumer(|seen: &mut Vec<u32>| {
                    seen.push(1);
                    Ok(())
                })
                .unwrap();
            handle
                .enqueue_on_consumer(|_: &mut Vec<u32>| Err(eyre!("device vanished")))
                .unwrap();
            handle
                .enqueue_on_consumer(|seen: &mut Vec<u32>| {
                    seen.push(3);
                    Ok(())
                })
                .unwrap();
        })
        .join()
        .unwrap();

        let mut seen = Vec::new();
        let report = dispatcher.tick(&mut seen);
        assert_eq!(seen, vec![1, 3]);
        assert_eq!(report, DrainReport { executed: 3, faulted: 1 });
        assert_eq!(dispatcher.queue_depth(), 0);
    }

    #[test]
    fn execute_on_consumer_runs_inline_on_the_consumer_thread() {
        let registry: DispatcherRegistry<u32> = DispatcherRegistry::new();
        let dispatcher = Dispatcher::create(&registry, None).unwrap();
        let handle = dispatcher.handle();

        let mut count = 0;
        let routed = handle
            .execute_on_consumer(|count: &mut u32| {
                *count += 1;
                Ok(())
            })
            .unwrap();
        assert!(matches!(routed, Routed::Immediate(_)));
        routed.run_now(&mut count).unwrap();
        assert_eq!(count, 1);
        assert_eq!(dispatcher.queue_depth(), 0);

        let remote = handle.clone();
        let queued = thread::spawn(move || {
            matches!(
                remote.execute_on_consumer(|count: &mut u32| {
                    *count += 10;
                    Ok(())
                }),
                Ok(Routed::Queued)
            )
        })
        .join()
        .unwrap();
        assert!(queued);

        dispatcher.tick(&mut count);
        assert_eq!(count, 11);
    }

    #[test]
    fn inline_tasks_are_guarded_like_queued_ones() {
        let registry: DispatcherRegistry<u32> = DispatcherRegistry::new();
        let dispatcher = Dispatcher::create(&registry, None).unwrap();
        let handle = dispatcher.handle();
        let mut count = 0;

        let routed = handle
            .execute_on_consumer(|_: &mut u32| -> Result<()> { panic!("sensor gone") })
            .unwrap();
        let fault = routed.run_now(&mut count).unwrap_err();
        assert!(fault.to_string().contains("sensor gone"));

        let routed = handle
            .execute_on_consumer(|_: &mut u32| Err(eyre!("bad sample")))
            .unwrap();
        assert!(routed.run_now(&mut count).is_err());

        handle
            .execute_on_consumer(|count: &mut u32| {
                *count += 1;
                Ok(())
            })
            .unwrap()
            .run_now(&mut count)
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn backlog_threshold_only_warns() {
        let registry: DispatcherRegistry = DispatcherRegistry::new();
        let settings = DispatcherSettings {
            backlog_warn_threshold: 2,
            trace_tasks: true,
        };
        let dispatcher = Dispatcher::create(&registry, Some(settings)).unwrap();
        let handle = registry.handle();

        let depths: Vec<usize> = (0..4)
            .map(|_| handle.enqueue_on_consumer(|_: &mut ()| Ok(())).unwrap())
            .collect();
        assert_eq!(depths, vec![1, 2, 3, 4]);
        assert_eq!(dispatcher.queue_depth(), 4);

        let report = dispatcher.tick(&mut ());
        assert_eq!(report, DrainReport { executed: 4, faulted: 0 });

        // Crossing again after a drain is accepted the same way
        for expected in 1..=3 {
            assert_eq!(
                handle.enqueue_on_consumer(|_: &mut ()| Ok(())),
                Ok(expected)
            );
        }
    }

    #[test]
    fn clear_queue_and_absent_tasks() {
        let registry: DispatcherRegistry = DispatcherRegistry::new();
        let dispatcher = Dispatcher::create(&registry, None).unwrap();
        let handle = registry.handle();

        handle.enqueue_task(None).unwrap();
        assert_eq!(dispatcher.queue_depth(), 0);

        for _ in 0..5 {
            handle.enqueue_on_consumer(|_: &mut ()| Ok(())).unwrap();
        }
        assert_eq!(handle.queue_depth(), Some(5));
        assert_eq!(dispatcher.clear_queue(), 5);
        assert_eq!(dispatcher.tick(&mut ()).executed, 0);
    }
}
