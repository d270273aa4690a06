//! Deferred task queue
//!
//! The readiness engine and the handle registry both need "run this on the
//! next scheduler iteration, not now" semantics: a release sweep must not run
//! synchronously inside the unref that triggered it, and an introspection
//! iteration must not re-enter the engine while a completion callback still
//! holds borrowed state.
//!
//! [`TaskQueue`] makes that deferral explicit. Production wiring spawns a
//! driver task that drains the queue whenever something is pushed; tests skip
//! the driver and call [`TaskQueue::run_pending`] directly, which makes the
//! whole engine deterministic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::trace;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    tasks: Mutex<VecDeque<Task>>,
    notify: Notify,
}

/// A FIFO queue of deferred closures
///
/// Cloning is cheap; clones share the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueues a task for the next drain
    ///
    /// Tasks may themselves push further tasks; those run in the same drain.
    pub fn push(&self, task: impl FnOnce() + Send + 'static) {
        self.inner
            .tasks
            .lock()
            .expect("task queue lock poisoned")
            .push_back(Box::new(task));
        self.inner.notify.notify_one();
    }

    /// Runs every queued task (including tasks queued while draining) and
    /// returns how many ran
    ///
    /// The queue lock is never held while a task runs.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self
                .inner
                .tasks
                .lock()
                .expect("task queue lock poisoned")
                .pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        if ran > 0 {
            trace!(ran, "Drained task queue");
        }
        ran
    }

    /// Returns true if no tasks are queued
    pub fn is_empty(&self) -> bool {
        self.inner
            .tasks
            .lock()
            .expect("task queue lock poisoned")
            .is_empty()
    }

    /// Spawns a tokio task that drains the queue whenever tasks are pushed
    ///
    /// The driver exits when every other handle to the queue has been
    /// dropped. Owners typically keep the `JoinHandle` and abort it on
    /// teardown rather than waiting for that.
    pub fn spawn_driver(&self) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                // Register interest before draining so a push between the
                // drain and the await is not lost.
                let notified = inner.notify.notified();
                let queue = TaskQueue {
                    inner: inner.clone(),
                };
                if queue.run_pending() == 0 {
                    notified.await;
                }
            }
        })
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_run_pending_drains_in_order() {
        let queue = TaskQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            queue.push(move || log.lock().unwrap().push(i));
        }

        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_tasks_may_push_tasks() {
        let queue = TaskQueue::new();
        let count = Arc::new(AtomicUsize::new(0));

        let inner_queue = queue.clone();
        let inner_count = count.clone();
        queue.push(move || {
            inner_count.fetch_add(1, Ordering::SeqCst);
            let c = inner_count.clone();
            inner_queue.push(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(queue.run_pending(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_driver_drains_pushed_tasks() {
        let queue = TaskQueue::new();
        let driver = queue.spawn_driver();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        queue.push(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        // Let the driver run
        for _ in 0..100 {
            if count.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        driver.abort();
    }
}
