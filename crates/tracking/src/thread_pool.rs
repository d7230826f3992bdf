// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Fixed-size worker pool with an unbounded FIFO queue.
//!
//! Workers pop tasks in submission order and block on a condition variable
//! while the queue is empty. Tasks are never cancelled by the pool; a task
//! that wants to stop early has to check its own cancellation state.

use crate::error::{Result, TrackerError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    stopped: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl Shared {
    fn schedule(&self, task: Task) -> bool {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return false;
            }
            state.tasks.push_back(task);
        }
        self.available.notify_one();
        true
    }

    fn next_task(&self) -> Option<Task> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }
            if state.stopped {
                return None;
            }
            self.available.wait(&mut state);
        }
    }
}

/// A cloneable way to submit work to a [`ThreadPool`] without owning it.
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<Shared>,
}

impl PoolHandle {
    /// Queues `task`. Returns `false` once the pool has been shut down.
    pub fn schedule<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.schedule(Box::new(task))
    }
}

pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    name_prefix: String,
}

impl ThreadPool {
    /// Starts `num_threads` workers named `{name_prefix}-{i}`.
    ///
    /// # Errors
    ///
    /// `TrackerError::Configuration` for zero threads, `TrackerError::WorkerSpawn`
    /// if the OS refuses a thread. Workers started before the failure are joined.
    pub fn new(name_prefix: &str, num_threads: usize) -> Result<Self> {
        if num_threads == 0 {
            return Err(TrackerError::Configuration(
                "thread pool needs at least one worker".to_string(),
            ));
        }

        let mut pool = Self {
            shared: Arc::new(Shared::default()),
            workers: Vec::with_capacity(num_threads),
            name_prefix: name_prefix.to_string(),
        };
        for index in 0..num_threads {
            let shared = Arc::clone(&pool.shared);
            let name = format!("{name_prefix}-{index}");
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_worker(&shared))
                .map_err(|e| TrackerError::WorkerSpawn(format!("{name}: {e}")))?;
            pool.workers.push(handle);
        }

        tracing::debug!(pool = %name_prefix, workers = num_threads, "Thread pool started");
        Ok(pool)
    }

    /// Queues `task`. Never blocks; returns `false` only after shutdown.
    pub fn schedule<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.schedule(Box::new(task))
    }

    pub fn handle(&self) -> PoolHandle {
        PoolHandle { shared: Arc::clone(&self.shared) }
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    pub fn queued_tasks(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }
}

fn run_worker(shared: &Shared) {
    while let Some(task) = shared.next_task() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(
                worker = thread::current().name().unwrap_or("unnamed"),
                %message,
                "Thread pool task panicked"
            );
        }
    }
}

impl Drop for ThreadPool {
    /// Stops accepting work, lets the workers drain the queue, then joins them.
    fn drop(&mut self) {
        self.shared.state.lock().stopped = true;
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!(pool = %self.name_prefix, "Worker thread exited abnormally");
            }
        }
        tracing::debug!(pool = %self.name_prefix, "Thread pool stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn rejects_zero_workers() {
        assert!(matches!(ThreadPool::new("test", 0), Err(TrackerError::Configuration(_))));
    }

    #[test]
    fn runs_in_fifo_order_on_one_worker() {
        let pool = ThreadPool::new("fifo", 1).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..20 {
            let tx = tx.clone();
            assert!(pool.schedule(move || tx.send(i).unwrap()));
        }
        drop(pool);
        let order: Vec<i32> = rx.try_iter().collect();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn drop_drains_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new("drain", 3).unwrap();
            for _ in 0..100 {
                let counter = Arc::clone(&counter);
                pool.schedule(move || {
                    thread::sleep(Duration::from_micros(50));
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn panicking_task_keeps_worker_alive() {
        let pool = ThreadPool::new("panic", 1).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.schedule(|| panic!("boom"));
        pool.schedule(move || tx.send(7).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn handle_refuses_after_shutdown() {
        let pool = ThreadPool::new("handle", 2).unwrap();
        let handle = pool.handle();
        let (tx, rx) = mpsc::channel();
        assert!(handle.schedule(move || tx.send(()).unwrap()));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(pool.num_threads(), 2);
        drop(pool);
        assert!(!handle.schedule(|| {}));
    }
}
