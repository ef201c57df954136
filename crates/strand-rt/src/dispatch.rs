// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Where resumed work runs.
//!
//! The continuation core never decides which thread resumes it. A
//! suspension point hands the resume to a `Dispatcher`, which either runs
//! it on the calling thread or posts it to a worker pool.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::panic_message;

/// A unit of work handed to a dispatcher.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Executes ready work.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, work: Work);
}

/// Runs work immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Dispatcher for Inline {
    fn dispatch(&self, work: Work) {
        work();
    }
}

/// Fixed set of worker threads fed from one FIFO injection queue.
///
/// Work items that panic are logged and dropped; the worker keeps going.
/// `shutdown` drains whatever is queued before joining.
pub struct WorkerPool {
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    shared: Arc<PoolShared>,
}

struct PoolShared {
    queue: Mutex<VecDeque<Work>>,
    work_available: Condvar,
    shutdown: AtomicBool,
    worker_count: usize,
}

impl WorkerPool {
    /// Start `n` workers. `0` means one per available core.
    pub fn new(n: usize) -> Arc<Self> {
        let worker_count = if n == 0 {
            thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            n
        };

        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            work_available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            worker_count,
        });

        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("strand-worker-{}", id))
                .spawn(move || worker_loop(id, &shared));
            match spawned {
                Ok(h) => handles.push(h),
                Err(e) => warn!(worker = id, "failed to spawn worker thread: {}", e),
            }
        }
        debug!(workers = handles.len(), "worker pool started");

        Arc::new(Self {
            workers: Mutex::new(handles),
            shared,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    /// Stop accepting work, run what is queued, join the workers.
    ///
    /// Idempotent. Called from a worker thread it skips joining that worker.
    pub fn shutdown(&self) {
        {
            // Flag flips under the queue lock, so a dispatch either lands
            // in the queue before the workers drain it or sees the flag.
            let _queue = self.shared.lock_queue();
            self.shared.shutdown.store(true, Ordering::Release);
            self.shared.work_available.notify_all();
        }

        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let me = thread::current().id();
        for h in handles {
            if h.thread().id() == me {
                continue;
            }
            if h.join().is_err() {
                warn!("worker thread exited by panic");
            }
        }
    }
}

impl Dispatcher for WorkerPool {
    fn dispatch(&self, work: Work) {
        {
            let mut queue = self.shared.lock_queue();
            if !self.shared.shutdown.load(Ordering::Acquire) {
                queue.push_back(work);
                self.shared.work_available.notify_one();
                return;
            }
        }
        // A resume must not be lost just because the pool is closing.
        warn!("dispatch after shutdown, running on caller");
        run_work(work);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl PoolShared {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Work>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn worker_loop(id: usize, shared: &PoolShared) {
    loop {
        let next = {
            let mut queue = shared.lock_queue();
            loop {
                if let Some(work) = queue.pop_front() {
                    break Some(work);
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                // Timed wait so a missed notify can't park a worker forever.
                queue = shared
                    .work_available
                    .wait_timeout(queue, Duration::from_millis(5))
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        };

        match next {
            Some(work) => {
                trace!(worker = id, "running work item");
                run_work(work);
            }
            None => break,
        }
    }
    trace!(worker = id, "worker exiting");
}

fn run_work(work: Work) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
        warn!("work item panicked: {}", panic_message(payload));
    }
}
