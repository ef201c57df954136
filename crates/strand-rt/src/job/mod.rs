// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Structured concurrency job tree.
//!
//! A job completes only when its own body has finished and every child
//! has reached a terminal state. Until then a finished body leaves it in
//! `Completing`. A failing child does not fail the parent outright: the
//! parent moves to `Cancelling`, cancels the remaining children, and only
//! becomes `Cancelled` once they (and its own body) have wound down.
//!
//! Lock order is always parent before child; a job never holds its own
//! lock while calling into its parent.

mod state;

pub use state::JobState;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::dispatch::Dispatcher;
use crate::error::{panic_message, JobError};

/// Process-unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// How a job begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Start {
    /// `Active` right away; a launched body is dispatched immediately.
    #[default]
    Default,
    /// `New` until `start()` is called.
    Lazy,
}

type Body = Box<dyn FnOnce(&Arc<Job>) -> Result<(), JobError> + Send>;

struct Launch {
    body: Body,
    dispatcher: Arc<dyn Dispatcher>,
}

struct Inner {
    state: JobState,
    body_done: bool,
    children: Vec<Arc<Job>>,
    failure: Option<JobError>,
}

/// A node in the job tree.
pub struct Job {
    id: JobId,
    name: String,
    parent: Option<Weak<Job>>,
    inner: Mutex<Inner>,
    changed: Condvar,
    launch: Mutex<Option<Launch>>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.inner.try_lock().map(|i| i.state).ok())
            .finish()
    }
}

impl Job {
    /// Create a job whose body is driven by the caller through
    /// `complete_body` / `fail`.
    pub fn new(name: impl Into<String>, parent: Option<&Arc<Job>>, start: Start) -> Arc<Job> {
        let state = match start {
            Start::Default => JobState::Active,
            Start::Lazy => JobState::New,
        };
        let job = Arc::new(Job {
            id: JobId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            parent: parent.map(Arc::downgrade),
            inner: Mutex::new(Inner {
                state,
                body_done: false,
                children: Vec::new(),
                failure: None,
            }),
            changed: Condvar::new(),
            launch: Mutex::new(None),
        });
        debug!(job = %job.id, name = %job.name, %state, "job created");

        if let Some(parent) = parent {
            parent.attach(&job);
        }
        job
    }

    /// Create a job and run `body` on `dispatcher`.
    ///
    /// The body's result drives the job: `Ok` finishes the body,
    /// `Err(Cancelled)` cancels the job, any other error (or a panic) fails
    /// it. A lazy job's body is dispatched by `start()`.
    pub fn launch<B>(
        name: impl Into<String>,
        parent: Option<&Arc<Job>>,
        dispatcher: Arc<dyn Dispatcher>,
        start: Start,
        body: B,
    ) -> Arc<Job>
    where
        B: FnOnce(&Arc<Job>) -> Result<(), JobError> + Send + 'static,
    {
        let job = Job::new(name, parent, start);
        *job.lock_launch() = Some(Launch {
            body: Box::new(body),
            dispatcher,
        });
        if job.state() != JobState::New {
            job.run_body();
        }
        job
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    /// `Active` or `Completing`.
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Reached a terminal state, normally or by cancellation.
    pub fn is_completed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Cancellation requested (possibly still winding down).
    pub fn is_cancelled(&self) -> bool {
        self.state().is_cancelled()
    }

    /// First failure recorded on this job, if any.
    pub fn failure(&self) -> Option<JobError> {
        self.lock().failure.clone()
    }

    pub fn parent(&self) -> Option<Arc<Job>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Every child ever attached, in attach order.
    pub fn children(&self) -> Vec<Arc<Job>> {
        self.lock().children.clone()
    }

    /// Children that have not reached a terminal state.
    pub fn active_children(&self) -> Vec<Arc<Job>> {
        self.children()
            .into_iter()
            .filter(|c| !c.is_completed())
            .collect()
    }

    /// Leave `New`. Returns false if the job was already started (or
    /// cancelled before it could start).
    pub fn start(self: &Arc<Self>) -> bool {
        {
            let mut inner = self.lock();
            if inner.state != JobState::New {
                return false;
            }
            inner.state = JobState::Active;
        }
        debug!(job = %self.id, "job started");
        self.changed.notify_all();
        self.run_body();
        true
    }

    /// The job's own body has finished.
    pub fn complete_body(self: &Arc<Self>) {
        {
            let mut inner = self.lock();
            if inner.body_done {
                return;
            }
            match inner.state {
                JobState::New => {
                    warn!(job = %self.id, "body finished before the job was started");
                    return;
                }
                JobState::Active => inner.state = JobState::Completing,
                _ => {}
            }
            inner.body_done = true;
        }
        debug!(job = %self.id, "body finished");
        self.changed.notify_all();
        self.evaluate();
    }

    /// Request cancellation of this job and, transitively, its children.
    pub fn cancel(self: &Arc<Self>) {
        let (children, never_started) = {
            let mut inner = self.lock();
            let never_started = inner.state == JobState::New;
            match inner.state {
                JobState::New => {
                    inner.body_done = true;
                    inner.state = JobState::Cancelling;
                }
                JobState::Active | JobState::Completing => inner.state = JobState::Cancelling,
                JobState::Cancelling | JobState::Cancelled | JobState::Completed => return,
            }
            (inner.children.clone(), never_started)
        };
        if never_started {
            // The body never ran and never will.
            self.lock_launch().take();
        }
        debug!(job = %self.id, children = children.len(), "job cancelling");
        self.changed.notify_all();

        for child in children {
            child.cancel();
        }
        self.evaluate();
    }

    /// Fail the job: record `error`, cancel it, and propagate the failure
    /// to the parent, which cancels in turn.
    pub fn fail(self: &Arc<Self>, error: JobError) {
        {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return;
            }
            if inner.failure.is_none() {
                inner.failure = Some(error.clone());
            }
        }
        warn!(job = %self.id, name = %self.name, "job failed: {}", error);
        self.cancel();
        if let Some(parent) = self.parent() {
            parent.fail(error);
        }
    }

    /// Block until the job is terminal.
    pub fn join(&self) -> Result<(), JobError> {
        let inner = self.lock();
        let inner = self
            .changed
            .wait_while(inner, |i| !i.state.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        join_result(&inner)
    }

    /// Like `join`, giving up with `JobError::TimedOut`.
    pub fn join_timeout(&self, timeout: Duration) -> Result<(), JobError> {
        let inner = self.lock();
        let (inner, _) = self
            .changed
            .wait_timeout_while(inner, timeout, |i| !i.state.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        if !inner.state.is_terminal() {
            return Err(JobError::TimedOut);
        }
        join_result(&inner)
    }

    /// Cooperative sleep for use inside a body. Returns early with
    /// `JobError::Cancelled` as soon as cancellation is requested.
    pub fn sleep(&self, duration: Duration) -> Result<(), JobError> {
        let deadline = Instant::now() + duration;
        let mut inner = self.lock();
        loop {
            if inner.state.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            inner = self
                .changed
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn attach(self: &Arc<Self>, child: &Arc<Job>) {
        let state = {
            let mut inner = self.lock();
            if !inner.state.is_terminal() {
                inner.children.push(child.clone());
            }
            inner.state
        };
        debug!(parent = %self.id, child = %child.id, "child attached");
        if state.is_cancelled() {
            child.cancel();
        }
    }

    /// Dispatch the launched body, if there is one.
    fn run_body(self: &Arc<Self>) {
        let Some(Launch { body, dispatcher }) = self.lock_launch().take() else {
            return;
        };
        let job = self.clone();
        dispatcher.dispatch(Box::new(move || {
            if job.is_cancelled() {
                job.complete_body();
                return;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(|| body(&job)))
                .unwrap_or_else(|payload| Err(JobError::Panicked(panic_message(payload))));
            match result {
                Ok(()) => {}
                Err(JobError::Cancelled) => job.cancel(),
                Err(e) => job.fail(e),
            }
            job.complete_body();
        }));
    }

    /// Move to a terminal state if the body and every child are done, then
    /// let the parent re-check.
    fn evaluate(self: &Arc<Self>) {
        let finished = {
            let mut inner = self.lock();
            let children_done = inner.children.iter().all(|c| c.is_completed());
            let next = match inner.state {
                JobState::Completing if children_done => JobState::Completed,
                JobState::Cancelling if children_done && inner.body_done => JobState::Cancelled,
                _ => return,
            };
            inner.state = next;
            next
        };
        debug!(job = %self.id, name = %self.name, state = %finished, "job finished");
        self.changed.notify_all();

        if let Some(parent) = self.parent() {
            parent.evaluate();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_launch(&self) -> MutexGuard<'_, Option<Launch>> {
        self.launch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn join_result(inner: &Inner) -> Result<(), JobError> {
    match inner.state {
        JobState::Completed => Ok(()),
        _ => Err(inner.failure.clone().unwrap_or(JobError::Cancelled)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Inline, WorkerPool};
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;

    fn inline() -> Arc<dyn Dispatcher> {
        Arc::new(Inline)
    }

    fn wait_for_state(job: &Job, want: JobState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while job.state() != want {
            assert!(
                Instant::now() < deadline,
                "job {} stuck in {}, wanted {}",
                job.name(),
                job.state(),
                want
            );
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn lazy_job_stays_new_until_started() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let job = Job::launch("lazy", None, inline(), Start::Lazy, move |_| {
            r.store(true, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(job.state(), JobState::New);
        assert!(!job.is_active());
        assert!(!ran.load(Ordering::SeqCst));

        assert!(job.start());
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(job.state(), JobState::Completed);
        assert!(!job.start());
    }

    #[test]
    fn parent_waits_for_children() {
        let parent = Job::new("parent", None, Start::Default);
        let first = Job::new("child-1", Some(&parent), Start::Default);
        let second = Job::new("child-2", Some(&parent), Start::Default);
        assert_eq!(parent.children().len(), 2);

        parent.complete_body();
        assert_eq!(parent.state(), JobState::Completing);
        assert!(!parent.is_completed());
        assert!(parent.is_active());

        first.complete_body();
        assert_eq!(first.state(), JobState::Completed);
        assert_eq!(parent.state(), JobState::Completing);
        assert_eq!(parent.active_children().len(), 1);

        second.complete_body();
        assert_eq!(parent.state(), JobState::Completed);
        assert!(parent.active_children().is_empty());
        assert_eq!(parent.join(), Ok(()));
    }

    #[test]
    fn childless_job_completes_with_its_body() {
        let job = Job::new("solo", None, Start::Default);
        job.complete_body();
        assert_eq!(job.state(), JobState::Completed);
    }

    #[test]
    fn child_failure_cancels_parent_and_sibling() {
        let parent = Job::new("parent", None, Start::Default);
        let failing = Job::new("child-1", Some(&parent), Start::Default);
        let sibling = Job::new("child-2", Some(&parent), Start::Default);

        failing.fail(JobError::Failed("disk full".into()));
        assert_eq!(failing.state(), JobState::Cancelling);
        assert_eq!(parent.state(), JobState::Cancelling);
        assert_eq!(sibling.state(), JobState::Cancelling);

        failing.complete_body();
        sibling.complete_body();
        assert_eq!(failing.state(), JobState::Cancelled);
        assert_eq!(sibling.state(), JobState::Cancelled);
        // Parent's own body still running.
        assert_eq!(parent.state(), JobState::Cancelling);

        parent.complete_body();
        assert_eq!(parent.state(), JobState::Cancelled);
        assert_eq!(parent.join(), Err(JobError::Failed("disk full".into())));
        assert_eq!(sibling.join(), Err(JobError::Cancelled));
    }

    #[test]
    fn cancelled_child_does_not_fail_parent() {
        let parent = Job::new("parent", None, Start::Default);
        let child = Job::new("child", Some(&parent), Start::Default);

        child.cancel();
        child.complete_body();
        assert_eq!(child.state(), JobState::Cancelled);
        assert_eq!(parent.state(), JobState::Active);

        parent.complete_body();
        assert_eq!(parent.state(), JobState::Completed);
    }

    #[test]
    fn cancel_new_job_is_immediate() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let job = Job::launch("never", None, inline(), Start::Lazy, move |_| {
            r.store(true, Ordering::SeqCst);
            Ok(())
        });
        job.cancel();
        assert_eq!(job.state(), JobState::Cancelled);
        assert!(!job.start());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn child_of_cancelled_parent_is_cancelled() {
        let parent = Job::new("parent", None, Start::Default);
        parent.cancel();
        let child = Job::new("late", Some(&parent), Start::Default);
        assert_eq!(child.state(), JobState::Cancelling);
        child.complete_body();
        assert_eq!(child.state(), JobState::Cancelled);
        parent.complete_body();
        assert_eq!(parent.state(), JobState::Cancelled);
    }

    #[test]
    fn launched_error_propagates_to_parent() {
        let parent = Job::launch("parent", None, inline(), Start::Default, |job| {
            Job::launch("child", Some(job), Arc::new(Inline), Start::Default, |_| {
                Err(JobError::Failed("bad input".into()))
            });
            Ok(())
        });
        assert_eq!(parent.state(), JobState::Cancelled);
        assert_eq!(parent.failure(), Some(JobError::Failed("bad input".into())));
    }

    #[test]
    fn panicking_body_fails_job() {
        let job = Job::launch("boom", None, inline(), Start::Default, |_| panic!("kaboom"));
        assert_eq!(job.join(), Err(JobError::Panicked("kaboom".into())));
    }

    #[test]
    fn completing_is_observable_while_children_run() {
        let pool = WorkerPool::new(3);
        let (tx1, rx1) = mpsc::channel::<()>();
        let (tx2, rx2) = mpsc::channel::<()>();

        let p = pool.clone();
        let parent = Job::launch("parent", None, pool.clone(), Start::Default, move |job| {
            for (name, gate) in [("child-1", rx1), ("child-2", rx2)] {
                Job::launch(name, Some(job), p.clone(), Start::Default, move |_| {
                    gate.recv().map_err(|_| JobError::Failed("gate dropped".into()))
                });
            }
            Ok(())
        });

        wait_for_state(&parent, JobState::Completing);
        assert!(!parent.is_completed());
        let children = parent.children();
        assert_eq!(children.len(), 2);

        tx1.send(()).unwrap();
        assert_eq!(children[0].join(), Ok(()));
        assert_eq!(parent.state(), JobState::Completing);

        tx2.send(()).unwrap();
        assert_eq!(parent.join_timeout(Duration::from_secs(5)), Ok(()));
        assert_eq!(parent.state(), JobState::Completed);
        pool.shutdown();
    }

    #[test]
    fn sleep_wakes_on_cancel() {
        let pool = WorkerPool::new(1);
        let job = Job::launch("sleeper", None, pool.clone(), Start::Default, |job| {
            job.sleep(Duration::from_secs(30))
        });
        wait_for_state(&job, JobState::Active);
        job.cancel();
        assert_eq!(job.join_timeout(Duration::from_secs(5)), Err(JobError::Cancelled));
        pool.shutdown();
    }

    #[test]
    fn join_timeout_expires() {
        let job = Job::new("stuck", None, Start::Default);
        assert_eq!(
            job.join_timeout(Duration::from_millis(5)),
            Err(JobError::TimedOut)
        );
    }
}
