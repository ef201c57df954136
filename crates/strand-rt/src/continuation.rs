// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Continuation record and resume trampoline.
//!
//! A suspendable function is written by hand as a `SuspendFn`: one
//! re-entrant `resume` that matches on the frame's label and runs only the
//! segment for that label. Every variable that must survive a suspension
//! point lives in `Frame::locals`, never on the stack, because the stack is
//! gone by the time the function is resumed (possibly on another thread).
//!
//! The `Continuation` owns the frame and is itself a `Completion`: the
//! suspension point keeps it and calls `resume_with` later, which stores
//! the outcome, re-enters the dispatcher, and forwards the terminal result
//! upstream exactly once.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::completion::{Completion, Outcome};
use crate::error::{panic_message, ContinuationError};
use crate::step::Step;

/// A function compiled by hand into a label-indexed state machine.
pub trait SuspendFn: Send + Sync + Sized + 'static {
    /// Captured locals, one field per variable that crosses a suspension.
    type Locals: Default + Send;
    /// What a suspension point hands back when it resumes the function.
    type Resume: Send + 'static;
    /// Terminal value.
    type Output: Send + 'static;

    /// Run the segment for `frame.label`.
    ///
    /// Returns `Step::Suspended` after handing `cont` to a suspension point,
    /// `Step::Done` from a terminal label, or an error. Must advance the
    /// label before suspending and never move it backwards.
    fn resume(
        &self,
        cont: &Arc<Continuation<Self>>,
        frame: &mut Frame<Self::Locals, Self::Resume>,
    ) -> Result<Step<Self::Output>, ContinuationError>;
}

/// The state that survives a suspension: label, locals and the last
/// resumed outcome.
pub struct Frame<L, R> {
    pub label: u32,
    pub locals: L,
    result: Option<Outcome<R>>,
    suspended: bool,
}

impl<L: Default, R> Frame<L, R> {
    fn new() -> Self {
        Self {
            label: 0,
            locals: L::default(),
            result: None,
            suspended: false,
        }
    }
}

impl<L, R> Frame<L, R> {
    /// Take the outcome the function was resumed with.
    ///
    /// Each outcome is read once; a segment that needs it twice must copy
    /// it into a local.
    pub fn take_result(&mut self) -> Option<Outcome<R>> {
        self.result.take()
    }

    /// Store a value that a suspension point produced synchronously, so the
    /// next segment reads it exactly like a resumed one.
    pub fn set_result(&mut self, outcome: Outcome<R>) {
        self.result = Some(outcome);
    }

    /// Take the resumed outcome of the current label, re-raising a failure.
    ///
    /// A missing outcome means the label was reached without passing
    /// through a suspension point, which no correct driver does.
    pub fn resumed(&mut self) -> Result<R, ContinuationError> {
        let label = self.label;
        self.take_result()
            .ok_or(ContinuationError::InvalidState { label })?
    }
}

/// Resumable state of one invocation of a `SuspendFn`.
pub struct Continuation<F: SuspendFn> {
    func: F,
    frame: Mutex<Frame<F::Locals, F::Resume>>,
    started: AtomicBool,
    completed: AtomicBool,
    completion: Arc<dyn Completion<F::Output>>,
}

impl<F: SuspendFn> fmt::Debug for Continuation<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("label", &self.frame.try_lock().map(|f| f.label).ok())
            .field("started", &self.started.load(Ordering::Acquire))
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl<F: SuspendFn> Continuation<F> {
    /// Create a fresh continuation at label 0 reporting to `completion`.
    pub fn new(func: F, completion: Arc<dyn Completion<F::Output>>) -> Arc<Self> {
        Arc::new(Self {
            func,
            frame: Mutex::new(Frame::new()),
            started: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            completion,
        })
    }

    /// Kick off a chain from the top.
    ///
    /// Returns `Step::Suspended` as soon as the body reaches a suspension
    /// point that is not ready; the calling thread is free from then on.
    /// If the body finishes synchronously, the outcome goes to the
    /// completion before this returns `Step::Done(())`. A failure that the
    /// completion received is not repeated here.
    ///
    /// A segment calling another suspendable function must use `invoke`
    /// instead: its own frame is locked, so a callee that finished
    /// synchronously could not report back into it.
    pub fn start(self: &Arc<Self>) -> Result<Step<()>, ContinuationError> {
        match self.invoke_inner()? {
            Step::Suspended => Ok(Step::Suspended),
            Step::Done(finished) => {
                self.completion.clone().resume_with(finished)?;
                Ok(Step::Done(()))
            }
        }
    }

    /// Direct call: run the function once and hand a synchronous result
    /// straight back to the caller.
    ///
    /// The completion is only notified if the function suspends and later
    /// finishes from a resume. On `Step::Done` (or an error) it is never
    /// notified; the caller consumes the result itself.
    pub fn invoke(self: &Arc<Self>) -> Result<Step<F::Output>, ContinuationError> {
        match self.invoke_inner()? {
            Step::Suspended => Ok(Step::Suspended),
            Step::Done(finished) => finished.map(Step::Done),
        }
    }

    /// Current label.
    pub fn label(&self) -> u32 {
        self.lock_frame().label
    }

    /// Whether the function has produced its terminal outcome.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Whether the function is parked at a suspension point, waiting for
    /// exactly one resume.
    pub fn is_suspended(&self) -> bool {
        self.lock_frame().suspended
    }

    /// Inspect the captured locals.
    pub fn with_locals<R>(&self, f: impl FnOnce(&F::Locals) -> R) -> R {
        f(&self.lock_frame().locals)
    }

    #[cfg(test)]
    pub(crate) fn force_label(&self, label: u32) {
        self.lock_frame().label = label;
    }

    fn invoke_inner(self: &Arc<Self>) -> Result<Step<Outcome<F::Output>>, ContinuationError> {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("continuation started twice");
            return Err(ContinuationError::AlreadyStarted);
        }
        debug!("starting continuation");
        self.run(None)
    }

    /// Store `outcome` (if any) and run the dispatcher. A terminal outcome
    /// is returned to the caller, which decides where it goes.
    fn run(
        self: &Arc<Self>,
        outcome: Option<Outcome<F::Resume>>,
    ) -> Result<Step<Outcome<F::Output>>, ContinuationError> {
        let mut frame = self.lock_frame();
        // Checked under the frame lock: a racing resume that lost
        // sees the flag set by the winner.
        if self.is_completed() {
            warn!(label = frame.label, "resume after completion rejected");
            return Err(ContinuationError::AlreadyCompleted);
        }
        if let Some(outcome) = outcome {
            if !frame.suspended {
                warn!(label = frame.label, "resume while not suspended rejected");
                return Err(ContinuationError::NotSuspended { label: frame.label });
            }
            frame.set_result(outcome);
        }
        frame.suspended = false;

        let finished = match self.dispatch(&mut frame) {
            Ok(Step::Suspended) => {
                frame.suspended = true;
                debug!(label = frame.label, "suspended");
                return Ok(Step::Suspended);
            }
            Ok(Step::Done(value)) => Ok(value),
            Err(e) => Err(e),
        };
        self.completed.store(true, Ordering::Release);
        match &finished {
            Ok(_) => debug!(label = frame.label, "completed"),
            Err(e) => debug!(label = frame.label, error = %e, "failed"),
        }
        Ok(Step::Done(finished))
    }

    /// One pass through the dispatcher, with panics turned into failures and
    /// the label checked for regression.
    fn dispatch(
        self: &Arc<Self>,
        frame: &mut Frame<F::Locals, F::Resume>,
    ) -> Result<Step<F::Output>, ContinuationError> {
        let entry = frame.label;
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.func.resume(self, frame)))
            .unwrap_or_else(|payload| {
                let msg = panic_message(payload);
                warn!(label = entry, "segment panicked: {}", msg);
                Err(ContinuationError::Panicked(msg))
            });

        if frame.label < entry {
            return Err(ContinuationError::InvalidState { label: frame.label });
        }
        result
    }

    fn lock_frame(&self) -> MutexGuard<'_, Frame<F::Locals, F::Resume>> {
        // Segments run under catch_unwind, so poison only follows a panic
        // in this module; the frame is still consistent.
        self.frame.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<F: SuspendFn> Completion<F::Resume> for Continuation<F> {
    /// Resume trampoline. Safe to call from any thread; resumes of the same
    /// continuation are serialized by the frame lock, and only a
    /// continuation parked at a suspension point accepts one.
    fn resume_with(self: Arc<Self>, outcome: Outcome<F::Resume>) -> Result<(), ContinuationError> {
        debug!(ok = outcome.is_ok(), "resume");
        match self.run(Some(outcome))? {
            Step::Suspended => Ok(()),
            Step::Done(finished) => self.completion.clone().resume_with(finished),
        }
    }
}
