// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Upstream completion handlers.
//!
//! A completion is the single-method capability a continuation reports
//! its terminal outcome to. It may be another continuation (which then
//! resumes) or a root handler owned by whoever started the chain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::error::ContinuationError;

/// Terminal (or resume) outcome: success value or failure.
pub type Outcome<T> = Result<T, ContinuationError>;

/// Something that can be resumed with an outcome.
///
/// Implementations must accept calls from any thread.
pub trait Completion<T>: Send + Sync {
    /// Deliver `outcome`. Returns `Err(AlreadyCompleted)` if this handler
    /// has already received its one outcome.
    fn resume_with(self: Arc<Self>, outcome: Outcome<T>) -> Result<(), ContinuationError>;
}

/// Root handler that stores the outcome for the caller to pick up.
///
/// Counts every notification, so tests can assert "exactly once".
pub struct CompletionSlot<T> {
    value: Mutex<SlotState<T>>,
    ready: Condvar,
    notifications: AtomicUsize,
}

struct SlotState<T> {
    outcome: Option<Outcome<T>>,
    delivered: bool,
}

impl<T> CompletionSlot<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(SlotState {
                outcome: None,
                delivered: false,
            }),
            ready: Condvar::new(),
            notifications: AtomicUsize::new(0),
        })
    }

    /// How many times `resume_with` has been called, rejected calls included.
    pub fn notifications(&self) -> usize {
        self.notifications.load(Ordering::Acquire)
    }

    /// Whether the outcome has arrived.
    pub fn is_delivered(&self) -> bool {
        self.lock().delivered
    }

    /// Take the outcome without blocking.
    pub fn take(&self) -> Option<Outcome<T>> {
        self.lock().outcome.take()
    }

    /// Block until the outcome arrives and take it.
    pub fn wait(&self) -> Outcome<T> {
        let mut state = self.lock();
        loop {
            if let Some(outcome) = state.outcome.take() {
                return outcome;
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like `wait`, giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        let state = self.lock();
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| s.outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.outcome.take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState<T>> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Send> Completion<T> for CompletionSlot<T> {
    fn resume_with(self: Arc<Self>, outcome: Outcome<T>) -> Result<(), ContinuationError> {
        self.notifications.fetch_add(1, Ordering::AcqRel);
        let mut state = self.lock();
        if state.delivered {
            tracing::warn!("completion slot notified twice");
            return Err(ContinuationError::AlreadyCompleted);
        }
        state.delivered = true;
        state.outcome = Some(outcome);
        self.ready.notify_all();
        Ok(())
    }
}

type Callback<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

/// Root handler backed by a one-shot closure.
pub struct OnceCompletion<T> {
    callback: Mutex<Option<Callback<T>>>,
}

impl<T> OnceCompletion<T> {
    pub fn new<F>(f: F) -> Arc<Self>
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        Arc::new(Self {
            callback: Mutex::new(Some(Box::new(f))),
        })
    }
}

impl<T: Send> Completion<T> for OnceCompletion<T> {
    fn resume_with(self: Arc<Self>, outcome: Outcome<T>) -> Result<(), ContinuationError> {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match callback {
            Some(f) => {
                f(outcome);
                Ok(())
            }
            None => Err(ContinuationError::AlreadyCompleted),
        }
    }
}
