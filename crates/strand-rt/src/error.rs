// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Error types for continuations and jobs.

use std::any::Any;

use thiserror::Error;

/// Everything that can go wrong while driving a continuation.
///
/// `InvalidState`, `AlreadyStarted`, `NotSuspended` and `AlreadyCompleted`
/// mean the driver broke the resume contract. `Segment` and `Panicked` are
/// failures raised by the function body and travel to the completion
/// handler as outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContinuationError {
    /// The dispatcher was entered with a label that has no segment.
    #[error("label {label} is not a valid termination state")]
    InvalidState { label: u32 },

    /// `start()` called on a continuation that has already run.
    #[error("continuation was already started")]
    AlreadyStarted,

    /// Resumed while not parked at a suspension point: before the first
    /// call, or a second resume for the same suspension.
    #[error("continuation resumed at label {label} while not suspended")]
    NotSuspended { label: u32 },

    /// Resumed (or notified) after the terminal outcome was delivered.
    #[error("continuation resumed after its completion was notified")]
    AlreadyCompleted,

    /// Error raised inside a segment, or delivered by a suspension point.
    #[error("segment failed: {0}")]
    Segment(String),

    /// A segment panicked; the trampoline caught it.
    #[error("segment panicked: {0}")]
    Panicked(String),
}

impl ContinuationError {
    /// True for errors that signal a driver bug rather than a failed body.
    pub fn is_state_consistency(&self) -> bool {
        matches!(
            self,
            ContinuationError::InvalidState { .. }
                | ContinuationError::AlreadyStarted
                | ContinuationError::NotSuspended { .. }
                | ContinuationError::AlreadyCompleted
        )
    }
}

/// Terminal failure of a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The job body (or a child's body) returned an error.
    #[error("job failed: {0}")]
    Failed(String),

    /// The job was cancelled before it could complete.
    #[error("job was cancelled")]
    Cancelled,

    /// The job body panicked.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// `join_timeout` gave up waiting.
    #[error("timed out waiting for job")]
    TimedOut,
}

/// Turn a `catch_unwind` payload into a readable message.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
