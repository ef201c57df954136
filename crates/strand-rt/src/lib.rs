// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Strand runtime library.
//!
//! A hand-compiled coroutine core: a suspendable function is written as a
//! label-indexed state machine, its surviving locals live on a
//! continuation, and a resume trampoline re-enters it until a terminal
//! label produces the result. Next to it sits a small structured
//! concurrency tree that gates a parent's completion on its children.
//!
//! Components:
//! - continuation: record, `SuspendFn` dispatcher contract, trampoline
//! - completion: upstream handlers notified exactly once
//! - suspend: suspension points (synchronous, timer queue, failing)
//! - dispatch: where resumed work runs (inline or worker pool)
//! - job: parent/child job tree (New/Active/Completing/...)
//! - greeting: the demonstration function, compiled by hand
//! - sink: observable output lines

pub mod completion;
pub mod continuation;
pub mod dispatch;
pub mod error;
pub mod greeting;
pub mod job;
pub mod sink;
pub mod step;
pub mod suspend;

pub use completion::{Completion, CompletionSlot, OnceCompletion, Outcome};
pub use continuation::{Continuation, Frame, SuspendFn};
pub use dispatch::{Dispatcher, Inline, WorkerPool};
pub use error::{ContinuationError, JobError};
pub use greeting::{DelayedGreeting, GreetingLocals};
pub use job::{Job, JobId, JobState, Start};
pub use sink::{Sink, Transcript};
pub use step::Step;
pub use suspend::{Failing, Immediate, SuspensionPoint, TimerQueue};
