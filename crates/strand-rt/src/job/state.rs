// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Job lifecycle states.
//!
//! ```text
//!                                       wait children
//! +-----+ start  +--------+ complete   +------------+  finish  +-----------+
//! | New | -----> | Active | ---------> | Completing | -------> | Completed |
//! +-----+        +--------+            +------------+          +-----------+
//!                  |  cancel / fail       |
//!                  |     +----------------+
//!                  V     V
//!              +------------+                         finish  +-----------+
//!              | Cancelling | ------------------------------> | Cancelled |
//!              +------------+                                 +-----------+
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Created lazily, waiting for `start()`.
    New,
    /// Body running.
    Active,
    /// Body finished, children still running.
    Completing,
    /// Body and every child finished normally.
    Completed,
    /// Cancelled or failed; waiting for the body and children to wind down.
    Cancelling,
    /// Finished after cancellation or failure.
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled)
    }

    pub fn is_active(self) -> bool {
        matches!(self, JobState::Active | JobState::Completing)
    }

    /// True once cancellation has been requested, finished or not.
    pub fn is_cancelled(self) -> bool {
        matches!(self, JobState::Cancelling | JobState::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::New => "New",
            JobState::Active => "Active",
            JobState::Completing => "Completing",
            JobState::Completed => "Completed",
            JobState::Cancelling => "Cancelling",
            JobState::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}
