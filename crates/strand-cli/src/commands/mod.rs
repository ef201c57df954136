// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! CLI command implementations.

pub mod continuation;
pub mod jobs;

use std::thread;

use strand_rt::{ContinuationError, JobError, Sink};
use thiserror::Error;

use crate::output;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Continuation(#[from] ContinuationError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("no outcome after {0} ms")]
    NoOutcome(u64),
}

/// Prints each line prefixed with the emitting thread's name.
pub struct Console;

impl Sink for Console {
    fn emit(&self, line: &str) {
        println!("{} {}", output::thread_tag(&current_thread()), line);
    }
}

pub fn current_thread() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id()),
    }
}
