// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Observable output.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

/// Receives the lines a demonstration function prints.
pub trait Sink: Send + Sync {
    fn emit(&self, line: &str);
}

/// One captured line, with the thread that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    pub thread: ThreadId,
    pub thread_name: Option<String>,
}

/// Collects lines in order. Used by tests and by callers that want to
/// print after the fact.
#[derive(Debug, Default)]
pub struct Transcript {
    lines: Mutex<Vec<Line>>,
}

impl Transcript {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<Line> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Just the text of each line.
    pub fn texts(&self) -> Vec<String> {
        self.lines().into_iter().map(|l| l.text).collect()
    }
}

impl Sink for Transcript {
    fn emit(&self, line: &str) {
        let current = thread::current();
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Line {
                text: line.to_string(),
                thread: current.id(),
                thread_name: current.name().map(str::to_string),
            });
    }
}
