// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The value a dispatcher or suspension point hands back to its caller.

/// Either a real value, or the suspend sentinel.
///
/// `Suspended` is never stored. The caller that sees it must unwind
/// immediately; progress continues later through a separate resume call,
/// possibly on another thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<T> {
    /// Finished with a value.
    Done(T),
    /// No progress now. Resumption happens elsewhere.
    Suspended,
}

impl<T> Step<T> {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Step::Suspended)
    }

    /// The value, if finished.
    pub fn done(self) -> Option<T> {
        match self {
            Step::Done(v) => Some(v),
            Step::Suspended => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Step<U> {
        match self {
            Step::Done(v) => Step::Done(f(v)),
            Step::Suspended => Step::Suspended,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_distinct_from_values() {
        let s: Step<()> = Step::Suspended;
        assert!(s.is_suspended());
        assert_eq!(s.done(), None);
        assert_eq!(Step::Done(3).map(|v| v * 2), Step::Done(6));
    }
}
