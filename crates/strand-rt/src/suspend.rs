// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Suspension points.
//!
//! A suspension point is the only place a function may give up its thread.
//! Given a wait duration and the waiter to resume, it either completes
//! synchronously (`Step::Done`, the dispatcher falls through to the next
//! label) or keeps the waiter and returns the suspend sentinel.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::completion::{Completion, Outcome};
use crate::dispatch::{Dispatcher, Inline};
use crate::error::ContinuationError;
use crate::step::Step;

/// A wait that may or may not be ready.
pub trait SuspensionPoint<T>: Send + Sync {
    /// Complete now, or register `waiter` and return `Step::Suspended`.
    ///
    /// Must not resume `waiter` before returning: the caller still holds
    /// the waiter's frame.
    fn suspend(&self, duration: Duration, waiter: Arc<dyn Completion<T>>) -> Step<T>;
}

/// Always ready. The waiter is never registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl SuspensionPoint<()> for Immediate {
    fn suspend(&self, duration: Duration, _waiter: Arc<dyn Completion<()>>) -> Step<()> {
        debug!(?duration, "wait completed synchronously");
        Step::Done(())
    }
}

/// Timer stand-in: every wait suspends and is resumed when fired.
///
/// Entries fire in deadline order (ties in registration order). Firing
/// hands the resume to the queue's dispatcher, so it can land on another
/// thread than the one that suspended.
pub struct TimerQueue {
    entries: Mutex<BinaryHeap<Entry>>,
    arrived: Condvar,
    next_seq: AtomicU64,
    dispatcher: Arc<dyn Dispatcher>,
}

struct Entry {
    deadline: Instant,
    seq: u64,
    waiter: Arc<dyn Completion<()>>,
    outcome: Outcome<()>,
}

// BinaryHeap is a max-heap; reverse so the earliest deadline is on top.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl TimerQueue {
    /// Timer that resumes waiters on whichever thread fires it.
    pub fn new() -> Arc<Self> {
        Self::with_dispatcher(Arc::new(Inline))
    }

    /// Timer that posts resumes to `dispatcher`.
    pub fn with_dispatcher(dispatcher: Arc<dyn Dispatcher>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(BinaryHeap::new()),
            arrived: Condvar::new(),
            next_seq: AtomicU64::new(0),
            dispatcher,
        })
    }

    /// Register `waiter` to be resumed with `outcome` after `duration`.
    pub fn register(&self, duration: Duration, waiter: Arc<dyn Completion<()>>, outcome: Outcome<()>) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + duration;
        debug!(seq, ?duration, "waiter registered");
        self.lock().push(Entry {
            deadline,
            seq,
            waiter,
            outcome,
        });
        self.arrived.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deadline of the entry that fires next.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.lock().peek().map(|e| e.deadline)
    }

    /// Fire the earliest entry regardless of its deadline.
    pub fn fire_next(&self) -> bool {
        let entry = self.lock().pop();
        match entry {
            Some(entry) => {
                self.fire(entry);
                true
            }
            None => false,
        }
    }

    /// Fire every entry whose deadline is at or before `now`.
    pub fn fire_due(&self, now: Instant) -> usize {
        let mut fired = 0;
        loop {
            let entry = {
                let mut entries = self.lock();
                match entries.peek().map(|e| e.deadline) {
                    Some(deadline) if deadline <= now => entries.pop(),
                    _ => None,
                }
            };
            match entry {
                Some(entry) => {
                    self.fire(entry);
                    fired += 1;
                }
                None => return fired,
            }
        }
    }

    /// Fire everything, earliest first, without waiting.
    pub fn fire_all(&self) -> usize {
        let mut fired = 0;
        while self.fire_next() {
            fired += 1;
        }
        fired
    }

    /// Sleep until each deadline and fire it, until no entries remain.
    ///
    /// Entries registered while waiting (for example by a resumed function
    /// that suspends again) are picked up too.
    pub fn run_until_empty(&self) -> usize {
        let mut fired = 0;
        loop {
            let entry = {
                let mut entries = self.lock();
                loop {
                    let now = Instant::now();
                    let wait = match entries.peek().map(|e| e.deadline) {
                        None => break None,
                        Some(deadline) if deadline <= now => break entries.pop(),
                        Some(deadline) => deadline - now,
                    };
                    entries = self
                        .arrived
                        .wait_timeout(entries, wait)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            };
            match entry {
                Some(entry) => {
                    self.fire(entry);
                    fired += 1;
                }
                None => return fired,
            }
        }
    }

    fn fire(&self, entry: Entry) {
        let Entry {
            seq,
            waiter,
            outcome,
            ..
        } = entry;
        debug!(seq, ok = outcome.is_ok(), "firing waiter");
        self.dispatcher.dispatch(Box::new(move || {
            if let Err(e) = waiter.resume_with(outcome) {
                warn!(seq, "resume rejected: {}", e);
            }
        }));
    }

    fn lock(&self) -> MutexGuard<'_, BinaryHeap<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SuspensionPoint<()> for TimerQueue {
    fn suspend(&self, duration: Duration, waiter: Arc<dyn Completion<()>>) -> Step<()> {
        self.register(duration, waiter, Ok(()));
        Step::Suspended
    }
}

/// A timer whose waits end in failure.
///
/// Suspends like `TimerQueue` but the waiter is resumed with
/// `ContinuationError::Segment(reason)`.
pub struct Failing {
    timer: Arc<TimerQueue>,
    reason: String,
}

impl Failing {
    pub fn new(timer: Arc<TimerQueue>, reason: impl Into<String>) -> Self {
        Self {
            timer,
            reason: reason.into(),
        }
    }
}

impl SuspensionPoint<()> for Failing {
    fn suspend(&self, duration: Duration, waiter: Arc<dyn Completion<()>>) -> Step<()> {
        self.timer.register(
            duration,
            waiter,
            Err(ContinuationError::Segment(self.reason.clone())),
        );
        Step::Suspended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionSlot;

    #[test]
    fn immediate_never_registers() {
        let slot = CompletionSlot::<()>::new();
        let step = Immediate.suspend(Duration::from_secs(1), slot.clone());
        assert_eq!(step, Step::Done(()));
        assert_eq!(slot.notifications(), 0);
    }

    #[test]
    fn timer_suspends_until_fired() {
        let timer = TimerQueue::new();
        let slot = CompletionSlot::<()>::new();
        let step = timer.suspend(Duration::from_secs(60), slot.clone());
        assert!(step.is_suspended());
        assert_eq!(timer.len(), 1);
        assert!(!slot.is_delivered());

        assert!(timer.fire_next());
        assert_eq!(slot.take(), Some(Ok(())));
        assert!(timer.is_empty());
        assert!(!timer.fire_next());
    }

    #[test]
    fn fires_in_deadline_order() {
        let timer = TimerQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (name, ms) in [("late", 30u64), ("early", 10), ("middle", 20)] {
            let order = order.clone();
            timer.register(
                Duration::from_millis(ms),
                crate::completion::OnceCompletion::new(move |_| order.lock().unwrap().push(name)),
                Ok(()),
            );
        }
        assert_eq!(timer.fire_all(), 3);
        assert_eq!(*order.lock().unwrap(), vec!["early", "middle", "late"]);
    }

    #[test]
    fn fire_due_leaves_future_entries() {
        let timer = TimerQueue::new();
        let soon = CompletionSlot::<()>::new();
        let later = CompletionSlot::<()>::new();
        timer.register(Duration::ZERO, soon.clone(), Ok(()));
        timer.register(Duration::from_secs(3600), later.clone(), Ok(()));

        assert!(timer.next_deadline().is_some_and(|d| d <= Instant::now()));
        assert_eq!(timer.fire_due(Instant::now()), 1);
        assert!(soon.is_delivered());
        assert!(!later.is_delivered());
        assert_eq!(timer.len(), 1);
    }

    #[test]
    fn run_until_empty_waits_for_deadlines() {
        let timer = TimerQueue::new();
        let slot = CompletionSlot::<()>::new();
        let start = Instant::now();
        timer.register(Duration::from_millis(15), slot.clone(), Ok(()));
        assert_eq!(timer.run_until_empty(), 1);
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert!(slot.is_delivered());
    }

    #[test]
    fn failing_delivers_error() {
        let timer = TimerQueue::new();
        let failing = Failing::new(timer.clone(), "disk on fire");
        let slot = CompletionSlot::<()>::new();
        assert!(failing.suspend(Duration::ZERO, slot.clone()).is_suspended());
        timer.fire_all();
        assert_eq!(
            slot.wait(),
            Err(ContinuationError::Segment("disk on fire".into()))
        );
    }
}
