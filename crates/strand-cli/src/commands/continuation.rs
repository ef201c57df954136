// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `strand continuation`: start the greeting, let it suspend, resume it
//! from the timer on a worker thread.

use std::sync::Arc;
use std::time::Duration;

use strand_rt::{
    CompletionSlot, Continuation, DelayedGreeting, Immediate, Sink, Step, SuspensionPoint,
    TimerQueue, WorkerPool,
};
use tracing::info;

use super::{CommandError, Console};
use crate::cli::ContinuationArgs;
use crate::output;

/// Grace period for the completion after the timer has fired.
const SETTLE: Duration = Duration::from_secs(5);

pub fn cmd_continuation(args: &ContinuationArgs) -> Result<(), CommandError> {
    let sink: Arc<dyn Sink> = Arc::new(Console);
    let pool = WorkerPool::new(args.workers);
    let timer = TimerQueue::with_dispatcher(pool.clone());
    let point: Arc<dyn SuspensionPoint<()>> = if args.immediate {
        Arc::new(Immediate)
    } else {
        timer.clone()
    };
    let delay = Duration::from_millis(args.delay_ms);
    info!(workers = pool.worker_count(), ?delay, immediate = args.immediate, "running greeting");

    for cycle in 1..=args.cycles {
        let slot = CompletionSlot::<()>::new();
        let cont = Continuation::new(
            DelayedGreeting::new(delay, point.clone(), sink.clone()),
            slot.clone(),
        );

        sink.emit(&output::banner(&format!("Start {}/{}", cycle, args.cycles)));
        let first = cont.start()?;
        sink.emit(&format!(
            "{} {} (label {})",
            output::label("first result:"),
            describe(first),
            cont.label()
        ));

        if first.is_suspended() {
            sink.emit(&output::banner("Second"));
            timer.run_until_empty();
        }

        let outcome = slot
            .wait_timeout(SETTLE)
            .ok_or(CommandError::NoOutcome(SETTLE.as_millis() as u64))?;
        sink.emit(&format!(
            "{} {:?}",
            output::label("completion received:"),
            outcome
        ));
        outcome?;
        sink.emit(&output::banner("End"));
    }

    pool.shutdown();
    println!("{}", output::banner_ok("continuation"));
    Ok(())
}

fn describe(step: Step<()>) -> &'static str {
    match step {
        Step::Suspended => "COROUTINE_SUSPENDED",
        Step::Done(()) => "Done",
    }
}
