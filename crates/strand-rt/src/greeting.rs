// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The demonstration function, compiled by hand.
//!
//! Written with native suspension it would read:
//!
//! ```text
//! fn greeting() {
//!     let count = 10;
//!     let message = "Local Value";
//!     print("Start!!");
//!     delay(1000ms);
//!     print(count);
//!     print(message);
//!     print("End");
//! }
//! ```
//!
//! The single `delay` is the only suspension point, so the body splits
//! into two labels. `count` and `message` cross it, so they become fields
//! of `GreetingLocals` instead of stack variables.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::continuation::{Continuation, Frame, SuspendFn};
use crate::error::ContinuationError;
use crate::sink::Sink;
use crate::step::Step;
use crate::suspend::SuspensionPoint;

pub const START_MARKER: &str = "Start!!";
pub const END_MARKER: &str = "End";

/// Locals that survive the delay.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GreetingLocals {
    pub count: i32,
    pub message: String,
}

/// Prints a start marker, waits, then prints its captured locals and an
/// end marker.
pub struct DelayedGreeting {
    delay: Duration,
    point: Arc<dyn SuspensionPoint<()>>,
    sink: Arc<dyn Sink>,
}

impl DelayedGreeting {
    pub fn new(delay: Duration, point: Arc<dyn SuspensionPoint<()>>, sink: Arc<dyn Sink>) -> Self {
        Self { delay, point, sink }
    }
}

impl SuspendFn for DelayedGreeting {
    type Locals = GreetingLocals;
    type Resume = ();
    type Output = ();

    fn resume(
        &self,
        cont: &Arc<Continuation<Self>>,
        frame: &mut Frame<GreetingLocals, ()>,
    ) -> Result<Step<()>, ContinuationError> {
        loop {
            match frame.label {
                0 => {
                    frame.locals.count = 10;
                    frame.locals.message = "Local Value".to_string();
                    self.sink.emit(START_MARKER);

                    frame.label = 1;
                    match self.point.suspend(self.delay, cont.clone()) {
                        Step::Suspended => return Ok(Step::Suspended),
                        Step::Done(value) => {
                            debug!("delay ready, falling through");
                            frame.set_result(Ok(value));
                        }
                    }
                }
                1 => {
                    frame.resumed()?;
                    self.sink.emit(&frame.locals.count.to_string());
                    self.sink.emit(&frame.locals.message);
                    self.sink.emit(END_MARKER);
                    return Ok(Step::Done(()));
                }
                label => return Err(ContinuationError::InvalidState { label }),
            }
        }
    }
}
