// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `strand jobs`: a parent with two staggered children, observed while
//! the children are still running and again after they finish.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use strand_rt::{Dispatcher, Job, JobError, Sink, Start, WorkerPool};
use tracing::info;

use super::{CommandError, Console};
use crate::cli::JobsArgs;
use crate::output;

const SETTLE: Duration = Duration::from_secs(5);

pub fn cmd_jobs(args: &JobsArgs) -> Result<(), CommandError> {
    let pool = WorkerPool::new(4);
    let first = Duration::from_millis(args.first_ms);
    let second = Duration::from_millis(args.second_ms);
    info!(?first, ?second, fail = args.fail, "running job tree");

    let parent = launch_tree(pool.clone(), first, second, args.fail);

    // Look while the earlier child is still sleeping.
    thread::sleep(first.min(second) / 2);
    print_children(&parent);
    println!(
        "{} parent finished? {} ({})",
        output::label("[early]"),
        output::flag(parent.is_completed()),
        output::state(parent.state())
    );

    let outcome = parent.join_timeout(first.max(second) + SETTLE);
    print_children(&parent);
    println!(
        "{} parent finished? {} ({})",
        output::label("[late]"),
        output::flag(parent.is_completed()),
        output::state(parent.state())
    );

    if args.lazy {
        run_lazy(pool.clone())?;
    }
    pool.shutdown();

    match outcome {
        Ok(()) => {
            println!("{}", output::banner_ok("jobs"));
            Ok(())
        }
        Err(JobError::TimedOut) => Err(JobError::TimedOut.into()),
        Err(e) if args.fail => {
            println!("{}", output::banner_fail("jobs", &e.to_string()));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn launch_tree(pool: Arc<WorkerPool>, first: Duration, second: Duration, fail: bool) -> Arc<Job> {
    let dispatcher: Arc<dyn Dispatcher> = pool;
    Job::launch("parent", None, dispatcher.clone(), Start::Default, move |job| {
        Console.emit("parent started");

        let one = Job::launch("child-1", Some(job), dispatcher.clone(), Start::Default, move |child| {
            child.sleep(first)?;
            if fail {
                Console.emit("child-1 failing");
                return Err(JobError::Failed("child-1 gave up".into()));
            }
            Console.emit("child-1 done");
            Ok(())
        });
        let two = Job::launch("child-2", Some(job), dispatcher.clone(), Start::Default, move |child| {
            child.sleep(second)?;
            Console.emit("child-2 done");
            Ok(())
        });

        Console.emit(&format!("child-1 finished? {}", output::flag(one.is_completed())));
        Console.emit(&format!("child-2 finished? {}", output::flag(two.is_completed())));
        // The body is over but the children are not: the parent sits in Completing.
        Console.emit("parent body done");
        Ok(())
    })
}

/// List the children that are still running.
fn print_children(job: &Job) {
    let active = job.active_children();
    if active.is_empty() {
        println!("  all child jobs are finished");
    }
    for child in active {
        println!(
            "  {} {} finished? {} ({})",
            child.name(),
            child.id(),
            output::flag(child.is_completed()),
            output::state(child.state())
        );
    }
}

fn run_lazy(pool: Arc<WorkerPool>) -> Result<(), CommandError> {
    let job = Job::launch("lazy", None, pool, Start::Lazy, |job| {
        Console.emit("[lazy] start");
        job.sleep(Duration::from_millis(50))?;
        Console.emit("[lazy] end");
        Ok(())
    });
    println!("{} {}", output::label("[lazy] before start:"), output::state(job.state()));
    job.start();
    job.join_timeout(SETTLE)?;
    println!("{} {}", output::label("[lazy] after join:"), output::state(job.state()));
    Ok(())
}
