// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Command-line interface.

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "strand", version)]
#[command(about = "Hand-compiled continuations and structured job trees", long_about = None)]
pub struct Cli {
    /// Log runtime events (label transitions, resumes, job states) to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Drive the hand-compiled greeting through suspend and resume
    #[command(alias = "cont")]
    Continuation(ContinuationArgs),
    /// Run a parent job with two staggered children
    Jobs(JobsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ContinuationArgs {
    /// Length of the simulated delay
    #[arg(long, default_value_t = 1000)]
    pub delay_ms: u64,

    /// How many fresh invocations to run
    #[arg(long, default_value_t = 1)]
    pub cycles: u32,

    /// Worker threads that resumes are posted to (0 = one per core)
    #[arg(long, default_value_t = 2)]
    pub workers: usize,

    /// Use a suspension point that completes synchronously
    #[arg(long)]
    pub immediate: bool,
}

#[derive(Args, Debug, Clone)]
pub struct JobsArgs {
    /// Delay of the first child
    #[arg(long, default_value_t = 200)]
    pub first_ms: u64,

    /// Delay of the second child
    #[arg(long, default_value_t = 300)]
    pub second_ms: u64,

    /// Make the first child fail, cancelling the tree
    #[arg(long)]
    pub fail: bool,

    /// Also show a lazily started job
    #[arg(long)]
    pub lazy: bool,
}
