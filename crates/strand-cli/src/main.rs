// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Strand CLI - runs the continuation and job tree demonstrations.

mod cli;
mod commands;
mod output;

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

fn main() {
    let cli = Cli::parse();
    output::init(cli.no_color);
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Command::Continuation(args) => commands::continuation::cmd_continuation(args),
        Command::Jobs(args) => commands::jobs::cmd_jobs(args),
    };

    if let Err(e) = result {
        eprintln!("{}: {}", output::error_label(), e);
        process::exit(1);
    }
}

/// Events go to stderr so they never interleave with demo output on stdout.
/// `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_target(false)
        .init();
}
