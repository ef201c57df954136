// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! CLI output formatting with colors and styling.
//!
//! Respects NO_COLOR and FORCE_COLOR environment variables, and `--no-color`.

use colored::{ColoredString, Colorize};
use strand_rt::JobState;

/// Initialize color support. Call once at startup.
pub fn init(no_color: bool) {
    if no_color || std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    } else if std::env::var("FORCE_COLOR").is_ok() {
        colored::control::set_override(true);
    }
}

pub fn error_label() -> ColoredString {
    "error".red().bold()
}

pub fn banner(text: &str) -> String {
    format!("{} {} {}", "=====".dimmed(), text.bold(), "=====".dimmed())
}

pub fn banner_ok(phase: &str) -> String {
    format!(
        "{} {} {}",
        "===".dimmed(),
        format!("{} OK", phase).green().bold(),
        "===".dimmed()
    )
}

pub fn banner_fail(phase: &str, reason: &str) -> String {
    format!(
        "{} {} {}",
        "===".dimmed(),
        format!("{} FAILED: {}", phase, reason).red().bold(),
        "===".dimmed()
    )
}

/// Thread prefix for a console line.
pub fn thread_tag(name: &str) -> ColoredString {
    format!("[{}]", name).cyan()
}

pub fn label(name: &str) -> ColoredString {
    name.yellow()
}

pub fn state(s: JobState) -> ColoredString {
    let text = s.to_string();
    match s {
        JobState::New => text.dimmed(),
        JobState::Active | JobState::Completing => text.blue(),
        JobState::Completed => text.green(),
        JobState::Cancelling | JobState::Cancelled => text.red(),
    }
}

pub fn flag(value: bool) -> ColoredString {
    if value {
        "true".green()
    } else {
        "false".red()
    }
}
