// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Integration tests for the `strand` binary.
//! Each test runs a subcommand with short delays and checks stdout.

use std::path::PathBuf;
use std::process::Command;

fn strand_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("strand");
    path
}

fn run(args: &[&str]) -> (String, String, i32) {
    let out = Command::new(strand_binary())
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run strand");
    (
        String::from_utf8_lossy(&out.stdout).into_owned(),
        String::from_utf8_lossy(&out.stderr).into_owned(),
        out.status.code().unwrap_or(-1),
    )
}

/// Position of the first line containing `needle`.
fn line_of(stdout: &str, needle: &str) -> usize {
    stdout
        .lines()
        .position(|l| l.contains(needle))
        .unwrap_or_else(|| panic!("{:?} not in output:\n{}", needle, stdout))
}

#[test]
fn continuation_suspends_then_resumes_on_a_worker() {
    let (stdout, stderr, code) = run(&["continuation", "--delay-ms", "20"]);
    assert_eq!(code, 0, "stderr: {}", stderr);

    let start = line_of(&stdout, "Start!!");
    let suspended = line_of(&stdout, "COROUTINE_SUSPENDED");
    let count = line_of(&stdout, "] 10");
    let message = line_of(&stdout, "Local Value");
    let end = line_of(&stdout, "] End");
    assert!(start < suspended && suspended < count && count < message && message < end);

    let resumed = stdout.lines().nth(count).unwrap();
    assert!(resumed.starts_with("[strand-worker-"), "resumed on: {}", resumed);
    assert!(stdout.contains("continuation OK"));
}

#[test]
fn immediate_point_finishes_in_one_call() {
    let (stdout, stderr, code) = run(&["continuation", "--immediate", "--cycles", "2"]);
    assert_eq!(code, 0, "stderr: {}", stderr);
    assert!(!stdout.contains("COROUTINE_SUSPENDED"));
    assert_eq!(stdout.matches("Start!!").count(), 2);
    assert_eq!(stdout.lines().filter(|l| l.ends_with("] End")).count(), 2);
    assert!(stdout.lines().all(|l| !l.contains("[strand-worker-")));
}

#[test]
fn parent_completes_after_its_children() {
    let (stdout, stderr, code) = run(&["jobs", "--first-ms", "100", "--second-ms", "200"]);
    assert_eq!(code, 0, "stderr: {}", stderr);

    assert!(stdout.contains("[early] parent finished? false (Completing)"));
    assert!(stdout.contains("[late] parent finished? true (Completed)"));
    assert!(line_of(&stdout, "child-1 done") < line_of(&stdout, "child-2 done"));
    assert!(stdout.contains("all child jobs are finished"));
}

#[test]
fn failing_child_cancels_the_tree() {
    let (stdout, stderr, code) = run(&["jobs", "--first-ms", "20", "--second-ms", "5000", "--fail"]);
    assert_eq!(code, 0, "stderr: {}", stderr);
    assert!(stdout.contains("child-1 failing"));
    assert!(!stdout.contains("child-2 done"));
    assert!(stdout.contains("(Cancelled)"));
    assert!(stdout.contains("jobs FAILED: job failed: child-1 gave up"));
}

#[test]
fn lazy_job_waits_for_start() {
    let (stdout, _, code) = run(&["jobs", "--first-ms", "10", "--second-ms", "20", "--lazy"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("[lazy] before start: New"));
    assert!(stdout.contains("[lazy] after join: Completed"));
}

#[test]
fn bad_flag_is_rejected() {
    let (_, stderr, code) = run(&["continuation", "--delay-ms", "soon"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("--delay-ms"));
}
