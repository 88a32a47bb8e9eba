//! Shell session behavior against a real pty-backed shell.
//!
//! These tests exercise the persistent-session property that distinguishes
//! the shell session from per-command subprocess spawning: state survives
//! between `execute` calls.

use std::time::{Duration, Instant};

use tempfile::TempDir;
use warden_core::shell::ShellSession;

const TIMEOUT: Duration = Duration::from_secs(15);

fn session_in(dir: &TempDir) -> ShellSession {
    ShellSession::new("/bin/bash", dir.path())
}

#[test]
fn exit_code_fidelity() {
    let dir = TempDir::new().unwrap();
    let session = session_in(&dir);
    session.start().expect("start");

    let (code, _) = session.execute("true", TIMEOUT).unwrap();
    assert_eq!(code, 0);
    let (code, _) = session.execute("false", TIMEOUT).unwrap();
    assert_eq!(code, 1);
    let (code, _) = session.execute("exit 42", TIMEOUT).unwrap();
    assert_eq!(code, 42);

    session.stop();
}

#[test]
fn state_persists_across_commands() {
    let dir = TempDir::new().unwrap();
    let session = session_in(&dir);
    session.start().expect("start");

    let (code, _) = session.execute("cd /tmp", TIMEOUT).unwrap();
    assert_eq!(code, 0);
    let (_, output) = session.execute("pwd", TIMEOUT).unwrap();
    assert!(output.contains("/tmp"), "pwd output: {output:?}");

    let (code, _) = session.execute("export WARDEN_TEST_VAR=alive", TIMEOUT).unwrap();
    assert_eq!(code, 0);
    let (_, output) = session.execute("echo $WARDEN_TEST_VAR", TIMEOUT).unwrap();
    assert!(output.contains("alive"), "env output: {output:?}");

    session.stop();
}

#[test]
fn output_isolation_between_commands() {
    let dir = TempDir::new().unwrap();
    let session = session_in(&dir);
    session.start().expect("start");

    let (_, first) = session.execute("echo AAAA", TIMEOUT).unwrap();
    assert!(first.contains("AAAA"));
    let (_, second) = session.execute("echo BBBB", TIMEOUT).unwrap();
    assert!(second.contains("BBBB"));
    assert!(
        !second.contains("AAAA"),
        "prior output leaked into next result: {second:?}"
    );

    session.stop();
}

#[test]
fn multi_line_output_is_preserved() {
    let dir = TempDir::new().unwrap();
    let session = session_in(&dir);
    session.start().expect("start");

    let (code, output) = session.execute("printf 'l1\\nl2\\nl3\\n'", TIMEOUT).unwrap();
    assert_eq!(code, 0);
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines, vec!["l1", "l2", "l3"]);

    session.stop();
}

#[test]
fn timeout_returns_promptly_and_session_recovers() {
    let dir = TempDir::new().unwrap();
    let session = session_in(&dir);
    session.start().expect("start");

    let started = Instant::now();
    let (code, output) = session
        .execute("sleep 10", Duration::from_secs(1))
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(6), "took {elapsed:?}");
    assert_eq!(code, -1);
    assert!(output.contains("timed out"), "output: {output:?}");

    // The session restarted; the next command must frame cleanly.
    let (code, output) = session.execute("echo recovered", TIMEOUT).unwrap();
    assert_eq!(code, 0);
    assert!(output.contains("recovered"));

    session.stop();
}

#[test]
fn start_is_idempotent_and_stop_is_reentrant() {
    let dir = TempDir::new().unwrap();
    let session = session_in(&dir);

    session.start().expect("first start");
    session.start().expect("second start is a no-op");
    assert!(session.is_running());

    let (code, _) = session.execute("true", TIMEOUT).unwrap();
    assert_eq!(code, 0);

    session.stop();
    session.stop();
    assert!(!session.is_running());
}

#[test]
fn execute_auto_starts_a_stopped_session() {
    let dir = TempDir::new().unwrap();
    let session = session_in(&dir);

    let (code, output) = session.execute("echo lazy", TIMEOUT).unwrap();
    assert_eq!(code, 0);
    assert!(output.contains("lazy"));

    session.stop();
}

#[test]
fn command_output_with_ansi_colors_is_stripped() {
    let dir = TempDir::new().unwrap();
    let session = session_in(&dir);
    session.start().expect("start");

    let (code, output) = session
        .execute("printf '\\033[31mred\\033[0m\\n'", TIMEOUT)
        .unwrap();
    assert_eq!(code, 0);
    assert!(output.contains("red"));
    assert!(!output.contains('\u{1b}'), "escapes survived: {output:?}");

    session.stop();
}

#[test]
fn session_starts_in_its_working_directory() {
    let dir = TempDir::new().unwrap();
    let session = session_in(&dir);
    session.start().expect("start");

    let (_, output) = session.execute("pwd", TIMEOUT).unwrap();
    let canonical = dir.path().canonicalize().unwrap();
    assert!(
        output.contains(canonical.to_str().unwrap()) || output.contains(dir.path().to_str().unwrap()),
        "pwd output: {output:?}"
    );

    session.stop();
}
