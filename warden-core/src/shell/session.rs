//! Persistent pty-backed shell session.
//!
//! Unlike spawning a fresh subprocess per command, the session keeps one
//! interactive login shell alive across commands, so `cd`, exported
//! variables, and long-running jobs survive between turns. Commands are
//! framed with sentinels (see [`super::framing`]) to recover exit codes from
//! the single shared pty stream.
//!
//! The implementation is blocking and internally serialized; async callers
//! run `execute` on the blocking pool. Pty reads happen on a dedicated
//! thread feeding a channel, so a wedged command can never hold a reader
//! hostage past its deadline.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, ChildKiller as _, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, warn};

use crate::error::RuntimeError;
use crate::shell::framing::{CommandFraming, FramingState, SentinelPair, EXIT_CODE_UNKNOWN};

/// How long `stop()` waits for the shell to exit before force-killing it.
const GRACEFUL_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on one channel wait so liveness is re-checked periodically.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A persistent interactive shell attached to a pty.
pub struct ShellSession {
    shell: String,
    workdir: PathBuf,
    inner: Mutex<Option<SessionHandle>>,
}

struct SessionHandle {
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    output_rx: Receiver<Vec<u8>>,
    reader_thread: Option<JoinHandle<()>>,
    // Kept alive for the session's lifetime; dropping it closes the master fd.
    _master: Box<dyn MasterPty + Send>,
}

impl ShellSession {
    pub fn new(shell: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            workdir: workdir.into(),
            inner: Mutex::new(None),
        }
    }

    /// Start the shell. Idempotent: a second call on a live session is a
    /// no-op. Pty allocation or spawn failure is fatal to the session.
    pub fn start(&self) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock();
        if inner.is_none() {
            *inner = Some(self.spawn_handle()?);
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Execute one command, returning `(exit_code, output)`.
    ///
    /// Single-flight: concurrent callers serialize on the internal lock.
    /// On timeout the partial output is returned with exit code −1 and the
    /// shell is killed and restarted, so the next command starts from a
    /// clean prompt instead of interleaving with leftover output.
    pub fn execute(&self, command: &str, timeout: Duration) -> Result<(i32, String), RuntimeError> {
        let mut inner = self.inner.lock();
        if inner.is_none() {
            *inner = Some(self.spawn_handle()?);
        }
        let handle = inner.as_mut().expect("session started above");

        // Drain stale bytes so prior output never leaks into this result.
        while handle.output_rx.try_recv().is_ok() {}

        let sentinels = SentinelPair::generate();
        let line = sentinels.wrap_command(command);
        handle
            .writer
            .write_all(line.as_bytes())
            .and_then(|_| handle.writer.write_all(b"\n"))
            .and_then(|_| handle.writer.flush())
            .map_err(|err| RuntimeError::shell(format!("failed to write command: {err}")))?;

        let deadline = Instant::now() + timeout;
        let mut framing = CommandFraming::new(&sentinels);
        let mut shell_alive = true;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match handle.output_rx.recv_timeout(remaining.min(POLL_INTERVAL)) {
                Ok(chunk) => {
                    if framing.push(&chunk) == FramingState::Complete {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Ok(Some(status)) = handle.child.try_wait() {
                        warn!(exit = ?status, "shell process exited mid-command");
                        shell_alive = false;
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    shell_alive = false;
                    break;
                }
            }
        }

        let completed = framing.state() == FramingState::Complete;
        let result = framing.finish();

        if completed && shell_alive {
            debug!(exit_code = result.exit_code, "command completed");
            return Ok((result.exit_code, result.output));
        }

        // Timed out or the shell died: the session is no longer in a known
        // state. Tear it down; restart lazily on the next call.
        warn!(
            command,
            timeout_secs = timeout.as_secs(),
            shell_alive,
            "command did not complete; restarting shell session"
        );
        if let Some(stale) = inner.take() {
            teardown(stale);
        }
        *inner = Some(self.spawn_handle()?);

        let mut output = result.output;
        if shell_alive {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&format!(
                "[command timed out after {} seconds]",
                timeout.as_secs()
            ));
        }
        Ok((EXIT_CODE_UNKNOWN, output))
    }

    /// Stop the shell: graceful exit with a deadline, then force-kill.
    /// Idempotent; also invoked on drop.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.lock().take() {
            teardown(handle);
        }
    }

    fn spawn_handle(&self) -> Result<SessionHandle, RuntimeError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 120,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| RuntimeError::shell(format!("pty allocation failed: {err}")))?;

        let mut builder = CommandBuilder::new(&self.shell);
        builder.arg("-l");
        builder.arg("-i");
        builder.cwd(&self.workdir);
        builder.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(builder)
            .map_err(|err| RuntimeError::shell(format!("failed to spawn {}: {err}", self.shell)))?;
        // The slave side belongs to the child; close our copy.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| RuntimeError::shell(format!("failed to clone pty reader: {err}")))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|err| RuntimeError::shell(format!("failed to take pty writer: {err}")))?;

        let (output_tx, output_rx) = mpsc::channel();
        let reader_thread = std::thread::spawn(move || pump_output(reader, output_tx));

        // Pin the working directory even if the login shell's rc files
        // changed it.
        let cd_line = format!("cd {}\n", shell_escape::escape(self.workdir.to_string_lossy()));
        writer
            .write_all(cd_line.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|err| RuntimeError::shell(format!("failed to initialize shell: {err}")))?;

        debug!(shell = %self.shell, workdir = %self.workdir.display(), "shell session started");

        Ok(SessionHandle {
            child,
            writer,
            output_rx,
            reader_thread: Some(reader_thread),
            _master: pair.master,
        })
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump_output(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buffer = [0u8; 4096];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(count) => {
                if tx.send(buffer[..count].to_vec()).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

fn teardown(mut handle: SessionHandle) {
    // Ask politely first; a live shell exits and closes the pty.
    let _ = handle.writer.write_all(b"exit\n");
    let _ = handle.writer.flush();

    let deadline = Instant::now() + GRACEFUL_EXIT_TIMEOUT;
    let mut exited = false;
    while Instant::now() < deadline {
        match handle.child.try_wait() {
            Ok(Some(_)) => {
                exited = true;
                break;
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(20)),
            Err(_) => break,
        }
    }
    if !exited {
        if let Err(err) = handle.child.kill() {
            warn!(error = %err, "failed to kill shell process");
        }
        let _ = handle.child.wait();
    }

    // Dropping the master closes the pty and unblocks the reader thread.
    drop(handle._master);
    drop(handle.writer);
    if let Some(thread) = handle.reader_thread.take() {
        let _ = thread.join();
    }
}
