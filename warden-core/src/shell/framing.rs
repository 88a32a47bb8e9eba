//! Sentinel framing for pty command output.
//!
//! A pty is one shared conversational byte stream, so the only portable way
//! to learn where a command's output starts and ends (and its exit code) is
//! to bracket the command with unique markers and an exit-code probe.
//!
//! The state machine here is deliberately decoupled from process I/O: it
//! consumes injected byte chunks, which makes the timeout/partial-output
//! path testable without a real shell.
//!
//! The wrapped command line concatenates each marker from two adjacent
//! quoted strings (`"__WARDEN""_BEGIN_..."`). The shell joins them before
//! echoing the marker to the stream, while the tty's echo of the *typed*
//! line keeps the quote characters, so the typed line never contains a
//! contiguous marker and cannot be mistaken for output.

use std::fmt::Write as _;

use rand::random;

use crate::utils::ansi::strip_ansi;

const EXIT_PROBE_PREFIX: &[u8] = b"__WARDEN_EXIT_";

/// Exit code reported when the probe is missing or unparsable.
pub const EXIT_CODE_UNKNOWN: i32 = -1;

/// Unique start/end markers for one command invocation.
#[derive(Debug, Clone)]
pub struct SentinelPair {
    nonce: u32,
}

impl SentinelPair {
    pub fn generate() -> Self {
        Self { nonce: random() }
    }

    #[cfg(test)]
    pub fn with_nonce(nonce: u32) -> Self {
        Self { nonce }
    }

    pub fn start_marker(&self) -> String {
        format!("__WARDEN_BEGIN_{:08x}__", self.nonce)
    }

    pub fn end_marker(&self) -> String {
        format!("__WARDEN_END_{:08x}__", self.nonce)
    }

    /// Bracket `command` with the marker echoes and the exit-code probe,
    /// ready to be written to the pty as a single line.
    pub fn wrap_command(&self, command: &str) -> String {
        let mut line = String::with_capacity(command.len() + 96);
        let _ = write!(
            line,
            "echo \"__WARDEN\"\"_BEGIN_{nonce:08x}__\"; {command}; \
             echo \"__WARDEN\"\"_EXIT_$?__\"; echo \"__WARDEN\"\"_END_{nonce:08x}__\"",
            nonce = self.nonce,
            command = command,
        );
        line
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingState {
    /// Discarding echo and stale bytes until the start marker appears.
    AwaitingStart,
    /// Accumulating command output until the end marker appears.
    AwaitingEnd,
    /// End marker seen; the frame is closed.
    Complete,
}

/// Parsed result of one framed command.
#[derive(Debug, Clone, PartialEq)]
pub struct FramedOutput {
    pub exit_code: i32,
    pub output: String,
    /// False when the end marker never arrived (timeout path).
    pub complete: bool,
}

/// Incremental scanner for one command's framed output.
pub struct CommandFraming {
    start_marker: Vec<u8>,
    end_marker: Vec<u8>,
    buffer: Vec<u8>,
    state: FramingState,
}

impl CommandFraming {
    pub fn new(sentinels: &SentinelPair) -> Self {
        Self {
            start_marker: sentinels.start_marker().into_bytes(),
            end_marker: sentinels.end_marker().into_bytes(),
            buffer: Vec::new(),
            state: FramingState::AwaitingStart,
        }
    }

    pub fn state(&self) -> FramingState {
        self.state
    }

    /// Feed one chunk of pty bytes; markers may be split across chunks.
    pub fn push(&mut self, chunk: &[u8]) -> FramingState {
        if self.state == FramingState::Complete {
            return self.state;
        }
        self.buffer.extend_from_slice(chunk);

        if self.state == FramingState::AwaitingStart {
            if let Some(index) = find_subslice(&self.buffer, &self.start_marker) {
                self.buffer.drain(..index + self.start_marker.len());
                self.state = FramingState::AwaitingEnd;
            }
        }
        if self.state == FramingState::AwaitingEnd {
            if let Some(index) = find_subslice(&self.buffer, &self.end_marker) {
                self.buffer.truncate(index);
                self.state = FramingState::Complete;
            }
        }
        self.state
    }

    /// Extract the exit code and cleaned output. On an unclosed frame this
    /// is the best-effort partial result.
    pub fn finish(self) -> FramedOutput {
        let complete = self.state == FramingState::Complete;
        let mut interior = self.buffer;

        let exit_code = match rfind_subslice(&interior, EXIT_PROBE_PREFIX) {
            Some(index) => {
                let code = parse_exit_code(&interior[index + EXIT_PROBE_PREFIX.len()..]);
                interior.truncate(index);
                code
            }
            None => EXIT_CODE_UNKNOWN,
        };

        let text = String::from_utf8_lossy(&interior);
        let output = strip_ansi(&text).trim_matches('\n').to_string();

        FramedOutput {
            exit_code,
            output,
            complete,
        }
    }
}

/// `N__` → `N`; anything else → [`EXIT_CODE_UNKNOWN`].
fn parse_exit_code(bytes: &[u8]) -> i32 {
    let Some(end) = find_subslice(bytes, b"__") else {
        return EXIT_CODE_UNKNOWN;
    };
    std::str::from_utf8(&bytes[..end])
        .ok()
        .and_then(|digits| digits.trim().parse().ok())
        .unwrap_or(EXIT_CODE_UNKNOWN)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn rfind_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinels() -> SentinelPair {
        SentinelPair::with_nonce(0xdead_beef)
    }

    fn feed(framing: &mut CommandFraming, text: &str) -> FramingState {
        framing.push(text.as_bytes())
    }

    #[test]
    fn wrapped_command_line_does_not_contain_contiguous_markers() {
        let pair = sentinels();
        let line = pair.wrap_command("ls -la");
        assert!(!line.contains(&pair.start_marker()));
        assert!(!line.contains(&pair.end_marker()));
        assert!(line.contains("ls -la"));
    }

    #[test]
    fn happy_path_extracts_output_and_exit_code() {
        let pair = sentinels();
        let mut framing = CommandFraming::new(&pair);
        let stream = format!(
            "echo \"__WARDEN\"\"_BEGIN_deadbeef__\"; true\r\n{start}\r\nhello\r\nworld\r\n__WARDEN_EXIT_0__\r\n{end}\r\n",
            start = pair.start_marker(),
            end = pair.end_marker(),
        );
        assert_eq!(feed(&mut framing, &stream), FramingState::Complete);
        let result = framing.finish();
        assert!(result.complete);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "hello\nworld");
    }

    #[test]
    fn echoed_command_line_is_discarded() {
        let pair = sentinels();
        let mut framing = CommandFraming::new(&pair);
        // The typed line echoes with quote characters intact, so it must not
        // trip the start detector.
        feed(&mut framing, "$ echo \"__WARDEN\"\"_BEGIN_deadbeef__\"; ls\r\n");
        assert_eq!(framing.state(), FramingState::AwaitingStart);
        feed(&mut framing, &format!("{}\r\n", pair.start_marker()));
        assert_eq!(framing.state(), FramingState::AwaitingEnd);
    }

    #[test]
    fn markers_split_across_chunk_boundaries() {
        let pair = sentinels();
        let mut framing = CommandFraming::new(&pair);
        let start = pair.start_marker();
        let (head, tail) = start.split_at(7);
        feed(&mut framing, head);
        assert_eq!(framing.state(), FramingState::AwaitingStart);
        feed(&mut framing, tail);
        assert_eq!(framing.state(), FramingState::AwaitingEnd);

        feed(&mut framing, "out");
        let end = pair.end_marker();
        let (end_head, end_tail) = end.split_at(4);
        feed(&mut framing, end_head);
        assert_eq!(framing.state(), FramingState::AwaitingEnd);
        feed(&mut framing, end_tail);
        assert_eq!(framing.state(), FramingState::Complete);
    }

    #[test]
    fn nonzero_exit_code_parses() {
        let pair = sentinels();
        let mut framing = CommandFraming::new(&pair);
        let stream = format!(
            "{}\r\n__WARDEN_EXIT_42__\r\n{}\r\n",
            pair.start_marker(),
            pair.end_marker()
        );
        feed(&mut framing, &stream);
        let result = framing.finish();
        assert_eq!(result.exit_code, 42);
        assert_eq!(result.output, "");
    }

    #[test]
    fn missing_end_marker_yields_partial_result() {
        let pair = sentinels();
        let mut framing = CommandFraming::new(&pair);
        feed(
            &mut framing,
            &format!("{}\r\npartial output", pair.start_marker()),
        );
        assert_eq!(framing.state(), FramingState::AwaitingEnd);
        let result = framing.finish();
        assert!(!result.complete);
        assert_eq!(result.exit_code, EXIT_CODE_UNKNOWN);
        assert_eq!(result.output, "partial output");
    }

    #[test]
    fn garbage_exit_code_defaults_to_unknown() {
        let pair = sentinels();
        let mut framing = CommandFraming::new(&pair);
        let stream = format!(
            "{}\r\nout\r\n__WARDEN_EXIT_oops__\r\n{}\r\n",
            pair.start_marker(),
            pair.end_marker()
        );
        feed(&mut framing, &stream);
        let result = framing.finish();
        assert_eq!(result.exit_code, EXIT_CODE_UNKNOWN);
    }

    #[test]
    fn command_output_mentioning_probe_prefix_is_not_confused() {
        // The probe printed by the wrapper is the last occurrence before the
        // end marker, so output that mentions the prefix earlier is kept.
        let pair = sentinels();
        let mut framing = CommandFraming::new(&pair);
        let stream = format!(
            "{}\r\nlogged __WARDEN_EXIT_99__ marker\r\n__WARDEN_EXIT_7__\r\n{}\r\n",
            pair.start_marker(),
            pair.end_marker()
        );
        feed(&mut framing, &stream);
        let result = framing.finish();
        assert_eq!(result.exit_code, 7);
        assert!(result.output.contains("logged"));
    }

    #[test]
    fn ansi_escapes_stripped_from_output() {
        let pair = sentinels();
        let mut framing = CommandFraming::new(&pair);
        let stream = format!(
            "{}\r\n\x1b[32mgreen\x1b[0m\r\n__WARDEN_EXIT_0__\r\n{}\r\n",
            pair.start_marker(),
            pair.end_marker()
        );
        feed(&mut framing, &stream);
        assert_eq!(framing.finish().output, "green");
    }
}
