//! ANSI escape stripping for terminal output.
//!
//! The shell session reads from a pty, so command output arrives decorated
//! with whatever escape sequences the shell and the command emit. Agents
//! want plain text.

/// Strip ANSI escape sequences, keeping printable text, newlines, and tabs.
pub fn strip_ansi(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == 0x1b {
            i += skip_escape_sequence(&bytes[i..]);
        } else if bytes[i] == b'\n' || bytes[i] == b'\t' {
            output.push(bytes[i]);
            i += 1;
        } else if bytes[i] < 0x20 || bytes[i] == 0x7f {
            // Other control bytes (including \r) are dropped.
            i += 1;
        } else {
            output.push(bytes[i]);
            i += 1;
        }
    }

    // Only ASCII bytes were removed, so multi-byte UTF-8 sequences are intact.
    String::from_utf8(output).unwrap_or_else(|err| {
        String::from_utf8_lossy(err.as_bytes()).into_owned()
    })
}

/// Length of the escape sequence starting at `bytes[0] == ESC`.
fn skip_escape_sequence(bytes: &[u8]) -> usize {
    if bytes.len() < 2 {
        return 1;
    }
    match bytes[1] {
        // CSI: ESC [ ... final byte in 0x40..=0x7e
        b'[' => {
            let mut i = 2;
            while i < bytes.len() && !(0x40..=0x7e).contains(&bytes[i]) {
                i += 1;
            }
            (i + 1).min(bytes.len())
        }
        // OSC: ESC ] ... BEL or ST (ESC \)
        b']' => {
            let mut i = 2;
            while i < bytes.len() {
                if bytes[i] == 0x07 {
                    return i + 1;
                }
                if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'\\') {
                    return i + 2;
                }
                i += 1;
            }
            bytes.len()
        }
        // DCS/PM/APC: ESC P/^/_ ... ST
        b'P' | b'^' | b'_' => {
            let mut i = 2;
            while i < bytes.len() {
                if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'\\') {
                    return i + 2;
                }
                i += 1;
            }
            bytes.len()
        }
        // Two-byte escape, unless ESC precedes a UTF-8 continuation.
        next if next < 0x80 => 2,
        _ => 1,
    }
}
