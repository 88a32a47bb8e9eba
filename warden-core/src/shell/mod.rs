//! Interactive shell: pty session and sentinel output framing.

pub mod framing;
pub mod session;

pub use framing::{CommandFraming, FramedOutput, FramingState, SentinelPair, EXIT_CODE_UNKNOWN};
pub use session::ShellSession;
