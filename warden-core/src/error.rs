//! Infrastructure error taxonomy.
//!
//! Only `start()` and `stop()` surface these; action-level failures are
//! encoded as [`crate::events::Observation`] values with `success == false`
//! and never propagate as errors past `execute_action`.

use std::io;

use thiserror::Error;

/// Fatal failures of the execution environment itself.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Pty allocation, shell spawn, or shell I/O failed.
    #[error("shell session error: {0}")]
    Shell(String),

    /// The container engine could not create, provision, or tear down the
    /// isolated environment.
    #[error("container runtime error: {0}")]
    Container(String),

    /// Session bookkeeping violation (duplicate session, unknown kind).
    #[error("session error: {0}")]
    Session(String),

    /// Workspace directory could not be created or inspected.
    #[error("workspace error: {0}")]
    Workspace(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RuntimeError {
    pub fn shell(err: impl std::fmt::Display) -> Self {
        Self::Shell(err.to_string())
    }

    pub fn container(err: impl std::fmt::Display) -> Self {
        Self::Container(err.to_string())
    }
}
