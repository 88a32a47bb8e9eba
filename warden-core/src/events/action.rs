//! Structured requests for one sandboxed operation.

use serde::{Deserialize, Serialize};

/// One operation for a runtime to execute.
///
/// Wire shape: `{"action_type": "run" | "write" | ..., ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum Action {
    /// Execute a shell command.
    Run {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
        /// Spawn without waiting; the observation carries the pid.
        #[serde(default)]
        background: bool,
    },

    /// Write `content` to a file, creating parent directories as needed.
    Write { path: String, content: String },

    /// Read a file, optionally restricted to a 1-indexed inclusive line range.
    Read {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_line: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_line: Option<usize>,
    },

    /// Replace the first occurrence of `old_str` with `new_str`.
    Edit {
        path: String,
        old_str: String,
        new_str: String,
    },

    /// Delete a file or directory (recursively).
    Delete { path: String },

    /// Create a directory, including parents.
    CreateDirectory { path: String },

    /// Regex content search under `path` (workspace root when omitted).
    Search {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_pattern: Option<String>,
        #[serde(default)]
        case_sensitive: bool,
    },

    /// Kill a background process previously started with `Run`.
    Kill { process_id: u32 },
}

impl Action {
    /// Shorthand for a foreground `Run` with default working dir and timeout.
    pub fn run(command: impl Into<String>) -> Self {
        Self::Run {
            command: command.into(),
            working_dir: None,
            timeout_secs: None,
            background: false,
        }
    }

    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Write {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn read(path: impl Into<String>) -> Self {
        Self::Read {
            path: path.into(),
            start_line: None,
            end_line: None,
        }
    }

    /// The wire discriminator for this variant.
    pub fn action_type(&self) -> &'static str {
        match self {
            Self::Run { .. } => "run",
            Self::Write { .. } => "write",
            Self::Read { .. } => "read",
            Self::Edit { .. } => "edit",
            Self::Delete { .. } => "delete",
            Self::CreateDirectory { .. } => "create_directory",
            Self::Search { .. } => "search",
            Self::Kill { .. } => "kill",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_decodes_with_defaults() {
        let action: Action =
            serde_json::from_value(json!({"action_type": "run", "command": "ls"}))
                .expect("decode run");
        match action {
            Action::Run {
                command,
                working_dir,
                timeout_secs,
                background,
            } => {
                assert_eq!(command, "ls");
                assert!(working_dir.is_none());
                assert!(timeout_secs.is_none());
                assert!(!background);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn discriminator_selects_decode_shape() {
        let action: Action = serde_json::from_value(json!({
            "action_type": "edit",
            "path": "src/main.rs",
            "old_str": "foo",
            "new_str": "bar",
        }))
        .expect("decode edit");
        assert_eq!(action.action_type(), "edit");
    }

    #[test]
    fn unknown_discriminator_is_rejected() {
        let result: Result<Action, _> =
            serde_json::from_value(json!({"action_type": "teleport", "path": "x"}));
        assert!(result.is_err());
    }
}
