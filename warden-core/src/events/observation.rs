//! Structured results of executing an Action.

use serde::{Deserialize, Serialize};

/// One entry from a directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub modified: f64,
    pub is_directory: bool,
}

/// One line hit from a content search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub file: String,
    pub line: usize,
    pub text: String,
}

/// The terminal result of executing an [`crate::events::Action`].
///
/// Every variant carries `success` and textual `content`; type-specific
/// fields ride alongside. Wire shape:
/// `{"observation_type": "command_result" | ..., "success": bool,
///   "content": "...", ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "observation_type", rename_all = "snake_case")]
pub enum Observation {
    CommandResult {
        success: bool,
        /// Combined output as the agent should see it.
        content: String,
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<String>,
        duration_ms: u64,
    },

    FileRead {
        success: bool,
        /// The file content.
        content: String,
        path: String,
        size: u64,
    },

    FileWritten {
        success: bool,
        content: String,
        path: String,
        size: u64,
    },

    FileEdited {
        success: bool,
        content: String,
        path: String,
    },

    SearchResult {
        success: bool,
        content: String,
        query: String,
        matches: Vec<SearchMatch>,
        total: usize,
    },

    Error {
        success: bool,
        /// Human-readable failure description.
        content: String,
    },

    Success {
        success: bool,
        content: String,
    },

    Null {
        success: bool,
        content: String,
    },
}

impl Observation {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            success: false,
            content: message.into(),
        }
    }

    pub fn success_message(message: impl Into<String>) -> Self {
        Self::Success {
            success: true,
            content: message.into(),
        }
    }

    pub fn null() -> Self {
        Self::Null {
            success: true,
            content: String::from("No action taken"),
        }
    }

    pub fn file_read(path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self::FileRead {
            success: true,
            size: content.len() as u64,
            content,
            path: path.into(),
        }
    }

    pub fn file_written(path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        Self::FileWritten {
            success: true,
            content: format!("Wrote {size} bytes to {path}"),
            path,
            size,
        }
    }

    pub fn file_edited(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::FileEdited {
            success: true,
            content: format!("Edited {path}"),
            path,
        }
    }

    pub fn search_result(query: impl Into<String>, matches: Vec<SearchMatch>) -> Self {
        let total = matches.len();
        Self::SearchResult {
            success: true,
            content: format!("{total} match(es)"),
            query: query.into(),
            matches,
            total,
        }
    }

    /// Whether the underlying operation succeeded.
    pub fn success(&self) -> bool {
        match self {
            Self::CommandResult { success, .. }
            | Self::FileRead { success, .. }
            | Self::FileWritten { success, .. }
            | Self::FileEdited { success, .. }
            | Self::SearchResult { success, .. }
            | Self::Error { success, .. }
            | Self::Success { success, .. }
            | Self::Null { success, .. } => *success,
        }
    }

    /// The textual payload every observation carries.
    pub fn content(&self) -> &str {
        match self {
            Self::CommandResult { content, .. }
            | Self::FileRead { content, .. }
            | Self::FileWritten { content, .. }
            | Self::FileEdited { content, .. }
            | Self::SearchResult { content, .. }
            | Self::Error { content, .. }
            | Self::Success { content, .. }
            | Self::Null { content, .. } => content,
        }
    }

    /// The wire discriminator for this variant.
    pub fn observation_type(&self) -> &'static str {
        match self {
            Self::CommandResult { .. } => "command_result",
            Self::FileRead { .. } => "file_read",
            Self::FileWritten { .. } => "file_written",
            Self::FileEdited { .. } => "file_edited",
            Self::SearchResult { .. } => "search_result",
            Self::Error { .. } => "error",
            Self::Success { .. } => "success",
            Self::Null { .. } => "null",
        }
    }
}

/// Builder for `command_result` observations so call sites stay readable.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub working_dir: Option<String>,
    pub duration_ms: u64,
}

impl From<CommandOutcome> for Observation {
    fn from(outcome: CommandOutcome) -> Self {
        let content = if outcome.stderr.is_empty() {
            outcome.stdout.clone()
        } else if outcome.stdout.is_empty() {
            outcome.stderr.clone()
        } else {
            format!("{}\n{}", outcome.stdout, outcome.stderr)
        };
        Observation::CommandResult {
            success: outcome.exit_code == 0,
            content,
            command: outcome.command,
            exit_code: outcome.exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            working_dir: outcome.working_dir,
            duration_ms: outcome.duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_carries_failure_flag() {
        let obs = Observation::error("file not found");
        assert!(!obs.success());
        assert_eq!(obs.content(), "file not found");
        assert_eq!(obs.observation_type(), "error");
    }

    #[test]
    fn command_outcome_success_follows_exit_code() {
        let ok: Observation = CommandOutcome {
            command: "true".into(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            working_dir: None,
            duration_ms: 3,
        }
        .into();
        assert!(ok.success());

        let failed: Observation = CommandOutcome {
            command: "false".into(),
            exit_code: 1,
            stdout: String::new(),
            stderr: String::new(),
            working_dir: None,
            duration_ms: 2,
        }
        .into();
        assert!(!failed.success());
    }

    #[test]
    fn wire_shape_includes_discriminator_and_common_fields() {
        let obs = Observation::file_written("a.txt", 12);
        let value = serde_json::to_value(&obs).expect("encode");
        assert_eq!(value["observation_type"], "file_written");
        assert_eq!(value["success"], true);
        assert!(value["content"].is_string());
        assert_eq!(value["size"], 12);
    }
}
