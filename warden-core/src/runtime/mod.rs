//! Runtime interface and per-session lifecycle management.
//!
//! A [`Runtime`] owns exactly one isolated execution context (a workspace
//! directory or a container) for one session. `execute_action` is the
//! boundary past which nothing throws: every handler failure is converted
//! into an error [`Observation`]. Only `start`/`stop` surface
//! [`RuntimeError`] — those are infrastructure operations, not agent-facing.

mod container;
mod local;
mod manager;

pub use container::ContainerRuntime;
pub use local::LocalRuntime;
pub use manager::RuntimeManager;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::config::RuntimeKind;
use crate::events::{Action, FileEntry, Observation, SearchMatch};
use crate::events::observation::CommandOutcome;
use crate::error::RuntimeError;

/// Snapshot of a runtime's lifecycle state.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub runtime_kind: RuntimeKind,
    pub session_id: Option<String>,
    pub is_running: bool,
    pub container_id: Option<String>,
    pub workspace_dir: String,
}

/// One isolated execution context for one session.
///
/// Implementations provide the primitives; `execute_action` dispatches on
/// the Action variant in one exhaustive match, so adding a variant is a
/// compile error until every runtime handles it.
#[async_trait]
pub trait Runtime: Send {
    /// Bring up the execution context. Infrastructure failures propagate.
    async fn start(&mut self, session_id: &str) -> Result<(), RuntimeError>;

    /// Tear down the execution context, reaping background processes.
    /// Idempotent.
    async fn stop(&mut self) -> Result<(), RuntimeError>;

    fn status(&self) -> RuntimeStatus;

    /// Run a foreground command to completion (or timeout).
    async fn run_command(
        &mut self,
        command: &str,
        working_dir: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutcome>;

    /// Spawn a command without waiting; returns an opaque process id
    /// registered in the session's background registry.
    async fn run_background(&mut self, command: &str, working_dir: Option<&str>) -> Result<u32>;

    /// Kill a registered background process and drop it from the registry.
    async fn kill_process(&mut self, process_id: u32) -> Result<()>;

    async fn read_file(&self, path: &str) -> Result<String>;

    /// Returns the number of bytes written.
    async fn write_file(&mut self, path: &str, content: &str) -> Result<u64>;

    async fn edit_file(&mut self, path: &str, old_str: &str, new_str: &str) -> Result<()>;

    async fn delete_path(&mut self, path: &str) -> Result<()>;

    async fn create_directory(&mut self, path: &str) -> Result<()>;

    async fn list_files(&self, path: &str) -> Result<Vec<FileEntry>>;

    async fn search(
        &self,
        query: &str,
        path: Option<&str>,
        file_pattern: Option<&str>,
        case_sensitive: bool,
    ) -> Result<Vec<SearchMatch>>;

    /// Execute one action. Never fails: handler errors become error
    /// observations with `success == false`.
    async fn execute_action(&mut self, action: Action) -> Observation {
        match action {
            Action::Run {
                command,
                working_dir,
                timeout_secs,
                background,
            } => {
                if background {
                    match self.run_background(&command, working_dir.as_deref()).await {
                        Ok(pid) => Observation::success_message(format!(
                            "Background process started: {command} (pid {pid})"
                        )),
                        Err(err) => Observation::error(err.to_string()),
                    }
                } else {
                    let timeout = timeout_secs.map(Duration::from_secs);
                    match self
                        .run_command(&command, working_dir.as_deref(), timeout)
                        .await
                    {
                        Ok(outcome) => outcome.into(),
                        Err(err) => Observation::error(err.to_string()),
                    }
                }
            }
            Action::Write { path, content } => {
                match self.write_file(&path, &content).await {
                    Ok(size) => Observation::file_written(path, size),
                    Err(err) => Observation::error(err.to_string()),
                }
            }
            Action::Read {
                path,
                start_line,
                end_line,
            } => match self.read_file(&path).await {
                Ok(content) => {
                    let content = slice_lines(&content, start_line, end_line);
                    Observation::file_read(path, content)
                }
                Err(err) => Observation::error(err.to_string()),
            },
            Action::Edit {
                path,
                old_str,
                new_str,
            } => match self.edit_file(&path, &old_str, &new_str).await {
                Ok(()) => Observation::file_edited(path),
                Err(err) => Observation::error(err.to_string()),
            },
            Action::Delete { path } => match self.delete_path(&path).await {
                Ok(()) => Observation::success_message(format!("Deleted {path}")),
                Err(err) => Observation::error(err.to_string()),
            },
            Action::CreateDirectory { path } => match self.create_directory(&path).await {
                Ok(()) => Observation::success_message(format!("Created directory {path}")),
                Err(err) => Observation::error(err.to_string()),
            },
            Action::Search {
                query,
                path,
                file_pattern,
                case_sensitive,
            } => {
                match self
                    .search(&query, path.as_deref(), file_pattern.as_deref(), case_sensitive)
                    .await
                {
                    Ok(matches) => Observation::search_result(query, matches),
                    Err(err) => Observation::error(err.to_string()),
                }
            }
            Action::Kill { process_id } => match self.kill_process(process_id).await {
                Ok(()) => Observation::success_message(format!("Killed process {process_id}")),
                Err(err) => Observation::error(err.to_string()),
            },
        }
    }
}

/// Apply an optional 1-indexed inclusive line range to file content.
pub(crate) fn slice_lines(
    content: &str,
    start_line: Option<usize>,
    end_line: Option<usize>,
) -> String {
    if start_line.is_none() && end_line.is_none() {
        return content.to_string();
    }
    let lines: Vec<&str> = content.lines().collect();
    let start = start_line.unwrap_or(1).saturating_sub(1).min(lines.len());
    let end = end_line.unwrap_or(lines.len()).min(lines.len());
    lines[start..end.max(start)].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_lines_ranges() {
        let text = "a\nb\nc\nd";
        assert_eq!(slice_lines(text, None, None), text);
        assert_eq!(slice_lines(text, Some(2), Some(3)), "b\nc");
        assert_eq!(slice_lines(text, Some(3), None), "c\nd");
        assert_eq!(slice_lines(text, None, Some(1)), "a");
        assert_eq!(slice_lines(text, Some(10), None), "");
    }
}
