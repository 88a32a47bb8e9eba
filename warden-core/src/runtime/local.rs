//! Local runtime: direct subprocess execution confined to a workspace
//! directory.
//!
//! The workspace path is the only security boundary here; every file
//! operation goes through [`WorkspaceFs`] and commands run with the
//! workspace as their working directory. Suitable for development and
//! trusted single-tenant deployments — the container runtime is the
//! production path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::config::{RuntimeConfig, RuntimeKind};
use crate::error::RuntimeError;
use crate::events::observation::CommandOutcome;
use crate::events::{FileEntry, SearchMatch};
use crate::runtime::{Runtime, RuntimeStatus};
use crate::utils::path::resolve_path;
use crate::workspace::WorkspaceFs;

/// Output capture cap per stream; the rest is drained and discarded.
const CAPTURE_LIMIT: usize = 256 * 1024;

pub struct LocalRuntime {
    config: RuntimeConfig,
    session_id: Option<String>,
    workspace: Option<WorkspaceFs>,
    background: HashMap<u32, Child>,
}

impl LocalRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            session_id: None,
            workspace: None,
            background: HashMap::new(),
        }
    }

    fn workspace(&self) -> Result<&WorkspaceFs> {
        self.workspace
            .as_ref()
            .ok_or_else(|| anyhow!("runtime not running"))
    }

    fn resolve_working_dir(&self, working_dir: Option<&str>) -> Result<PathBuf> {
        let workspace = self.workspace()?;
        match working_dir {
            Some(dir) => Ok(resolve_path(workspace.root(), dir)?),
            None => Ok(workspace.root().to_path_buf()),
        }
    }

    fn shell_command(&self, command: &str, cwd: &PathBuf) -> Command {
        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .envs(&self.config.env)
            .stdin(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

#[async_trait]
impl Runtime for LocalRuntime {
    async fn start(&mut self, session_id: &str) -> Result<(), RuntimeError> {
        if self.workspace.is_some() {
            return Ok(());
        }
        let root = self.config.workspace_dir.join(session_id);
        let workspace = WorkspaceFs::new(
            root.clone(),
            self.config.max_file_size,
            self.config.allowed_extensions.clone(),
        );
        workspace
            .ensure_root()
            .await
            .map_err(|err| RuntimeError::Session(err.to_string()))?;

        self.session_id = Some(session_id.to_string());
        self.workspace = Some(workspace);
        info!(session_id, workspace = %root.display(), "local runtime started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RuntimeError> {
        for (pid, mut child) in self.background.drain() {
            kill_process_group(&child);
            if let Err(err) = child.start_kill() {
                if err.kind() != std::io::ErrorKind::InvalidInput {
                    warn!(pid, error = %err, "failed to kill background process");
                }
            }
            let _ = child.wait().await;
        }
        if self.workspace.take().is_some() {
            info!(session_id = ?self.session_id, "local runtime stopped");
        }
        Ok(())
    }

    fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            runtime_kind: RuntimeKind::Local,
            session_id: self.session_id.clone(),
            is_running: self.workspace.is_some(),
            container_id: None,
            workspace_dir: self
                .workspace
                .as_ref()
                .map(|workspace| workspace.root().display().to_string())
                .unwrap_or_else(|| self.config.workspace_dir.display().to_string()),
        }
    }

    async fn run_command(
        &mut self,
        command: &str,
        working_dir: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutcome> {
        let cwd = self.resolve_working_dir(working_dir)?;
        let timeout = timeout.unwrap_or(Duration::from_secs(self.config.timeout_secs));
        let started = Instant::now();

        let mut child = self
            .shell_command(command, &cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn: {command}"))?;

        let stdout_task = tokio::spawn(read_capped(child.stdout.take(), CAPTURE_LIMIT));
        let stderr_task = tokio::spawn(read_capped(child.stderr.take(), CAPTURE_LIMIT));

        let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => (status.context("failed to await command")?, false),
            Err(_) => {
                // Kill the whole group, not just the shell, so pipelines and
                // children die with it.
                kill_process_group(&child);
                let _ = child.kill().await;
                let status = child.wait().await.context("failed to reap timed-out command")?;
                (status, true)
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_task.await.context("stdout reader panicked")??)
            .into_owned();
        let mut stderr =
            String::from_utf8_lossy(&stderr_task.await.context("stderr reader panicked")??)
                .into_owned();

        let exit_code = if timed_out {
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "Command timed out after {} seconds",
                timeout.as_secs()
            ));
            -1
        } else {
            status.code().unwrap_or(-1)
        };

        Ok(CommandOutcome {
            command: command.to_string(),
            exit_code,
            stdout,
            stderr,
            working_dir: Some(cwd.display().to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn run_background(&mut self, command: &str, working_dir: Option<&str>) -> Result<u32> {
        let cwd = self.resolve_working_dir(working_dir)?;
        let child = self
            .shell_command(command, &cwd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn background command: {command}"))?;
        let pid = child
            .id()
            .ok_or_else(|| anyhow!("background process exited before pid was known"))?;
        self.background.insert(pid, child);
        info!(pid, command, "background process started");
        Ok(pid)
    }

    async fn kill_process(&mut self, process_id: u32) -> Result<()> {
        let mut child = self
            .background
            .remove(&process_id)
            .ok_or_else(|| anyhow!("unknown background process: {process_id}"))?;
        kill_process_group(&child);
        let _ = child.kill().await;
        let _ = child.wait().await;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        self.workspace()?.read_text(path, None, None).await
    }

    async fn write_file(&mut self, path: &str, content: &str) -> Result<u64> {
        self.workspace()?.write(path, content.as_bytes()).await
    }

    async fn edit_file(&mut self, path: &str, old_str: &str, new_str: &str) -> Result<()> {
        self.workspace()?.edit(path, old_str, new_str).await
    }

    async fn delete_path(&mut self, path: &str) -> Result<()> {
        self.workspace()?.delete(path).await
    }

    async fn create_directory(&mut self, path: &str) -> Result<()> {
        self.workspace()?.create_dir(path).await
    }

    async fn list_files(&self, path: &str) -> Result<Vec<FileEntry>> {
        self.workspace()?.list(path).await
    }

    async fn search(
        &self,
        query: &str,
        path: Option<&str>,
        file_pattern: Option<&str>,
        case_sensitive: bool,
    ) -> Result<Vec<SearchMatch>> {
        self.workspace()?
            .search(query, path, file_pattern, case_sensitive)
            .await
    }
}

impl LocalRuntime {
    /// Convenience used by tests and external file browsers: whether a
    /// workspace-relative path currently exists.
    pub async fn path_exists(&self, path: &str) -> bool {
        match self.workspace() {
            Ok(workspace) => match resolve_path(workspace.root(), path) {
                Ok(resolved) => tokio::fs::metadata(resolved).await.is_ok(),
                Err(_) => false,
            },
            Err(_) => false,
        }
    }
}

async fn read_capped<R>(reader: Option<R>, cap: usize) -> std::io::Result<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut output = Vec::new();
    let mut buffer = [0u8; 4096];
    loop {
        let count = reader.read(&mut buffer).await?;
        if count == 0 {
            break;
        }
        let remaining = cap.saturating_sub(output.len());
        if remaining > 0 {
            output.extend_from_slice(&buffer[..count.min(remaining)]);
        }
        // Keep draining past the cap so the child never blocks on a full pipe.
    }
    Ok(output)
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}
