//! Container runtime: Docker-isolated execution.
//!
//! The container is created with a bind-mounted per-session workspace, a
//! non-root user, dropped capabilities, and `no-new-privileges`. Every
//! primitive — including file I/O — goes through `docker exec` rather than
//! the host bind-mount path, so operations always reflect the container's
//! in-flight filesystem state and the backend can later be swapped for one
//! with no host path at all.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{RuntimeConfig, RuntimeKind};
use crate::error::RuntimeError;
use crate::events::observation::CommandOutcome;
use crate::events::{FileEntry, SearchMatch};
use crate::runtime::{Runtime, RuntimeStatus};
use crate::utils::path::resolve_path;

/// Linux capabilities kept after `--cap-drop ALL`.
const ALLOWED_CAPABILITIES: &[&str] = &["CHOWN", "DAC_OVERRIDE", "FOWNER", "SETGID", "SETUID"];

/// Grace the host waits beyond the in-container `timeout` before killing the
/// exec client itself.
const HOST_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Exit codes coreutils `timeout -s KILL` reports for an expired command.
const TIMEOUT_EXIT_CODES: &[i32] = &[124, 137];

const MAX_SEARCH_MATCHES: usize = 200;

fn quote(text: &str) -> Cow<'_, str> {
    shell_escape::escape(Cow::Borrowed(text))
}

pub struct ContainerRuntime {
    config: RuntimeConfig,
    session_id: Option<String>,
    container_name: Option<String>,
    container_id: Option<String>,
    background: HashMap<u32, String>,
}

impl ContainerRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            session_id: None,
            container_name: None,
            container_id: None,
            background: HashMap::new(),
        }
    }

    fn container_name(&self) -> Result<&str> {
        self.container_name
            .as_deref()
            .ok_or_else(|| anyhow!("runtime not running"))
    }

    /// Lexically confine `raw` to the in-container workspace.
    fn resolve(&self, raw: &str) -> Result<PathBuf> {
        Ok(resolve_path(&self.config.workspace_dir, raw)?)
    }

    async fn docker(args: &[&str]) -> Result<std::process::Output> {
        let output = Command::new("docker")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .context("failed to invoke docker; is the engine installed?")?;
        Ok(output)
    }

    async fn docker_checked(args: &[&str]) -> Result<String> {
        let output = Self::docker(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("docker {} failed: {}", args.first().unwrap_or(&"?"), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run `script` through `sh -c` inside the container.
    async fn exec_script(&self, script: &str, as_root: bool) -> Result<std::process::Output> {
        let name = self.container_name()?;
        let user = if as_root {
            String::from("0:0")
        } else {
            format!("{}:{}", self.config.uid, self.config.gid)
        };
        let mut args: Vec<&str> = vec!["exec", "-u", user.as_str()];
        let env_args: Vec<String> = self
            .config
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        for env in &env_args {
            args.push("-e");
            args.push(env);
        }
        args.extend(["-i", name, "sh", "-c", script]);
        Self::docker(&args).await
    }

    async fn exec_checked(&self, script: &str) -> Result<String> {
        let output = self.exec_script(script, false).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{}", stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn ensure_image(&self) -> Result<()> {
        let image = self.config.container_image.as_str();
        let inspect = Self::docker(&["image", "inspect", image]).await?;
        if inspect.status.success() {
            return Ok(());
        }
        info!(image, "pulling container image");
        Self::docker_checked(&["pull", image]).await?;
        Ok(())
    }

    /// One-time provisioning after the container is up: make the workspace
    /// writable for the sandbox user.
    async fn provision(&self) -> Result<()> {
        let workspace = self.config.workspace_dir.display().to_string();
        let script = format!(
            "mkdir -p {ws} && chown {uid}:{gid} {ws}",
            ws = quote(&workspace),
            uid = self.config.uid,
            gid = self.config.gid,
        );
        let output = self.exec_script(&script, true).await?;
        if !output.status.success() {
            warn!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "workspace provisioning failed; continuing"
            );
        }
        Ok(())
    }

    fn host_workspace_dir(session_id: &str) -> PathBuf {
        std::env::temp_dir().join("warden-workspaces").join(session_id)
    }
}

#[async_trait]
impl Runtime for ContainerRuntime {
    async fn start(&mut self, session_id: &str) -> Result<(), RuntimeError> {
        if self.container_name.is_some() {
            return Ok(());
        }

        let run = async {
            self.ensure_image().await?;

            let name = format!("{}-{}", self.config.container_name_prefix, session_id);
            let host_dir = Self::host_workspace_dir(session_id);
            std::fs::create_dir_all(&host_dir)
                .with_context(|| format!("failed to create {}", host_dir.display()))?;

            let workspace = self.config.workspace_dir.display().to_string();
            let mut args: Vec<String> = vec![
                "run".into(),
                "-d".into(),
                "-i".into(),
                "-t".into(),
                "--rm".into(),
                "--name".into(),
                name.clone(),
                "-v".into(),
                format!("{}:{}:rw", host_dir.display(), workspace),
                "-w".into(),
                workspace.clone(),
                "--user".into(),
                format!("{}:{}", self.config.uid, self.config.gid),
                "--memory".into(),
                self.config.memory_limit.clone(),
                "--cpus".into(),
                self.config.cpu_limit.clone(),
                "--security-opt".into(),
                "no-new-privileges:true".into(),
                "--cap-drop".into(),
                "ALL".into(),
            ];
            for capability in ALLOWED_CAPABILITIES {
                args.push("--cap-add".into());
                args.push((*capability).into());
            }
            if self.config.enable_networking {
                for dns in &self.config.dns_servers {
                    args.push("--dns".into());
                    args.push(dns.clone());
                }
            } else {
                args.push("--network".into());
                args.push("none".into());
            }
            for (key, value) in &self.config.env {
                args.push("-e".into());
                args.push(format!("{key}={value}"));
            }
            args.push(self.config.container_image.clone());
            args.push("sleep".into());
            args.push("infinity".into());

            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            let container_id = Self::docker_checked(&arg_refs).await?.trim().to_string();

            self.session_id = Some(session_id.to_string());
            self.container_name = Some(name.clone());
            self.container_id = Some(container_id);

            self.provision().await?;
            info!(session_id, container = name, "container runtime started");
            Ok::<(), anyhow::Error>(())
        };

        run.await.map_err(RuntimeError::container)
    }

    async fn stop(&mut self) -> Result<(), RuntimeError> {
        let Some(name) = self.container_name.clone() else {
            return Ok(());
        };

        // Best-effort kill of tracked background processes first.
        for (pid, command) in std::mem::take(&mut self.background) {
            let script = format!("kill -9 {pid}");
            if let Err(err) = self.exec_script(&script, false).await {
                warn!(pid, command, error = %err, "failed to kill background process");
            }
        }

        let stop = Self::docker(&["stop", "-t", "10", &name]).await;
        let stopped = matches!(&stop, Ok(output) if output.status.success());
        if !stopped {
            warn!(container = name, "graceful stop failed; force-killing");
            let _ = Self::docker(&["kill", &name]).await;
        }
        // --rm removes the container on stop; nothing is left behind.

        self.container_name = None;
        self.container_id = None;
        info!(session_id = ?self.session_id, "container runtime stopped");
        Ok(())
    }

    fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            runtime_kind: RuntimeKind::Container,
            session_id: self.session_id.clone(),
            is_running: self.container_name.is_some(),
            container_id: self.container_id.clone(),
            workspace_dir: self.config.workspace_dir.display().to_string(),
        }
    }

    async fn run_command(
        &mut self,
        command: &str,
        working_dir: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutcome> {
        let cwd = match working_dir {
            Some(dir) => self.resolve(dir)?,
            None => self.config.workspace_dir.clone(),
        };
        let cwd = cwd.display().to_string();
        let timeout = timeout.unwrap_or(Duration::from_secs(self.config.timeout_secs));

        // `cd && ...` keeps relative-path semantics; coreutils `timeout`
        // kills the in-container process tree, which `docker exec` client
        // timeouts cannot reach.
        let script = format!(
            "cd {dir} && timeout -s KILL {secs} sh -c {cmd}",
            dir = quote(&cwd),
            secs = timeout.as_secs(),
            cmd = quote(command),
        );

        let started = Instant::now();
        let exec = self.exec_script(&script, false);
        let output = match tokio::time::timeout(timeout + HOST_TIMEOUT_MARGIN, exec).await {
            Ok(output) => output?,
            Err(_) => {
                // The exec client wedged past the in-container timeout;
                // nothing more we can learn from it.
                return Ok(CommandOutcome {
                    command: command.to_string(),
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("Command timed out after {} seconds", timeout.as_secs()),
                    working_dir: Some(cwd),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        let mut exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if TIMEOUT_EXIT_CODES.contains(&exit_code) {
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "Command timed out after {} seconds",
                timeout.as_secs()
            ));
            exit_code = -1;
        }

        debug!(command, exit_code, "container command finished");
        Ok(CommandOutcome {
            command: command.to_string(),
            exit_code,
            stdout,
            stderr,
            working_dir: Some(cwd),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn run_background(&mut self, command: &str, working_dir: Option<&str>) -> Result<u32> {
        let cwd = match working_dir {
            Some(dir) => self.resolve(dir)?,
            None => self.config.workspace_dir.clone(),
        };
        let script = format!(
            "cd {dir} && nohup sh -c {cmd} >/dev/null 2>&1 & echo $!",
            dir = quote(&cwd.display().to_string()),
            cmd = quote(command),
        );
        let stdout = self.exec_checked(&script).await?;
        let pid: u32 = stdout
            .trim()
            .parse()
            .map_err(|_| anyhow!("could not determine background pid from: {stdout:?}"))?;
        self.background.insert(pid, command.to_string());
        info!(pid, command, "background process started in container");
        Ok(pid)
    }

    async fn kill_process(&mut self, process_id: u32) -> Result<()> {
        if self.background.remove(&process_id).is_none() {
            bail!("unknown background process: {process_id}");
        }
        let script = format!("kill -9 {process_id}");
        let _ = self.exec_script(&script, false).await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path)?;
        let script = format!("cat {}", quote(&resolved.display().to_string()));
        self.exec_checked(&script)
            .await
            .with_context(|| format!("failed to read file {path}"))
    }

    async fn write_file(&mut self, path: &str, content: &str) -> Result<u64> {
        if !self.config.extension_allowed(path) {
            bail!("file extension not allowed: {path}");
        }
        if content.len() as u64 > self.config.max_file_size {
            bail!(
                "content too large: {} bytes (limit {})",
                content.len(),
                self.config.max_file_size
            );
        }
        let resolved = self.resolve(path)?;
        let parent = resolved
            .parent()
            .unwrap_or(Path::new("/"))
            .display()
            .to_string();
        let name = self.container_name()?;
        let script = format!(
            "mkdir -p {parent} && cat > {path}",
            parent = quote(&parent),
            path = quote(&resolved.display().to_string()),
        );

        // Content streams over the exec channel's stdin: binary-safe and
        // never via the host bind-mount path.
        let user = format!("{}:{}", self.config.uid, self.config.gid);
        let mut child = Command::new("docker")
            .args(["exec", "-i", "-u", user.as_str(), name, "sh", "-c", script.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn docker exec for write")?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("docker exec stdin unavailable"))?;
        stdin.write_all(content.as_bytes()).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            bail!(
                "failed to write file {path}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(content.len() as u64)
    }

    async fn edit_file(&mut self, path: &str, old_str: &str, new_str: &str) -> Result<()> {
        let current = self.read_file(path).await?;
        if !current.contains(old_str) {
            bail!("string not found in {path}: {old_str:?}");
        }
        let updated = current.replacen(old_str, new_str, 1);
        self.write_file(path, &updated).await?;
        Ok(())
    }

    async fn delete_path(&mut self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        let target = resolved.display().to_string();
        let script = format!(
            "test -e {path} && rm -rf {path}",
            path = quote(&target)
        );
        self.exec_checked(&script)
            .await
            .map_err(|_| anyhow!("path not found or not deletable: {path}"))?;
        Ok(())
    }

    async fn create_directory(&mut self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        let script = format!("mkdir -p {}", quote(&resolved.display().to_string()));
        self.exec_checked(&script).await?;
        Ok(())
    }

    async fn list_files(&self, path: &str) -> Result<Vec<FileEntry>> {
        let resolved = self.resolve(path)?;
        let target = resolved.display().to_string();
        let script = format!(
            "find {path} -mindepth 1 -maxdepth 1 -exec stat -c '%n|%s|%Y|%F' {{}} +",
            path = quote(&target)
        );
        let stdout = self
            .exec_checked(&script)
            .await
            .with_context(|| format!("failed to list {path}"))?;

        let workspace = &self.config.workspace_dir;
        let mut entries = Vec::new();
        for line in stdout.lines() {
            let mut parts = line.splitn(4, '|');
            let (Some(full), Some(size), Some(modified), Some(kind)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let full_path = Path::new(full);
            let is_directory = kind == "directory";
            entries.push(FileEntry {
                name: full_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| full.to_string()),
                path: full_path
                    .strip_prefix(workspace)
                    .unwrap_or(full_path)
                    .to_string_lossy()
                    .into_owned(),
                size: if is_directory { 0 } else { size.parse().unwrap_or(0) },
                modified: modified.parse().unwrap_or(0.0),
                is_directory,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn search(
        &self,
        query: &str,
        path: Option<&str>,
        file_pattern: Option<&str>,
        case_sensitive: bool,
    ) -> Result<Vec<SearchMatch>> {
        let base = match path {
            Some(dir) => self.resolve(dir)?,
            None => self.config.workspace_dir.clone(),
        };
        let mut script = String::from("grep -rn -I");
        if !case_sensitive {
            script.push_str(" -i");
        }
        if let Some(pattern) = file_pattern {
            script.push_str(&format!(" --include={}", quote(pattern)));
        }
        script.push_str(&format!(
            " -e {} {}",
            quote(query),
            quote(&base.display().to_string())
        ));

        let output = self.exec_script(&script, false).await?;
        // grep exits 1 on "no matches", which is not an error here.
        if !output.status.success() && output.status.code() != Some(1) {
            bail!(
                "search failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let workspace = &self.config.workspace_dir;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut matches = Vec::new();
        for line in stdout.lines().take(MAX_SEARCH_MATCHES) {
            let mut parts = line.splitn(3, ':');
            let (Some(file), Some(line_no), Some(text)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let Ok(line_no) = line_no.parse() else {
                continue;
            };
            matches.push(SearchMatch {
                file: Path::new(file)
                    .strip_prefix(workspace)
                    .unwrap_or_else(|_| Path::new(file))
                    .to_string_lossy()
                    .into_owned(),
                line: line_no,
                text: text.trim_end().to_string(),
            });
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_paths_resolve_inside_container_root() {
        let runtime = ContainerRuntime::new(RuntimeConfig::default());
        assert_eq!(
            runtime.resolve("src/app.py").unwrap(),
            PathBuf::from("/workspace/src/app.py")
        );
        assert!(runtime.resolve("../../etc/shadow").is_err());
    }

    #[test]
    fn status_before_start_is_stopped() {
        let runtime = ContainerRuntime::new(RuntimeConfig::default());
        let status = runtime.status();
        assert!(!status.is_running);
        assert!(status.container_id.is_none());
    }
}
