//! Runtime configuration.
//!
//! A [`RuntimeConfig`] is supplied once at construction and never mutated.
//! Serde defaults let partial configs (e.g. just `{"runtime_kind": "local"}`)
//! deserialize into a fully-populated value.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which isolation backend a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    /// Direct subprocess execution, path-confined to the workspace.
    Local,
    /// Docker container with a bind-mounted workspace volume.
    Container,
}

impl Default for RuntimeKind {
    fn default() -> Self {
        Self::Container
    }
}

/// Immutable configuration for one runtime session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub runtime_kind: RuntimeKind,

    /// Filesystem root all agent-visible file operations are confined to.
    /// For the container backend this is the path inside the container.
    pub workspace_dir: PathBuf,

    /// Default wall-clock timeout for foreground commands, in seconds.
    pub timeout_secs: u64,

    // Container settings
    pub container_image: String,
    pub container_name_prefix: String,
    pub memory_limit: String,
    pub cpu_limit: String,

    // Network settings
    pub enable_networking: bool,
    pub dns_servers: Vec<String>,

    // Security settings
    pub uid: u32,
    pub gid: u32,

    /// Extra environment variables merged into every command.
    pub env: HashMap<String, String>,

    // File system limits
    pub max_file_size: u64,
    pub allowed_extensions: Vec<String>,

    /// Shell used for command execution and the interactive session.
    pub shell: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            runtime_kind: RuntimeKind::default(),
            workspace_dir: PathBuf::from("/workspace"),
            timeout_secs: 300,
            container_image: String::from("python:3.12-slim"),
            container_name_prefix: String::from("warden"),
            memory_limit: String::from("2g"),
            cpu_limit: String::from("1"),
            enable_networking: true,
            dns_servers: vec![String::from("8.8.8.8"), String::from("8.8.4.4")],
            uid: 1000,
            gid: 1000,
            env: HashMap::new(),
            max_file_size: 100 * 1024 * 1024,
            allowed_extensions: [
                ".py", ".js", ".ts", ".html", ".css", ".json", ".md", ".txt", ".sh", ".rs",
                ".toml", ".yaml", ".yml",
            ]
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
            shell: String::from("/bin/bash"),
        }
    }
}

impl RuntimeConfig {
    /// Convenience constructor for a local runtime rooted at `workspace_dir`.
    pub fn local(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_kind: RuntimeKind::Local,
            workspace_dir: workspace_dir.into(),
            ..Self::default()
        }
    }

    /// Whether `path` carries an extension this config allows writes for.
    /// Paths without an extension are always allowed.
    pub fn extension_allowed(&self, path: &str) -> bool {
        match std::path::Path::new(path).extension() {
            Some(ext) => {
                let dotted = format!(".{}", ext.to_string_lossy().to_lowercase());
                self.allowed_extensions.iter().any(|allowed| allowed == &dotted)
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_deserializes_with_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"runtime_kind": "local"}"#).expect("partial config");
        assert_eq!(config.runtime_kind, RuntimeKind::Local);
        assert_eq!(config.workspace_dir, PathBuf::from("/workspace"));
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.memory_limit, "2g");
    }

    #[test]
    fn extension_allow_list() {
        let config = RuntimeConfig::default();
        assert!(config.extension_allowed("src/main.rs"));
        assert!(config.extension_allowed("notes.md"));
        assert!(config.extension_allowed("Makefile"));
        assert!(!config.extension_allowed("payload.exe"));
    }
}
