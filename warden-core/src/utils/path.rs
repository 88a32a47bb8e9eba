//! Workspace path containment.
//!
//! The workspace directory is the only security boundary of the local
//! backend, so every file operation resolves its path through here first.
//! Resolution is purely lexical: no filesystem access, so a path is rejected
//! before anything outside the workspace can be touched.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("path escapes the workspace: {path}")]
pub struct PathEscape {
    pub path: String,
}

/// Resolve `raw` against `workspace`, rejecting any form that would land
/// outside it.
///
/// Relative paths are joined to the workspace root; absolute paths are
/// accepted only when already inside it. `..` components are folded
/// lexically and may never climb past the workspace root.
pub fn resolve_path(workspace: &Path, raw: &str) -> Result<PathBuf, PathEscape> {
    let candidate = Path::new(raw);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        workspace.join(candidate)
    };

    let mut resolved = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Prefix(prefix) => resolved.push(prefix.as_os_str()),
            Component::RootDir => resolved.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::Normal(part) => resolved.push(part),
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(PathEscape { path: raw.into() });
                }
            }
        }
    }

    if resolved.starts_with(workspace) {
        Ok(resolved)
    } else {
        Err(PathEscape { path: raw.into() })
    }
}
