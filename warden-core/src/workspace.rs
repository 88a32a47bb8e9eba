//! Path-confined filesystem primitives.
//!
//! Shared by the local runtime and the in-sandbox execution server so both
//! enforce the same boundary: every path resolves through
//! [`crate::utils::path::resolve_path`] before the filesystem is touched.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{anyhow, bail, Context, Result};
use glob::Pattern;
use regex::RegexBuilder;
use tracing::debug;
use walkdir::WalkDir;

use crate::events::{FileEntry, SearchMatch};
use crate::utils::path::resolve_path;

/// Results past this cap are dropped; searches are for orientation, not
/// exhaustive indexing.
const MAX_SEARCH_MATCHES: usize = 200;

/// Files larger than this are skipped during content search.
const MAX_SEARCHED_FILE_SIZE: u64 = 4 * 1024 * 1024;

/// Filesystem rooted at one workspace directory.
#[derive(Debug, Clone)]
pub struct WorkspaceFs {
    root: PathBuf,
    max_file_size: u64,
    allowed_extensions: Vec<String>,
}

impl WorkspaceFs {
    pub fn new(root: PathBuf, max_file_size: u64, allowed_extensions: Vec<String>) -> Self {
        Self {
            root,
            max_file_size,
            allowed_extensions,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the workspace root if it does not exist yet.
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create workspace {}", self.root.display()))
    }

    fn resolve(&self, raw: &str) -> Result<PathBuf> {
        Ok(resolve_path(&self.root, raw)?)
    }

    fn extension_allowed(&self, path: &str) -> bool {
        match Path::new(path).extension() {
            Some(ext) => {
                let dotted = format!(".{}", ext.to_string_lossy().to_lowercase());
                self.allowed_extensions.iter().any(|allowed| allowed == &dotted)
            }
            None => true,
        }
    }

    /// Read raw bytes, refusing directories and oversized files.
    pub async fn read_bytes(&self, raw: &str) -> Result<Vec<u8>> {
        let path = self.resolve(raw)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("file not found: {raw}"))?;
        if metadata.is_dir() {
            bail!("path is a directory: {raw}");
        }
        if metadata.len() > self.max_file_size {
            bail!(
                "file too large: {} bytes (limit {})",
                metadata.len(),
                self.max_file_size
            );
        }
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {raw}"))
    }

    /// Read text, optionally restricted to a 1-indexed inclusive line range.
    /// Non-UTF-8 content decodes lossily.
    pub async fn read_text(
        &self,
        raw: &str,
        start_line: Option<usize>,
        end_line: Option<usize>,
    ) -> Result<String> {
        let bytes = self.read_bytes(raw).await?;
        let content = String::from_utf8_lossy(&bytes).into_owned();

        if start_line.is_none() && end_line.is_none() {
            return Ok(content);
        }
        let lines: Vec<&str> = content.lines().collect();
        let start = start_line.unwrap_or(1).saturating_sub(1).min(lines.len());
        let end = end_line.unwrap_or(lines.len()).min(lines.len());
        Ok(lines[start..end.max(start)].join("\n"))
    }

    /// Write bytes, enforcing the extension allow-list and the size limit
    /// before touching disk. Parent directories are created as needed.
    pub async fn write(&self, raw: &str, content: &[u8]) -> Result<u64> {
        if !self.extension_allowed(raw) {
            bail!("file extension not allowed: {raw}");
        }
        if content.len() as u64 > self.max_file_size {
            bail!(
                "content too large: {} bytes (limit {})",
                content.len(),
                self.max_file_size
            );
        }
        let path = self.resolve(raw)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create parent directories for {raw}"))?;
        }
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("failed to write {raw}"))?;
        debug!(path = raw, bytes = content.len(), "wrote file");
        Ok(content.len() as u64)
    }

    /// Replace the first occurrence of `old_str`. Absence is an error and
    /// the file is left untouched.
    pub async fn edit(&self, raw: &str, old_str: &str, new_str: &str) -> Result<()> {
        let current = self.read_text(raw, None, None).await?;
        if !current.contains(old_str) {
            bail!("string not found in {raw}: {old_str:?}");
        }
        let updated = current.replacen(old_str, new_str, 1);
        let path = self.resolve(raw)?;
        tokio::fs::write(&path, updated)
            .await
            .with_context(|| format!("failed to write edited {raw}"))?;
        Ok(())
    }

    /// Delete a file or directory tree.
    pub async fn delete(&self, raw: &str) -> Result<()> {
        let path = self.resolve(raw)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("path not found: {raw}"))?;
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        }
        .with_context(|| format!("failed to delete {raw}"))
    }

    pub async fn create_dir(&self, raw: &str) -> Result<()> {
        let path = self.resolve(raw)?;
        tokio::fs::create_dir_all(&path)
            .await
            .with_context(|| format!("failed to create directory {raw}"))
    }

    /// Non-recursive listing of one directory.
    pub async fn list(&self, raw: &str) -> Result<Vec<FileEntry>> {
        let path = self.resolve(raw)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("directory not found: {raw}"))?;
        if !metadata.is_dir() {
            bail!("path is not a directory: {raw}");
        }

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&path)
            .await
            .with_context(|| format!("failed to list {raw}"))?;
        while let Some(entry) = reader.next_entry().await? {
            let entry_path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            let modified = metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|duration| duration.as_secs_f64())
                .unwrap_or(0.0);
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry_path
                    .strip_prefix(&self.root)
                    .unwrap_or(&entry_path)
                    .to_string_lossy()
                    .into_owned(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modified,
                is_directory: metadata.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Regex content search under `raw` (workspace root when `None`).
    ///
    /// Hidden directories, binary files, and files over
    /// [`MAX_SEARCHED_FILE_SIZE`] are skipped.
    pub async fn search(
        &self,
        query: &str,
        raw: Option<&str>,
        file_pattern: Option<&str>,
        case_sensitive: bool,
    ) -> Result<Vec<SearchMatch>> {
        let base = self.resolve(raw.unwrap_or("."))?;
        let regex = RegexBuilder::new(query)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|err| anyhow!("invalid search pattern: {err}"))?;
        let pattern = match file_pattern {
            Some(pattern) => {
                Some(Pattern::new(pattern).map_err(|err| anyhow!("invalid file pattern: {err}"))?)
            }
            None => None,
        };
        let root = self.root.clone();

        // walkdir is synchronous; hop off the async runtime for the scan.
        tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            let walker = WalkDir::new(&base).into_iter().filter_entry(|entry| {
                entry.depth() == 0
                    || !entry
                        .file_name()
                        .to_string_lossy()
                        .starts_with('.')
            });
            for entry in walker.filter_map(|entry| entry.ok()) {
                if matches.len() >= MAX_SEARCH_MATCHES {
                    break;
                }
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                if let Some(ref pattern) = pattern {
                    if !pattern.matches(&name) {
                        continue;
                    }
                }
                if entry
                    .metadata()
                    .map(|metadata| metadata.len() > MAX_SEARCHED_FILE_SIZE)
                    .unwrap_or(true)
                {
                    continue;
                }
                let bytes = match std::fs::read(entry.path()) {
                    Ok(bytes) => bytes,
                    Err(_) => continue,
                };
                if bytes.iter().take(1024).any(|&byte| byte == 0) {
                    continue;
                }
                let text = String::from_utf8_lossy(&bytes);
                let file = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .into_owned();
                for (index, line) in text.lines().enumerate() {
                    if regex.is_match(line) {
                        matches.push(SearchMatch {
                            file: file.clone(),
                            line: index + 1,
                            text: line.trim_end().to_string(),
                        });
                        if matches.len() >= MAX_SEARCH_MATCHES {
                            break;
                        }
                    }
                }
            }
            Ok(matches)
        })
        .await
        .context("search task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fs_at(dir: &TempDir) -> WorkspaceFs {
        WorkspaceFs::new(
            dir.path().to_path_buf(),
            1024 * 1024,
            vec![".txt".into(), ".rs".into()],
        )
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let fs = fs_at(&dir);
        fs.write("notes.txt", b"hello").await.unwrap();
        assert_eq!(fs.read_text("notes.txt", None, None).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn write_rejects_disallowed_extension() {
        let dir = TempDir::new().unwrap();
        let fs = fs_at(&dir);
        let err = fs.write("tool.exe", b"MZ").await.unwrap_err();
        assert!(err.to_string().contains("extension not allowed"));
        assert!(!dir.path().join("tool.exe").exists());
    }

    #[tokio::test]
    async fn write_rejects_oversized_content() {
        let dir = TempDir::new().unwrap();
        let fs = WorkspaceFs::new(dir.path().to_path_buf(), 4, vec![]);
        let err = fs.write("big", b"12345").await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn escape_attempts_leave_outside_untouched() {
        let dir = TempDir::new().unwrap();
        let fs = fs_at(&dir);
        assert!(fs.write("../../escape.txt", b"no").await.is_err());
        assert!(fs.read_text("../../../etc/passwd", None, None).await.is_err());
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn line_range_reads_are_one_indexed_inclusive() {
        let dir = TempDir::new().unwrap();
        let fs = fs_at(&dir);
        fs.write("lines.txt", b"one\ntwo\nthree\nfour").await.unwrap();
        let middle = fs.read_text("lines.txt", Some(2), Some(3)).await.unwrap();
        assert_eq!(middle, "two\nthree");
        let tail = fs.read_text("lines.txt", Some(3), None).await.unwrap();
        assert_eq!(tail, "three\nfour");
    }

    #[tokio::test]
    async fn edit_requires_unique_needle_presence() {
        let dir = TempDir::new().unwrap();
        let fs = fs_at(&dir);
        fs.write("code.rs", b"fn main() {}").await.unwrap();
        fs.edit("code.rs", "main", "start").await.unwrap();
        assert_eq!(
            fs.read_text("code.rs", None, None).await.unwrap(),
            "fn start() {}"
        );
        assert!(fs.edit("code.rs", "missing", "x").await.is_err());
    }

    #[tokio::test]
    async fn list_reports_directories_and_sizes() {
        let dir = TempDir::new().unwrap();
        let fs = fs_at(&dir);
        fs.write("a.txt", b"abc").await.unwrap();
        fs.create_dir("sub").await.unwrap();
        let entries = fs.list(".").await.unwrap();
        assert_eq!(entries.len(), 2);
        let file = entries.iter().find(|entry| entry.name == "a.txt").unwrap();
        assert_eq!(file.size, 3);
        assert!(!file.is_directory);
        let sub = entries.iter().find(|entry| entry.name == "sub").unwrap();
        assert!(sub.is_directory);
    }

    #[tokio::test]
    async fn search_finds_lines_and_honors_case() {
        let dir = TempDir::new().unwrap();
        let fs = fs_at(&dir);
        fs.write("a.txt", b"Alpha\nbeta\nALPHA beta").await.unwrap();
        let insensitive = fs.search("alpha", None, None, false).await.unwrap();
        assert_eq!(insensitive.len(), 2);
        let sensitive = fs.search("Alpha", None, None, true).await.unwrap();
        assert_eq!(sensitive.len(), 1);
        assert_eq!(sensitive[0].line, 1);
    }
}
