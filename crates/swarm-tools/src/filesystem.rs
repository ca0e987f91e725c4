//! Filesystem-class tools (§4.4): `read_file`/`list_directory` (Filesystem
//! read) and `write_file` (Filesystem write).

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;

use swarm_core::{
    Error, PropertySchema, Tool, ToolClass, ToolContext, ToolDefinition, ToolOutput,
    ToolParameters, ToolPolicy,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_BYTE_CAP: usize = 1_000_000;
const DEFAULT_WRITE_QUOTA: usize = 10_000_000;

/// Allowed-roots set and per-operation caps shared by every filesystem tool
/// (§4.4: "path must resolve under a configured allowed-roots set; deny on
/// symlink escape").
#[derive(Clone)]
pub struct FileSystemConfig {
    pub roots: Vec<PathBuf>,
    pub read_byte_cap: usize,
    pub write_quota: usize,
}

impl FileSystemConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            roots: vec![root.into()],
            read_byte_cap: DEFAULT_READ_BYTE_CAP,
            write_quota: DEFAULT_WRITE_QUOTA,
        }
    }

    pub fn with_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.roots = roots;
        self
    }

    pub fn with_read_byte_cap(mut self, cap: usize) -> Self {
        self.read_byte_cap = cap;
        self
    }

    pub fn with_write_quota(mut self, quota: usize) -> Self {
        self.write_quota = quota;
        self
    }

    /// Resolve `path` against the allowed roots and canonicalize it,
    /// rejecting anything that escapes every configured root (including
    /// via a symlink — canonicalization follows symlinks, so an escape
    /// shows up as a canonical path outside all roots).
    fn resolve_existing(&self, path: &str) -> Result<PathBuf, Error> {
        let candidate = self.join_under_any_root(path)?;
        let canonical = candidate
            .canonicalize()
            .map_err(|e| Error::tool("filesystem", format!("cannot resolve '{path}': {e}")))?;
        self.require_under_a_root(&canonical, path)?;
        Ok(canonical)
    }

    /// Resolve a path that may not exist yet (for writes): canonicalize
    /// the parent directory and rejoin, so a not-yet-created file still
    /// gets the symlink-escape check applied to the directory it would
    /// land in.
    fn resolve_for_creation(&self, path: &str) -> Result<PathBuf, Error> {
        let candidate = self.join_under_any_root(path)?;
        let parent = candidate
            .parent()
            .ok_or_else(|| Error::policy_denied(format!("'{path}' has no parent directory")))?;
        let canonical_parent = parent
            .canonicalize()
            .map_err(|e| Error::tool("filesystem", format!("cannot resolve parent of '{path}': {e}")))?;
        self.require_under_a_root(&canonical_parent, path)?;
        Ok(canonical_parent.join(
            candidate
                .file_name()
                .ok_or_else(|| Error::policy_denied(format!("'{path}' has no file name")))?,
        ))
    }

    fn join_under_any_root(&self, path: &str) -> Result<PathBuf, Error> {
        let requested = Path::new(path);
        if requested.is_absolute() {
            return Ok(requested.to_path_buf());
        }
        self.roots
            .first()
            .map(|root| root.join(requested))
            .ok_or_else(|| Error::policy_denied("no allowed roots configured"))
    }

    fn require_under_a_root(&self, canonical: &Path, original: &str) -> Result<(), Error> {
        let ok = self.roots.iter().any(|root| {
            root.canonicalize()
                .map(|canonical_root| canonical.starts_with(canonical_root))
                .unwrap_or(false)
        });
        if ok {
            Ok(())
        } else {
            Err(Error::policy_denied(format!(
                "'{original}' resolves outside the allowed roots"
            )))
        }
    }
}

// =============================================================================
// read_file
// =============================================================================

pub struct ReadFileTool {
    config: FileSystemConfig,
}

impl ReadFileTool {
    pub fn new(config: FileSystemConfig) -> Self {
        Self { config }
    }
}

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file under an allowed root."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new().add_property("path", PropertySchema::string("Path to the file"), true),
        )
    }

    fn policy(&self) -> ToolPolicy {
        ToolPolicy::new(ToolClass::FilesystemRead, DEFAULT_TIMEOUT).with_byte_cap(self.config.read_byte_cap)
    }

    async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput, Error> {
        let args: ReadFileArgs =
            serde_json::from_value(arguments).map_err(|e| Error::tool("read_file", format!("invalid arguments: {e}")))?;

        let path = self.config.resolve_existing(&args.path)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| Error::tool("read_file", format!("failed to stat '{}': {e}", args.path)))?;
        if metadata.len() as usize > self.config.read_byte_cap {
            return Err(Error::policy_denied(format!(
                "'{}' is {} bytes, exceeds the {}-byte read cap",
                args.path,
                metadata.len(),
                self.config.read_byte_cap
            )));
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| Error::tool("read_file", format!("failed to read '{}': {e}", args.path)))?;
        Ok(ToolOutput::success(content))
    }
}

// =============================================================================
// list_directory
// =============================================================================

pub struct ListDirectoryTool {
    config: FileSystemConfig,
}

impl ListDirectoryTool {
    pub fn new(config: FileSystemConfig) -> Self {
        Self { config }
    }
}

#[derive(Deserialize, Default)]
struct ListDirectoryArgs {
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List entries of a directory under an allowed root."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new().add_property(
                "path",
                PropertySchema::string("Directory to list (defaults to the first allowed root)"),
                false,
            ),
        )
    }

    fn policy(&self) -> ToolPolicy {
        ToolPolicy::new(ToolClass::FilesystemRead, DEFAULT_TIMEOUT)
    }

    async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput, Error> {
        let args: ListDirectoryArgs =
            serde_json::from_value(arguments).map_err(|e| Error::tool("list_directory", format!("invalid arguments: {e}")))?;

        let path = match &args.path {
            Some(p) => self.config.resolve_existing(p)?,
            None => self
                .config
                .roots
                .first()
                .cloned()
                .ok_or_else(|| Error::policy_denied("no allowed roots configured"))?,
        };

        let mut entries = fs::read_dir(&path)
            .await
            .map_err(|e| Error::tool("list_directory", format!("failed to list '{path:?}': {e}")))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::tool("list_directory", e.to_string()))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        Ok(ToolOutput::success(names.join("\n")))
    }
}

// =============================================================================
// write_file
// =============================================================================

pub struct WriteFileTool {
    config: FileSystemConfig,
}

impl WriteFileTool {
    pub fn new(config: FileSystemConfig) -> Self {
        Self { config }
    }
}

#[derive(Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a file under an allowed root, replacing it atomically."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property("path", PropertySchema::string("Path to write"), true)
                .add_property("content", PropertySchema::string("Content to write"), true),
        )
    }

    fn policy(&self) -> ToolPolicy {
        ToolPolicy::new(ToolClass::FilesystemWrite, DEFAULT_TIMEOUT).with_byte_cap(self.config.write_quota)
    }

    async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput, Error> {
        let args: WriteFileArgs =
            serde_json::from_value(arguments).map_err(|e| Error::tool("write_file", format!("invalid arguments: {e}")))?;

        if args.content.len() > self.config.write_quota {
            return Err(Error::policy_denied(format!(
                "write of {} bytes exceeds the {}-byte quota",
                args.content.len(),
                self.config.write_quota
            )));
        }

        let target = self.config.resolve_for_creation(&args.path)?;

        // Create-temp-then-rename within the same directory, so a crash
        // mid-write never leaves a partially-written file at `target`.
        let dir = target
            .parent()
            .ok_or_else(|| Error::tool("write_file", "write target has no parent directory"))?;
        let tmp_path = dir.join(format!(".{}.tmp", uuid_like_suffix()));

        fs::write(&tmp_path, args.content.as_bytes())
            .await
            .map_err(|e| Error::tool("write_file", format!("failed to write temp file: {e}")))?;
        fs::rename(&tmp_path, &target).await.map_err(|e| {
            Error::tool("write_file", format!("failed to rename temp file into place: {e}"))
        })?;

        Ok(ToolOutput::success(format!("wrote {} bytes to '{}'", args.content.len(), args.path)))
    }
}

/// A short, non-cryptographic unique suffix for temp file names — this
/// tool never relies on it for anything security-sensitive, only
/// collision-avoidance among concurrent writers to the same directory.
fn uuid_like_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{nanos:x}")
}

pub fn create_filesystem_tools(config: FileSystemConfig, allow_write: bool) -> Vec<Box<dyn Tool>> {
    let mut tools: Vec<Box<dyn Tool>> = vec![
        Box::new(ReadFileTool::new(config.clone())),
        Box::new(ListDirectoryTool::new(config.clone())),
    ];
    if allow_write {
        tools.push(Box::new(WriteFileTool::new(config)));
    }
    tools
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new("agent-1", "task-1")
    }

    #[tokio::test]
    async fn test_read_file_rejects_path_outside_root() {
        let dir = tempdir();
        let config = FileSystemConfig::new(&dir);
        let tool = ReadFileTool::new(config);
        let err = tool
            .execute(serde_json::json!({"path": "/etc/passwd"}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "policy_denied");
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let dir = tempdir();
        let config = FileSystemConfig::new(&dir);
        let write_tool = WriteFileTool::new(config.clone());
        write_tool
            .execute(serde_json::json!({"path": "note.txt", "content": "hello"}), &ctx())
            .await
            .unwrap();

        let read_tool = ReadFileTool::new(config);
        let result = read_tool
            .execute(serde_json::json!({"path": "note.txt"}), &ctx())
            .await
            .unwrap();
        assert_eq!(result.content, "hello");
    }

    #[tokio::test]
    async fn test_write_file_rejects_over_quota() {
        let dir = tempdir();
        let config = FileSystemConfig::new(&dir).with_write_quota(4);
        let tool = WriteFileTool::new(config);
        let err = tool
            .execute(serde_json::json!({"path": "big.txt", "content": "too much content"}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "policy_denied");
    }

    #[tokio::test]
    async fn test_list_directory_defaults_to_root() {
        let dir = tempdir();
        let config = FileSystemConfig::new(&dir);
        std::fs::write(dir.join("a.txt"), "x").unwrap();
        let tool = ListDirectoryTool::new(config);
        let result = tool.execute(serde_json::json!({}), &ctx()).await.unwrap();
        assert!(result.content.contains("a.txt"));
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "swarm-tools-fs-test-{}-{}",
            std::process::id(),
            uuid_like_suffix()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
