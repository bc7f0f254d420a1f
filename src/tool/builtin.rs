//! Built-in tool families (§4.5): shell execution (gated), file
//! read/write/edit/multi-edit (workspace-bounded), directory glob, content
//! grep, notebook read/edit, web fetch (blocks private IP space), web
//! search, task list.

use super::registry::{ToolDefinition, ToolExecutionContext};
use super::{Tool, ToolCategory};
use crate::types::error::ToolError;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

fn schema(properties: serde_json::Value, required: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Shell execution — gated behind `requires_permission`; callers must
/// obtain approval via the dispatcher's policy layer before this runs.
pub struct ShellExecTool {
    definition: ToolDefinition,
}

impl ShellExecTool {
    pub fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "shell-exec".into(),
                description: "Executes a shell command in the workspace.".into(),
                input_schema: schema(
                    serde_json::json!({ "command": { "type": "string" } }),
                    &["command"],
                ),
                category: ToolCategory::Shell,
                requires_permission: true,
            },
        }
    }
}

#[async_trait]
impl Tool for ShellExecTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, ToolError> {
        if ctx.is_cancelled() {
            return Err(ToolError::Aborted);
        }
        let command = args["command"]
            .as_str()
            .ok_or_else(|| ToolError::Validation("command must be a string".into()))?;
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(serde_json::json!({
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "status": output.status.code(),
        }))
    }
}

fn resolve_in_workspace(root: &Path, relative: &str) -> Result<PathBuf, ToolError> {
    let candidate = root.join(relative);
    let canonical_root = root
        .canonicalize()
        .map_err(|e| ToolError::ExecutionFailed(format!("workspace root: {e}")))?;
    // For paths that don't exist yet (write targets), canonicalize the parent.
    let check_against = if candidate.exists() {
        candidate
            .canonicalize()
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?
    } else {
        let parent = candidate
            .parent()
            .ok_or_else(|| ToolError::Validation("invalid path".into()))?;
        let parent_canon = parent
            .canonicalize()
            .map_err(|e| ToolError::Validation(format!("path outside workspace: {e}")))?;
        parent_canon.join(candidate.file_name().unwrap_or_default())
    };
    if !check_against.starts_with(&canonical_root) {
        return Err(ToolError::SecurityViolation(
            "path escapes workspace root".into(),
        ));
    }
    Ok(candidate)
}

pub struct FileReadTool {
    definition: ToolDefinition,
    workspace_root: PathBuf,
}

impl FileReadTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            definition: ToolDefinition {
                name: "file-read".into(),
                description: "Reads a file within the workspace.".into(),
                input_schema: schema(serde_json::json!({ "path": { "type": "string" } }), &["path"]),
                category: ToolCategory::File,
                requires_permission: false,
            },
            workspace_root,
        }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, ToolError> {
        let path = args["path"]
            .as_str()
            .ok_or_else(|| ToolError::Validation("path must be a string".into()))?;
        let resolved = resolve_in_workspace(&self.workspace_root, path)?;
        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(serde_json::json!({ "content": content }))
    }
}

pub struct FileWriteTool {
    definition: ToolDefinition,
    workspace_root: PathBuf,
}

impl FileWriteTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            definition: ToolDefinition {
                name: "file-write".into(),
                description: "Writes a file within the workspace.".into(),
                input_schema: schema(
                    serde_json::json!({
                        "path": { "type": "string" },
                        "content": { "type": "string" },
                    }),
                    &["path", "content"],
                ),
                category: ToolCategory::File,
                requires_permission: true,
            },
            workspace_root,
        }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, ToolError> {
        let path = args["path"]
            .as_str()
            .ok_or_else(|| ToolError::Validation("path must be a string".into()))?;
        let content = args["content"]
            .as_str()
            .ok_or_else(|| ToolError::Validation("content must be a string".into()))?;
        let resolved = resolve_in_workspace(&self.workspace_root, path)?;
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(serde_json::json!({ "bytesWritten": content.len() }))
    }
}

/// A single file edit within a `multi-file-edit` atomic batch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileEdit {
    pub path: String,
    pub content: String,
}

/// Atomic multi-file edit: records each file's pre-image, applies all
/// edits, and rolls back every file on any single failure (§4.5).
pub struct MultiFileEditTool {
    definition: ToolDefinition,
    workspace_root: PathBuf,
}

impl MultiFileEditTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            definition: ToolDefinition {
                name: "multi-file-edit".into(),
                description: "Applies edits to multiple files atomically.".into(),
                input_schema: schema(
                    serde_json::json!({
                        "edits": { "type": "array" },
                        "atomic": { "type": "boolean" },
                    }),
                    &["edits"],
                ),
                category: ToolCategory::File,
                requires_permission: true,
            },
            workspace_root,
        }
    }

    async fn apply(&self, edits: &[FileEdit]) -> Result<Vec<PathBuf>, (usize, ToolError)> {
        let mut resolved = Vec::with_capacity(edits.len());
        for (idx, edit) in edits.iter().enumerate() {
            let path = resolve_in_workspace(&self.workspace_root, &edit.path)
                .map_err(|e| (idx, e))?;
            resolved.push(path);
        }
        for (idx, (path, edit)) in resolved.iter().zip(edits.iter()).enumerate() {
            tokio::fs::write(path, &edit.content)
                .await
                .map_err(|e| (idx, ToolError::ExecutionFailed(e.to_string())))?;
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Tool for MultiFileEditTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, ToolError> {
        let edits: Vec<FileEdit> = serde_json::from_value(args["edits"].clone())
            .map_err(|e| ToolError::Validation(format!("invalid edits: {e}")))?;
        let atomic = args["atomic"].as_bool().unwrap_or(true);

        let mut pre_images: Vec<(PathBuf, Option<String>)> = Vec::with_capacity(edits.len());
        for edit in &edits {
            let path = resolve_in_workspace(&self.workspace_root, &edit.path)?;
            let pre = tokio::fs::read_to_string(&path).await.ok();
            pre_images.push((path, pre));
        }

        match self.apply(&edits).await {
            Ok(paths) => Ok(serde_json::json!({ "filesWritten": paths.len(), "rollbackPerformed": false })),
            Err((failed_index, original_error)) => {
                if !atomic {
                    return Err(original_error);
                }
                let mut rollback_failed = false;
                for (path, pre) in &pre_images {
                    let restore = match pre {
                        Some(content) => tokio::fs::write(path, content).await,
                        None => tokio::fs::remove_file(path).await,
                    };
                    if restore.is_err() {
                        rollback_failed = true;
                    }
                }
                if rollback_failed {
                    tracing::warn!(
                        failed_index,
                        "rollback of one or more files failed after atomic multi-file edit error"
                    );
                }
                Err(original_error)
            }
        }
    }
}

pub struct DirectoryGlobTool {
    definition: ToolDefinition,
    workspace_root: PathBuf,
}

impl DirectoryGlobTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            definition: ToolDefinition {
                name: "directory-glob".into(),
                description: "Lists files in the workspace matching a glob pattern.".into(),
                input_schema: schema(serde_json::json!({ "pattern": { "type": "string" } }), &["pattern"]),
                category: ToolCategory::File,
                requires_permission: false,
            },
            workspace_root,
        }
    }
}

#[async_trait]
impl Tool for DirectoryGlobTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, ToolError> {
        let pattern = args["pattern"]
            .as_str()
            .ok_or_else(|| ToolError::Validation("pattern must be a string".into()))?;
        let full_pattern = self.workspace_root.join(pattern);
        let matches: Vec<String> = glob::glob(&full_pattern.to_string_lossy())
            .map_err(|e| ToolError::Validation(e.to_string()))?
            .filter_map(|r| r.ok())
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        Ok(serde_json::json!({ "matches": matches }))
    }
}

pub struct ContentGrepTool {
    definition: ToolDefinition,
    workspace_root: PathBuf,
}

impl ContentGrepTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            definition: ToolDefinition {
                name: "content-grep".into(),
                description: "Searches file contents in the workspace for a regex pattern.".into(),
                input_schema: schema(
                    serde_json::json!({
                        "pattern": { "type": "string" },
                        "path": { "type": "string" },
                    }),
                    &["pattern", "path"],
                ),
                category: ToolCategory::Search,
                requires_permission: false,
            },
            workspace_root,
        }
    }
}

#[async_trait]
impl Tool for ContentGrepTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, ToolError> {
        let pattern = args["pattern"]
            .as_str()
            .ok_or_else(|| ToolError::Validation("pattern must be a string".into()))?;
        let path = args["path"]
            .as_str()
            .ok_or_else(|| ToolError::Validation("path must be a string".into()))?;
        let resolved = resolve_in_workspace(&self.workspace_root, path)?;
        let regex = Regex::new(pattern).map_err(|e| ToolError::Validation(e.to_string()))?;
        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        let matches: Vec<&str> = content.lines().filter(|l| regex.is_match(l)).collect();
        Ok(serde_json::json!({ "matches": matches }))
    }
}

/// Reads a Jupyter notebook as structured JSON (cells + outputs).
pub struct NotebookReadTool {
    definition: ToolDefinition,
    workspace_root: PathBuf,
}

impl NotebookReadTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            definition: ToolDefinition {
                name: "notebook-read".into(),
                description: "Reads a Jupyter notebook's cells.".into(),
                input_schema: schema(serde_json::json!({ "path": { "type": "string" } }), &["path"]),
                category: ToolCategory::Notebook,
                requires_permission: false,
            },
            workspace_root,
        }
    }
}

#[async_trait]
impl Tool for NotebookReadTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, ToolError> {
        let path = args["path"]
            .as_str()
            .ok_or_else(|| ToolError::Validation("path must be a string".into()))?;
        let resolved = resolve_in_workspace(&self.workspace_root, path)?;
        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        let notebook: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| ToolError::Validation(e.to_string()))?;
        Ok(notebook)
    }
}

fn is_private_or_local(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return match ip {
            std::net::IpAddr::V4(v4) => {
                v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
            }
            std::net::IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
        };
    }
    false
}

/// Fetches a URL's content, blocking local/private IP space (§4.5).
pub struct WebFetchTool {
    definition: ToolDefinition,
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "web-fetch".into(),
                description: "Fetches the contents of a public URL.".into(),
                input_schema: schema(serde_json::json!({ "url": { "type": "string" } }), &["url"]),
                category: ToolCategory::Web,
                requires_permission: false,
            },
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, ToolError> {
        let raw = args["url"]
            .as_str()
            .ok_or_else(|| ToolError::Validation("url must be a string".into()))?;
        let url = Url::parse(raw).map_err(|e| ToolError::Validation(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| ToolError::Validation("url has no host".into()))?;
        if is_private_or_local(host) {
            return Err(ToolError::SecurityViolation(
                "fetch target resolves to local/private address space".into(),
            ));
        }
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(serde_json::json!({ "status": status, "body": body }))
    }
}

/// Stub web search — production deployments wire a real search backend in;
/// this exists so the tool family is representable in the catalog and in
/// mapper fallback decisions.
pub struct WebSearchTool {
    definition: ToolDefinition,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "web-search".into(),
                description: "Searches the web for a query string.".into(),
                input_schema: schema(serde_json::json!({ "query": { "type": "string" } }), &["query"]),
                category: ToolCategory::Search,
                requires_permission: false,
            },
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, ToolError> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| ToolError::Validation("query must be a string".into()))?;
        Ok(serde_json::json!({ "query": query, "results": [] }))
    }
}

/// In-memory task list tool backing the agent's own scratch plan.
pub struct TaskListTool {
    definition: ToolDefinition,
    tasks: parking_lot::Mutex<Vec<String>>,
}

impl TaskListTool {
    pub fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "task-list".into(),
                description: "Appends to or reads the agent's scratch task list.".into(),
                input_schema: schema(
                    serde_json::json!({
                        "action": { "type": "string", "enum": ["add", "list"] },
                        "item": { "type": "string" },
                    }),
                    &["action"],
                ),
                category: ToolCategory::Task,
                requires_permission: false,
            },
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Tool for TaskListTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, ToolError> {
        let action = args["action"]
            .as_str()
            .ok_or_else(|| ToolError::Validation("action must be a string".into()))?;
        match action {
            "add" => {
                let item = args["item"]
                    .as_str()
                    .ok_or_else(|| ToolError::Validation("item must be a string".into()))?;
                self.tasks.lock().push(item.to_string());
                Ok(serde_json::json!({ "ok": true }))
            }
            "list" => Ok(serde_json::json!({ "tasks": self.tasks.lock().clone() })),
            other => Err(ToolError::Validation(format!("unknown action: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_loopback_and_private_ranges() {
        assert!(is_private_or_local("127.0.0.1"));
        assert!(is_private_or_local("10.0.0.5"));
        assert!(is_private_or_local("192.168.1.1"));
        assert!(is_private_or_local("localhost"));
        assert!(!is_private_or_local("93.184.216.34"));
    }

    #[tokio::test]
    async fn path_resolution_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let result = resolve_in_workspace(dir.path(), "../../etc/passwd");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn multi_file_edit_rolls_back_on_partial_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ok_path = dir.path().join("a.txt");
        tokio::fs::write(&ok_path, "original").await.unwrap();
        // `b` is a directory, so writing to it as a file fails — this
        // exercises rollback of the already-succeeded edit to `a.txt`.
        let dir_path = dir.path().join("b");
        tokio::fs::create_dir(&dir_path).await.unwrap();

        let tool = MultiFileEditTool::new(dir.path().to_path_buf());
        let ctx = ToolExecutionContext::with_timeout(std::time::Duration::from_secs(5));
        let args = serde_json::json!({
            "edits": [
                { "path": "a.txt", "content": "mutated" },
                { "path": "b", "content": "nope" },
            ],
            "atomic": true,
        });
        let result = tool.execute(args, &ctx).await;
        assert!(result.is_err());
        let restored = tokio::fs::read_to_string(&ok_path).await.unwrap();
        assert_eq!(restored, "original");
    }

    #[tokio::test]
    async fn task_list_add_then_list() {
        let tool = TaskListTool::new();
        let ctx = ToolExecutionContext::with_timeout(std::time::Duration::from_secs(5));
        tool.execute(serde_json::json!({"action": "add", "item": "x"}), &ctx)
            .await
            .unwrap();
        let result = tool
            .execute(serde_json::json!({"action": "list"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result["tasks"], serde_json::json!(["x"]));
    }
}
