//! File write tool: write a document under a sandbox root.
//!
//! Paths are relative to the root; absolute paths and `..` components are
//! refused before anything touches the filesystem.

use async_trait::async_trait;
use loopgate_core::context::RequestContext;
use loopgate_core::error::ToolError;
use loopgate_core::tool::Tool;
use std::path::{Component, Path, PathBuf};

pub struct FileWriteTool {
    root: PathBuf,
}

impl FileWriteTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a caller-supplied relative path onto the root.
    fn resolve(&self, file_path: &str) -> Result<PathBuf, ToolError> {
        let denied = |reason: &str| ToolError::PermissionDenied {
            tool_name: "file_write".into(),
            reason: format!("{reason}: {file_path}"),
        };

        let normalized = file_path.replace('\\', "/");
        let relative = Path::new(&normalized);
        if normalized.trim().is_empty() {
            return Err(ToolError::InvalidArguments("'file_path' must not be empty".into()));
        }

        let mut clean = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                Component::ParentDir => return Err(denied("path traversal is not allowed")),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(denied("absolute paths are not allowed"));
                }
            }
        }
        if clean.as_os_str().is_empty() {
            return Err(ToolError::InvalidArguments(format!(
                "'{file_path}' does not name a file"
            )));
        }

        Ok(self.root.join(clean))
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write text to a file in the workspace. Creates the file if it doesn't exist, overwrites if it does."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file, relative to the workspace"
                },
                "text": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["file_path", "text"]
        })
    }

    fn approval_preview(&self, arguments: &serde_json::Value) -> Option<String> {
        arguments["text"].as_str().map(str::to_string)
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &RequestContext,
    ) -> Result<serde_json::Value, ToolError> {
        let file_path = arguments["file_path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'file_path' argument".into()))?;
        let text = arguments["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))?;

        let target = self.resolve(file_path)?;
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "file_write".into(),
            reason,
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failed(format!("Failed to create directory: {e}")))?;
        }
        tokio::fs::write(&target, text)
            .await
            .map_err(|e| failed(format!("Failed to write file: {e}")))?;

        tracing::info!(
            session_id = %ctx.session_id,
            path = %target.display(),
            bytes = text.len(),
            "File written"
        );

        Ok(serde_json::json!({
            "path": file_path,
            "bytes": text.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopgate_core::message::SessionId;

    fn ctx() -> RequestContext {
        RequestContext::new(SessionId::from("test"))
    }

    #[test]
    fn tool_definition() {
        let tool = FileWriteTool::new("/tmp");
        assert_eq!(tool.name(), "file_write");
        let schema = tool.input_schema();
        assert_eq!(schema["required"], serde_json::json!(["file_path", "text"]));
    }

    #[tokio::test]
    async fn write_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileWriteTool::new(dir.path());
        let out = tool
            .execute(
                serde_json::json!({"file_path": "report.md", "text": "Hello from test!"}),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out["bytes"], 16);
        let content = std::fs::read_to_string(dir.path().join("report.md")).unwrap();
        assert_eq!(content, "Hello from test!");
    }

    #[tokio::test]
    async fn creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileWriteTool::new(dir.path());
        tool.execute(
            serde_json::json!({"file_path": "reports/2024/x.md", "text": "nested"}),
            &ctx(),
        )
        .await
        .unwrap();
        assert!(dir.path().join("reports/2024/x.md").exists());
    }

    #[tokio::test]
    async fn traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileWriteTool::new(dir.path().join("root"));
        let err = tool
            .execute(
                serde_json::json!({"file_path": "../escape.txt", "text": "x"}),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn absolute_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileWriteTool::new(dir.path());
        let err = tool
            .execute(serde_json::json!({"file_path": "/etc/passwd", "text": "x"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
    }

    #[test]
    fn preview_shows_text() {
        let tool = FileWriteTool::new("/tmp");
        let preview = tool.approval_preview(&serde_json::json!({"file_path": "a", "text": "# Report"}));
        assert_eq!(preview.as_deref(), Some("# Report"));
    }

    #[tokio::test]
    async fn missing_text_rejected() {
        let tool = FileWriteTool::new("/tmp");
        let err = tool
            .execute(serde_json::json!({"file_path": "a.txt"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
