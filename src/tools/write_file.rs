use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use super::read_file::resolve_path;
use super::{Tool, ToolContext};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WriteMode {
    #[default]
    Overwrite,
    Append,
    /// Fails if the file already exists.
    Create,
}

#[derive(Deserialize)]
struct WriteRequest {
    path: String,
    content: String,
    #[serde(default)]
    mode: WriteMode,
}

/// Writes text files under the sandbox root, honouring `allowed_paths` and
/// the call's memory limit.
pub struct WriteFileTool {
    sandbox_root: PathBuf,
}

impl WriteFileTool {
    pub fn new(sandbox_root: PathBuf) -> Self {
        Self { sandbox_root }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text to a file inside the sandbox, creating parent directories"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" },
                "mode": {
                    "type": "string",
                    "enum": ["overwrite", "append", "create"],
                    "default": "overwrite"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: Value, context: &ToolContext<'_>) -> Result<Value> {
        let request: WriteRequest = serde_json::from_value(params)?;
        let bytes = request.content.len() as u64;
        if let Some(limit_mb) = context.limits.max_memory_mb {
            if bytes > limit_mb.saturating_mul(1024 * 1024) {
                bail!("Content of {} bytes exceeds the {} MB limit", bytes, limit_mb);
            }
        }
        context.record_memory(bytes);

        let target = resolve_path(&self.sandbox_root, &context.limits.allowed_paths, &request.path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("cannot create directory for {}", request.path))?;
        }

        let mut options = OpenOptions::new();
        match request.mode {
            WriteMode::Overwrite => options.write(true).create(true).truncate(true),
            WriteMode::Append => options.append(true).create(true),
            WriteMode::Create => options.write(true).create_new(true),
        };
        let mut file = options
            .open(&target)
            .await
            .with_context(|| format!("cannot open {}", request.path))?;
        file.write_all(request.content.as_bytes()).await?;
        file.flush().await?;

        let size = file.metadata().await.map(|m| m.len()).unwrap_or(bytes);
        Ok(json!({
            "path": request.path,
            "bytes_written": bytes,
            "size": size,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolLimits;
    use crate::types::AgentContext;
    use tempfile::TempDir;

    async fn write(dir: &TempDir, params: Value) -> Result<Value> {
        let agent = AgentContext::new("w");
        WriteFileTool::new(dir.path().to_path_buf())
            .execute(params, &ToolContext::new(&agent))
            .await
    }

    #[tokio::test]
    async fn test_modes() {
        let dir = TempDir::new().unwrap();

        let out = write(&dir, json!({ "path": "log/run.txt", "content": "one\n" }))
            .await
            .unwrap();
        assert_eq!(out["bytes_written"], 4);

        let out = write(&dir, json!({ "path": "log/run.txt", "content": "two\n", "mode": "append" }))
            .await
            .unwrap();
        assert_eq!(out["size"], 8);

        assert!(write(&dir, json!({ "path": "log/run.txt", "content": "x", "mode": "create" }))
            .await
            .is_err());

        write(&dir, json!({ "path": "log/run.txt", "content": "reset" }))
            .await
            .unwrap();
        let text = std::fs::read_to_string(dir.path().join("log/run.txt")).unwrap();
        assert_eq!(text, "reset");
    }

    #[tokio::test]
    async fn test_rejects_escape_and_oversize() {
        let dir = TempDir::new().unwrap();
        assert!(write(&dir, json!({ "path": "../escape.txt", "content": "x" }))
            .await
            .is_err());

        let agent = AgentContext::new("w");
        let context = ToolContext::new(&agent).with_limits(ToolLimits {
            max_memory_mb: Some(1),
            ..ToolLimits::default()
        });
        let big = "a".repeat(2 * 1024 * 1024);
        let err = WriteFileTool::new(dir.path().to_path_buf())
            .execute(json!({ "path": "big.txt", "content": big }), &context)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("limit"));
        assert!(!dir.path().join("big.txt").exists());
    }

    #[tokio::test]
    async fn test_unbounded_limit_does_not_overflow() {
        let dir = TempDir::new().unwrap();
        let agent = AgentContext::new("w");
        let context = ToolContext::new(&agent).with_limits(ToolLimits {
            max_memory_mb: Some(u64::MAX),
            ..ToolLimits::default()
        });

        let out = WriteFileTool::new(dir.path().to_path_buf())
            .execute(json!({ "path": "small.txt", "content": "ok" }), &context)
            .await
            .unwrap();
        assert_eq!(out["bytes_written"], 2);
    }

    #[tokio::test]
    async fn test_write_under_relative_root() {
        let dir = tempfile::Builder::new()
            .prefix("write-rel")
            .tempdir_in(".")
            .unwrap();
        let root = std::path::Path::new(".").join(dir.path().file_name().unwrap());

        let agent = AgentContext::new("w");
        WriteFileTool::new(root)
            .execute(
                json!({ "path": "./out/../out.txt", "content": "here" }),
                &ToolContext::new(&agent),
            )
            .await
            .unwrap();
        let text = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(text, "here");
    }
}
