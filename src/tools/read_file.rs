use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use super::{Tool, ToolContext};

pub struct ReadFileTool {
    sandbox_root: PathBuf,
}

impl ReadFileTool {
    pub fn new(sandbox_root: PathBuf) -> Self {
        Self { sandbox_root }
    }
}

/// Resolves `path` against the sandbox root without touching the filesystem
/// and rejects anything that ends up outside the root or outside every
/// allowed path. Relative roots are taken from the working directory and
/// relative allowed paths from the root.
pub(crate) fn resolve_path(
    sandbox_root: &Path,
    allowed_paths: &[PathBuf],
    path: &str,
) -> Result<PathBuf> {
    let root = normalize(sandbox_root)?;
    let target = normalize(&root.join(path))
        .map_err(|_| anyhow!("Path escapes sandbox: {}", path))?;

    if !target.starts_with(&root) {
        return Err(anyhow!("Path escapes sandbox: {}", path));
    }

    if !allowed_paths.is_empty() {
        let allowed = allowed_paths
            .iter()
            .map(|p| normalize(&root.join(p)))
            .collect::<Result<Vec<_>>>()?;
        if !allowed.iter().any(|p| target.starts_with(p)) {
            return Err(anyhow!("Path not in allowed paths: {}", path));
        }
    }

    Ok(target)
}

/// Absolute and lexically clean: no `.` components and no `..` left.
fn normalize(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)
        .map_err(|e| anyhow!("cannot resolve {}: {}", path.display(), e))?;

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(anyhow!("{} climbs above the filesystem root", path.display()));
                }
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file inside the sandbox, optionally a window of lines"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "offset": { "type": "integer", "minimum": 0, "description": "First line to return (0-based)" },
                "limit": { "type": "integer", "minimum": 1, "description": "Maximum number of lines" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, context: &ToolContext<'_>) -> Result<Value> {
        let path = params["path"]
            .as_str()
            .ok_or_else(|| anyhow!("path must be a string"))?;
        let offset = params["offset"].as_u64().unwrap_or(0) as usize;
        let limit = params["limit"].as_u64().map(|l| l as usize);

        let target = resolve_path(&self.sandbox_root, &context.limits.allowed_paths, path)?;
        let text = fs::read_to_string(&target)
            .await
            .map_err(|e| anyhow!("cannot read {}: {}", path, e))?;
        context.record_memory(text.len() as u64);

        let total_lines = text.lines().count();
        let content = if offset == 0 && limit.is_none() {
            text
        } else {
            text.lines()
                .skip(offset)
                .take(limit.unwrap_or(usize::MAX))
                .collect::<Vec<_>>()
                .join("\n")
        };

        Ok(json!({
            "path": path,
            "size": content.len(),
            "total_lines": total_lines,
            "content": content,
        }))
    }
}
