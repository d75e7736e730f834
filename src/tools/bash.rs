use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{Tool, ToolContext};

pub const WORKING_DIRECTORY_VAR: &str = "working_directory";

/// Runs a shell command. The child is killed if the call is cancelled or
/// times out.
pub struct BashTool {
    shell: String,
}

impl BashTool {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute bash commands with safety limits"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in seconds (optional)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: Value, context: &ToolContext<'_>) -> Result<Value> {
        let command = params["command"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow!("No command provided"))?;

        if context.limits.is_blocked(command) {
            bail!("Command '{}' is not allowed", command);
        }

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = context.agent.variable_str(WORKING_DIRECTORY_VAR) {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| anyhow!("Command execution failed: {}", e))?;
        let own_timeout = params["timeout"]
            .as_f64()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());

        // Dropping the wait future drops the child, which kills it.
        let wait = child.wait_with_output();
        let output = tokio::select! {
            _ = context.cancellation.cancelled() => bail!("Command cancelled"),
            result = async {
                match own_timeout {
                    Some(limit) => match tokio::time::timeout(limit, wait).await {
                        Ok(output) => output.map_err(anyhow::Error::from),
                        Err(_) => Err(anyhow!("Command timed out after {:?}", limit)),
                    },
                    None => wait.await.map_err(anyhow::Error::from),
                }
            } => result?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let returncode = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            bail!(
                "Command exited with status {}: {}",
                returncode,
                stderr.trim()
            );
        }

        Ok(json!({
            "stdout": stdout,
            "stderr": stderr,
            "returncode": returncode,
        }))
    }
}
