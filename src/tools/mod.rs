pub mod bash;
pub mod read_file;
pub mod schema;
pub mod write_file;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ToolConfig;
use crate::types::{AgentContext, AgentId, Message, MessageType};

pub use bash::BashTool;
pub use read_file::ReadFileTool;
pub use schema::validate_arguments;
pub use write_file::WriteFileTool;

/// Resource limits handed to a tool for one call.
#[derive(Debug, Clone, Default)]
pub struct ToolLimits {
    pub max_memory_mb: Option<u64>,
    pub allowed_paths: Vec<PathBuf>,
    pub blocked_commands: Vec<String>,
}

impl ToolLimits {
    pub fn from_config(config: &ToolConfig) -> Self {
        Self {
            max_memory_mb: config.max_memory_mb,
            allowed_paths: config.allowed_paths.iter().map(PathBuf::from).collect(),
            blocked_commands: config.blocked_commands.clone(),
        }
    }

    pub fn is_blocked(&self, command: &str) -> bool {
        let command = command.to_lowercase();
        self.blocked_commands
            .iter()
            .any(|blocked| command.contains(&blocked.to_lowercase()))
    }
}

pub struct ToolContext<'a> {
    pub agent_id: Option<AgentId>,
    pub agent: &'a AgentContext,
    pub limits: ToolLimits,
    /// Fires when the call is cancelled or its deadline passes.
    pub cancellation: CancellationToken,
    memory_high_water: Arc<AtomicU64>,
}

impl<'a> ToolContext<'a> {
    pub fn new(agent: &'a AgentContext) -> Self {
        Self {
            agent_id: None,
            agent,
            limits: ToolLimits::default(),
            cancellation: CancellationToken::new(),
            memory_high_water: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_agent_id(mut self, agent_id: Option<AgentId>) -> Self {
        self.agent_id = agent_id;
        self
    }

    pub fn with_limits(mut self, limits: ToolLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Tools that can measure memory report samples here; the executor keeps
    /// the maximum.
    pub fn record_memory(&self, bytes: u64) {
        self.memory_high_water.fetch_max(bytes, Ordering::Relaxed);
    }

    pub(crate) fn memory_high_water(&self) -> Option<u64> {
        match self.memory_high_water.load(Ordering::Relaxed) {
            0 => None,
            bytes => Some(bytes),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    /// Tool-specific deadline, used when no configured override exists.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn schema(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "parameters": self.parameters_schema(),
        })
    }

    async fn execute(&self, params: Value, context: &ToolContext<'_>) -> Result<Value>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: Uuid,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            arguments,
        }
    }

    pub fn to_message(&self, sender: AgentId) -> Message {
        Message::new(MessageType::ToolCall, self.arguments.to_string())
            .from_agent(sender)
            .with_metadata("tool_call_id", json!(self.id.to_string()))
            .with_metadata("tool", json!(self.name))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub elapsed: Duration,
    pub memory_high_water_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: Uuid,
    pub tool_name: String,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub usage: ResourceUsage,
}

impl ToolResult {
    pub fn success(tool_name: impl Into<String>, result: Value) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            tool_name: tool_name.into(),
            success: true,
            result: Some(result),
            error: None,
            usage: ResourceUsage::default(),
        }
    }

    pub fn failure(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            tool_name: tool_name.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            usage: ResourceUsage::default(),
        }
    }

    pub fn with_call_id(mut self, call_id: Uuid) -> Self {
        self.call_id = call_id;
        self
    }

    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some(TIMEOUT_ERROR)
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.as_deref() == Some(CANCELLED_ERROR)
    }

    pub fn to_message(&self, sender: AgentId) -> Message {
        let content = match (&self.result, &self.error) {
            (Some(result), _) if self.success => result.to_string(),
            (_, Some(error)) => error.clone(),
            _ => String::new(),
        };

        Message::new(MessageType::ToolResult, content)
            .from_agent(sender)
            .with_metadata("tool_call_id", json!(self.call_id.to_string()))
            .with_metadata("tool", json!(self.tool_name))
            .with_metadata("success", json!(self.success))
            .with_metadata("elapsed_ms", json!(self.usage.elapsed.as_millis() as u64))
    }
}

pub const TIMEOUT_ERROR: &str = "timeout";
pub const CANCELLED_ERROR: &str = "cancelled";

/// Every built-in tool, rooted at `sandbox_root` for file access.
pub fn builtin_tools(sandbox_root: PathBuf) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(BashTool::new()),
        Arc::new(ReadFileTool::new(sandbox_root.clone())),
        Arc::new(WriteFileTool::new(sandbox_root)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_commands_case_insensitive() {
        let limits = ToolLimits {
            blocked_commands: vec!["rm -rf".to_string()],
            ..ToolLimits::default()
        };
        assert!(limits.is_blocked("sudo RM -RF /"));
        assert!(!limits.is_blocked("ls -la"));
    }

    #[test]
    fn test_memory_high_water_keeps_max() {
        let agent = AgentContext::new("s");
        let context = ToolContext::new(&agent);
        assert_eq!(context.memory_high_water(), None);

        context.record_memory(100);
        context.record_memory(50);
        assert_eq!(context.memory_high_water(), Some(100));
    }

    #[test]
    fn test_tool_result_message() {
        let sender = AgentId::new_v4();
        let message = ToolResult::failure("bash", TIMEOUT_ERROR).to_message(sender);

        assert_eq!(message.message_type, MessageType::ToolResult);
        assert_eq!(message.content, "timeout");
        assert_eq!(message.metadata["success"], json!(false));
        assert_eq!(message.sender, Some(sender));
    }

    #[test]
    fn test_builtin_tool_names_are_unique() {
        let tools = builtin_tools(PathBuf::from("/tmp"));
        let mut names: Vec<_> = tools.iter().map(|t| t.name().to_string()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names, vec!["bash", "read_file", "write_file"]);
    }
}
