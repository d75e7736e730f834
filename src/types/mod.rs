pub mod agent;
pub mod message;

pub use agent::AgentContext;
pub use message::{Message, Metadata};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AgentId = Uuid;
pub type MessageId = Uuid;
pub type ConversationId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Created,   // Instantiated, not yet initialized
    Idle,      // Ready for a task
    Thinking,  // Running its processing entry point
    Acting,    // Awaiting a tool call
    Waiting,   // Blocked on an inbound message
    Error,     // Last task faulted
    Completed, // Last task declared itself done
    Destroyed, // Gone
}

impl AgentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AgentStatus::Created => "created",
            AgentStatus::Idle => "idle",
            AgentStatus::Thinking => "thinking",
            AgentStatus::Acting => "acting",
            AgentStatus::Waiting => "waiting",
            AgentStatus::Error => "error",
            AgentStatus::Completed => "completed",
            AgentStatus::Destroyed => "destroyed",
        }
    }

    /// True while a task owns the agent.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AgentStatus::Thinking | AgentStatus::Acting | AgentStatus::Waiting
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Task,
    Response,
    Error,
    Status,
    ToolCall,
    ToolResult,
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Task => "task",
            MessageType::Response => "response",
            MessageType::Error => "error",
            MessageType::Status => "status",
            MessageType::ToolCall => "tool_call",
            MessageType::ToolResult => "tool_result",
        }
    }
}
