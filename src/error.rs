use std::any::Any;
use thiserror::Error;

use crate::types::{AgentId, AgentStatus};

/// Errors raised to the immediate caller of a runtime operation.
///
/// Faults that cross a boundary (a tool action failing, an agent body failing
/// while a task runs, a delivery being dropped) never surface here; they are
/// turned into a failed `ToolResult`, an `Error` message or a drop counter.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("cannot {operation} agent {id} while it is {status:?}")]
    InvalidState {
        id: AgentId,
        status: AgentStatus,
        operation: &'static str,
    },

    #[error("agent {0} is already running a task")]
    AgentBusy(AgentId),

    #[error("failed to initialize agent '{name}': {source}")]
    Initialization {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("teardown of agent {id} failed: {source}")]
    Teardown {
        id: AgentId,
        #[source]
        source: anyhow::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    pub fn validation(message: impl Into<String>) -> Self {
        RuntimeError::Validation(message.into())
    }

    pub fn agent_not_found(id: AgentId) -> Self {
        RuntimeError::NotFound {
            kind: "agent",
            id: id.to_string(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        RuntimeError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound { .. })
    }
}

/// Describes a caught panic payload, e.g. "tool panicked: index out of range".
pub(crate) fn panic_message(origin: &str, panic: Box<dyn Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("{} panicked: {}", origin, detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let id = AgentId::new_v4();
        let err = RuntimeError::agent_not_found(id);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), format!("agent not found: {}", id));
    }

    #[test]
    fn test_invalid_state_display() {
        let id = AgentId::new_v4();
        let err = RuntimeError::InvalidState {
            id,
            status: AgentStatus::Destroyed,
            operation: "start",
        };
        assert!(err.to_string().contains("Destroyed"));
        assert!(err.to_string().contains("start"));
    }

    #[test]
    fn test_panic_message_payloads() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message("tool", literal), "tool panicked: boom");

        let formatted: Box<dyn Any + Send> = Box::new(format!("bad index {}", 3));
        assert_eq!(panic_message("agent", formatted), "agent panicked: bad index 3");

        let opaque: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message("agent", opaque), "agent panicked: unknown panic");
    }
}
