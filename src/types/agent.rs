use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::AgentId;

/// Per-agent state handed to the agent and, read-only, to its tool calls.
///
/// The context has no internal locking. It lives with the agent instance and
/// moves into whichever task currently owns the agent, so there is only ever
/// one writer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentContext {
    pub session_id: String,
    pub user_id: Option<String>,
    pub variables: HashMap<String, Value>,
}

impl AgentContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: None,
            variables: HashMap::new(),
        }
    }

    pub fn for_agent(agent_id: AgentId) -> Self {
        Self::new(format!("session_{}", agent_id))
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    pub fn variable_str(&self, key: &str) -> Option<&str> {
        self.variables.get(key).and_then(|v| v.as_str())
    }
}
