pub mod echo;
pub mod scripted;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::engine::TaskContext;
use crate::tools::Tool;
use crate::types::{AgentContext, Message};

pub use echo::EchoAgent;
pub use scripted::ScriptedAgent;

/// The reasoning side of an agent. The runtime owns scheduling, state and
/// delivery; implementations only decide what to say and which tools to use.
///
/// Errors and panics from any method are caught by the runtime.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Tools registered for this agent. Names must be unique.
    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }

    async fn initialize(&mut self, _context: &mut AgentContext) -> Result<()> {
        Ok(())
    }

    /// Handles one inbound message. A returned message is published as the
    /// reply.
    async fn process(&mut self, message: Message, task: &mut TaskContext)
        -> Result<Option<Message>>;

    /// Works on `input`, emitting messages through `task` as they are
    /// produced.
    async fn run(&mut self, input: String, task: &mut TaskContext) -> Result<()>;

    /// Teardown, called once when the agent is destroyed.
    async fn stop(&mut self, _context: &mut AgentContext) -> Result<()> {
        Ok(())
    }
}
