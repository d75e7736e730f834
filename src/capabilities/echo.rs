use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::Agent;
use crate::engine::TaskContext;
use crate::types::{AgentContext, Message};

/// Answers every task with its own input. Handy for wiring checks.
pub struct EchoAgent {
    name: String,
    prefix: String,
}

impl EchoAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn reply(&self, input: &str) -> String {
        format!("{}{}", self.prefix, input)
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echoes its input"
    }

    async fn initialize(&mut self, context: &mut AgentContext) -> Result<()> {
        context.variables.insert("echo_count".to_string(), json!(0));
        Ok(())
    }

    async fn process(
        &mut self,
        message: Message,
        task: &mut TaskContext,
    ) -> Result<Option<Message>> {
        bump_count(&mut task.context);
        Ok(Some(
            Message::response(self.reply(&message.content)).in_response_to(message.id),
        ))
    }

    async fn run(&mut self, input: String, task: &mut TaskContext) -> Result<()> {
        bump_count(&mut task.context);
        task.respond(self.reply(&input)).await;
        Ok(())
    }
}

fn bump_count(context: &mut AgentContext) {
    let count = context
        .variables
        .get("echo_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    context
        .variables
        .insert("echo_count".to_string(), json!(count + 1));
}
