use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::Agent;
use crate::engine::TaskContext;
use crate::tools::Tool;
use crate::types::Message;

/// One instruction of a script.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// `tool <name> <json arguments>`
    Tool { name: String, arguments: Value },
    /// `wait <seconds>`: wait for an inbound message.
    Wait(Duration),
    /// `sleep <millis>`
    Sleep(Duration),
    /// `fail <reason>`
    Fail(String),
    /// `complete`
    Complete,
    /// Any other line is part of the final answer.
    Say(String),
}

impl Step {
    pub fn parse(line: &str) -> Result<Step> {
        let line = line.trim();
        let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        let step = match command {
            "tool" => {
                let (name, arguments) = rest.split_once(char::is_whitespace).unwrap_or((rest, "{}"));
                if name.is_empty() {
                    bail!("tool step needs a tool name");
                }
                let arguments: Value = serde_json::from_str(arguments.trim())
                    .map_err(|e| anyhow!("bad arguments for tool '{}': {}", name, e))?;
                Step::Tool {
                    name: name.to_string(),
                    arguments,
                }
            }
            "wait" => Step::Wait(
                Duration::try_from_secs_f64(parse_number(rest, 30.0)?)
                    .map_err(|e| anyhow!("bad wait duration '{}': {}", rest, e))?,
            ),
            "sleep" => Step::Sleep(Duration::from_millis(parse_number(rest, 0.0)? as u64)),
            "fail" => Step::Fail(rest.to_string()),
            "complete" if rest.is_empty() => Step::Complete,
            _ => Step::Say(line.to_string()),
        };
        Ok(step)
    }
}

fn parse_number(raw: &str, default: f64) -> Result<f64> {
    if raw.is_empty() {
        return Ok(default);
    }
    let value: f64 = raw
        .parse()
        .map_err(|_| anyhow!("expected a number, got '{}'", raw))?;
    if !value.is_finite() || value < 0.0 {
        bail!("expected a non-negative number, got '{}'", raw);
    }
    Ok(value)
}

/// Runs a line-based script: tool calls, waits and text. Stands in for a
/// reasoning model in tests and from the command line.
pub struct ScriptedAgent {
    name: String,
    tools: Vec<Arc<dyn Tool>>,
}

impl ScriptedAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    async fn execute(&self, script: &str, task: &mut TaskContext) -> Result<String> {
        let steps = script
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(Step::parse)
            .collect::<Result<Vec<_>>>()?;

        let mut answer: Vec<String> = Vec::new();
        for step in steps {
            if task.is_cancelled() {
                break;
            }

            match step {
                Step::Tool { name, arguments } => {
                    let result = task.call_tool_reporting(&name, arguments).await;
                    if !result.success {
                        log::info!(
                            "Tool '{}' failed for {}: {}",
                            name,
                            self.name,
                            result.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                }
                Step::Wait(timeout) => match task.wait_for_message(Some(timeout)).await {
                    Some(message) => answer.push(message.content),
                    None => answer.push("no reply".to_string()),
                },
                Step::Sleep(duration) => {
                    tokio::select! {
                        _ = task.cancellation().cancelled() => break,
                        _ = tokio::time::sleep(duration) => {}
                    }
                }
                Step::Fail(reason) => bail!("{}", reason),
                Step::Complete => task.mark_completed(),
                Step::Say(text) => answer.push(text),
            }
        }

        Ok(if answer.is_empty() {
            "done".to_string()
        } else {
            answer.join("\n")
        })
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Follows a line-based script of tool calls and replies"
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.clone()
    }

    async fn process(
        &mut self,
        message: Message,
        task: &mut TaskContext,
    ) -> Result<Option<Message>> {
        let answer = self.execute(&message.content, task).await?;
        Ok(Some(Message::response(answer).in_response_to(message.id)))
    }

    async fn run(&mut self, input: String, task: &mut TaskContext) -> Result<()> {
        let answer = self.execute(&input, task).await?;
        if !task.is_cancelled() {
            task.respond(answer).await;
        }
        Ok(())
    }
}
