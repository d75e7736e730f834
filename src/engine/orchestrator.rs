use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};

use super::lifecycle_management::LifecycleManager;
use crate::error::{Result, RuntimeError};
use crate::types::{AgentId, Message, MessageType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowStep {
    /// Run one agent; its first response becomes the next step's input.
    Single { agent: String },
    /// Run several agents on the same input; their first responses, joined
    /// with spaces, become the next step's input.
    Parallel { agents: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    pub created_at: DateTime<Utc>,
}

pub type WorkflowStream = Pin<Box<dyn Stream<Item = Result<Message>> + Send>>;

/// Chains agent tasks into named workflows. Agents are referred to by name.
pub struct Orchestrator {
    manager: LifecycleManager,
    workflows: RwLock<HashMap<String, Workflow>>,
}

impl Orchestrator {
    pub fn new(manager: LifecycleManager) -> Self {
        Self {
            manager,
            workflows: RwLock::new(HashMap::new()),
        }
    }

    pub fn manager(&self) -> &LifecycleManager {
        &self.manager
    }

    pub fn register_workflow(&self, name: impl Into<String>, steps: Vec<WorkflowStep>) -> Result<()> {
        let name = name.into();
        if steps.is_empty() {
            return Err(RuntimeError::validation(format!("workflow '{}' has no steps", name)));
        }
        if steps
            .iter()
            .any(|s| matches!(s, WorkflowStep::Parallel { agents } if agents.is_empty()))
        {
            return Err(RuntimeError::validation(format!(
                "workflow '{}' has a parallel step without agents",
                name
            )));
        }

        let workflow = Workflow {
            name: name.clone(),
            steps,
            created_at: Utc::now(),
        };
        self.workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), workflow);
        log::info!("Registered workflow: {}", name);
        Ok(())
    }

    pub fn get_workflow(&self, name: &str) -> Option<Workflow> {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn list_workflows(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Streams every message the workflow's agents produce, step by step.
    /// A step that cannot start ends the stream with its error.
    pub fn execute_workflow(&self, name: &str, input: impl Into<String>) -> Result<WorkflowStream> {
        let workflow = self
            .get_workflow(name)
            .ok_or_else(|| RuntimeError::not_found("workflow", name))?;
        let manager = self.manager.clone();
        let mut current_input = input.into();

        let stream = async_stream::try_stream! {
            for step in workflow.steps {
                match step {
                    WorkflowStep::Single { agent } => {
                        let id = resolve(&manager, &agent)?;
                        let mut task = manager.run_agent_task(id, current_input.clone())?;
                        while let Some(message) = task.next().await {
                            let is_response = message.message_type == MessageType::Response;
                            if is_response {
                                current_input = message.content.clone();
                            }
                            yield message;
                            if is_response {
                                break;
                            }
                        }
                        drop(task);
                        manager.stop_agent(id).await?;
                    }
                    WorkflowStep::Parallel { agents } => {
                        let mut ids = Vec::with_capacity(agents.len());
                        let mut tasks = Vec::with_capacity(agents.len());
                        for agent in &agents {
                            let id = resolve(&manager, agent)?;
                            tasks.push(manager.run_agent_task(id, current_input.clone())?);
                            ids.push(id);
                        }

                        let responses: Vec<Message> = join_all(tasks.into_iter().map(|t| t.first_response()))
                            .await
                            .into_iter()
                            .flatten()
                            .collect();

                        if !responses.is_empty() {
                            current_input = responses
                                .iter()
                                .map(|r| r.content.as_str())
                                .filter(|c| !c.is_empty())
                                .collect::<Vec<_>>()
                                .join(" ");
                        }
                        for id in ids {
                            manager.stop_agent(id).await?;
                        }
                        for response in responses {
                            yield response;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

fn resolve(manager: &LifecycleManager, agent: &str) -> Result<AgentId> {
    if let Ok(id) = AgentId::parse_str(agent) {
        return Ok(id);
    }
    manager
        .find_agent(agent)
        .ok_or_else(|| RuntimeError::not_found("agent", agent))
}
