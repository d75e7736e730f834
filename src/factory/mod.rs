use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::capabilities::{Agent, EchoAgent, ScriptedAgent};
use crate::error::{Result, RuntimeError};
use crate::tools::{builtin_tools, Tool};

/// Builds agent instances of one type.
pub trait AgentFactory: Send + Sync {
    fn create(&self, name: &str) -> anyhow::Result<Box<dyn Agent>>;
}

impl<F> AgentFactory for F
where
    F: Fn(&str) -> Box<dyn Agent> + Send + Sync,
{
    fn create(&self, name: &str) -> anyhow::Result<Box<dyn Agent>> {
        Ok(self(name))
    }
}

pub type ToolFactory = Arc<dyn Fn() -> Arc<dyn Tool> + Send + Sync>;

/// Name-keyed factories for agents and tools, so configuration can refer to
/// both by name.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn AgentFactory>>,
    tools: HashMap<String, ToolFactory>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in agent types (`echo`, `scripted`) and tools.
    pub fn with_defaults(sandbox_root: PathBuf) -> Self {
        let mut registry = Self::new().with_builtin_tools(sandbox_root);
        registry.register_agent("echo", |name: &str| -> Box<dyn Agent> {
            Box::new(EchoAgent::new(name))
        });

        let tools: Vec<Arc<dyn Tool>> = registry
            .list_tools()
            .iter()
            .filter_map(|name| registry.create_tool(name).ok())
            .collect();
        registry.register_agent("scripted", move |name: &str| -> Box<dyn Agent> {
            Box::new(ScriptedAgent::new(name).with_tools(tools.clone()))
        });
        registry
    }

    pub fn with_builtin_tools(mut self, sandbox_root: PathBuf) -> Self {
        for tool in builtin_tools(sandbox_root) {
            let name = tool.name().to_string();
            self.register_tool(name, Arc::new(move || tool.clone()));
        }
        self
    }

    pub fn register_agent(&mut self, agent_type: impl Into<String>, factory: impl AgentFactory + 'static) {
        let agent_type = agent_type.into();
        if self
            .agents
            .insert(agent_type.clone(), Arc::new(factory))
            .is_some()
        {
            log::warn!("Replaced factory for agent type '{}'", agent_type);
        }
    }

    pub fn register_tool(&mut self, name: impl Into<String>, factory: ToolFactory) {
        let name = name.into();
        if self.tools.insert(name.clone(), factory).is_some() {
            log::warn!("Replaced factory for tool '{}'", name);
        }
    }

    pub fn agent_factory(&self, agent_type: &str) -> Result<Arc<dyn AgentFactory>> {
        self.agents
            .get(agent_type)
            .cloned()
            .ok_or_else(|| RuntimeError::not_found("agent type", agent_type))
    }

    pub fn create_agent(&self, agent_type: &str, name: &str) -> Result<Box<dyn Agent>> {
        self.agent_factory(agent_type)?
            .create(name)
            .map_err(|source| RuntimeError::Initialization {
                name: name.to_string(),
                source,
            })
    }

    pub fn create_tool(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| RuntimeError::not_found("tool", name))
    }

    pub fn list_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let registry = AgentRegistry::with_defaults(PathBuf::from("/tmp"));
        assert_eq!(registry.list_agents(), vec!["echo", "scripted"]);
        assert_eq!(registry.list_tools(), vec!["bash", "read_file", "write_file"]);

        let agent = registry.create_agent("scripted", "worker").unwrap();
        assert_eq!(agent.name(), "worker");
        assert_eq!(agent.tools().len(), 3);
    }

    #[test]
    fn test_unknown_names() {
        let registry = AgentRegistry::new();
        assert!(registry.create_agent("ghost", "x").err().unwrap().is_not_found());
        assert!(registry.create_tool("ghost").err().unwrap().is_not_found());
    }

    #[test]
    fn test_closure_factory() {
        let mut registry = AgentRegistry::new();
        registry.register_agent("loud", |name: &str| -> Box<dyn Agent> {
            Box::new(EchoAgent::new(name).with_prefix("!"))
        });
        assert!(registry.create_agent("loud", "a").is_ok());
    }
}
