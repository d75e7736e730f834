use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, RuntimeError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub executor: ExecutorConfig,
    pub bus: BusConfig,
    pub task: TaskConfig,
    pub agents: HashMap<String, AgentConfig>,
    pub tools: HashMap<String, ToolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Deadline applied to a tool call when nothing more specific is set
    pub default_timeout_secs: f64,
    pub max_memory_mb: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30.0,
            max_memory_mb: 512,
        }
    }
}

impl ExecutorConfig {
    pub fn default_timeout(&self) -> Duration {
        secs_to_duration(self.default_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Capacity of each agent's inbound channel
    pub inbox_capacity: usize,
    /// Upper bound on content plus serialized metadata, in bytes
    pub max_message_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 256,
            max_message_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Capacity of the channel a running task streams its messages through
    pub output_buffer: usize,
    /// How often the dispatch loop looks for queued inbox messages
    pub dispatch_interval_ms: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            output_buffer: 32,
            dispatch_interval_ms: 100,
        }
    }
}

impl TaskConfig {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub description: String,
    pub enabled: bool,
    pub max_concurrent_tasks: usize,
    pub timeout_secs: Option<f64>,
    pub tools: Vec<String>,
    pub environment: HashMap<String, String>,
    pub metadata: HashMap<String, Value>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            agent_type: String::new(),
            description: String::new(),
            enabled: true,
            max_concurrent_tasks: 1,
            timeout_secs: None,
            tools: Vec::new(),
            environment: HashMap::new(),
            metadata: HashMap::new(),
        }
    }
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent_type: agent_type.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(secs_to_duration)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub name: String,
    pub enabled: bool,
    pub timeout_secs: Option<f64>,
    pub max_memory_mb: Option<u64>,
    pub allowed_paths: Vec<String>,
    pub blocked_commands: Vec<String>,
    pub require_confirmation: bool,
    pub parameters: HashMap<String, Value>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            timeout_secs: None,
            max_memory_mb: None,
            allowed_paths: Vec::new(),
            blocked_commands: Vec::new(),
            require_confirmation: false,
            parameters: HashMap::new(),
        }
    }
}

impl ToolConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(secs_to_duration)
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Loads a TOML, YAML or JSON file, picked by extension, then applies
    /// environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let mut config: RuntimeConfig = match extension.as_deref() {
            Some("toml") => toml::from_str(&raw).map_err(|e| config_error(path, e))?,
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&raw).map_err(|e| config_error(path, e))?
            }
            Some("json") => serde_json::from_str(&raw).map_err(|e| config_error(path, e))?,
            _ => {
                return Err(RuntimeError::Config(format!(
                    "unsupported config format: {}",
                    path.display()
                )))
            }
        };

        config.fill_names();
        config.apply_env();
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Some(timeout) = env_parse::<f64>("AGTEN_TOOL_TIMEOUT_SECS") {
            self.executor.default_timeout_secs = timeout;
        }
        if let Some(capacity) = env_parse::<usize>("AGTEN_INBOX_CAPACITY") {
            self.bus.inbox_capacity = capacity;
        }
        if let Some(size) = env_parse::<usize>("AGTEN_MAX_MESSAGE_SIZE") {
            self.bus.max_message_size = size;
        }
        if let Some(buffer) = env_parse::<usize>("AGTEN_OUTPUT_BUFFER") {
            self.task.output_buffer = buffer;
        }
        if let Some(interval) = env_parse::<u64>("AGTEN_DISPATCH_INTERVAL_MS") {
            self.task.dispatch_interval_ms = interval;
        }
    }

    // Map keys double as names when the entry omits one.
    fn fill_names(&mut self) {
        for (key, agent) in self.agents.iter_mut() {
            if agent.name.is_empty() {
                agent.name = key.clone();
            }
        }
        for (key, tool) in self.tools.iter_mut() {
            if tool.name.is_empty() {
                tool.name = key.clone();
            }
        }
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.get(name)
    }

    pub fn tool(&self, name: &str) -> Option<&ToolConfig> {
        self.tools.get(name)
    }

    /// Every problem found, in a stable order.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut agent_names: Vec<_> = self.agents.keys().collect();
        agent_names.sort();
        for key in agent_names {
            let agent = &self.agents[key];
            if agent.name.is_empty() {
                errors.push(format!("Agent {}: name is required", key));
            }
            if agent.agent_type.is_empty() {
                errors.push(format!("Agent {}: type is required", key));
            }
            if agent.max_concurrent_tasks < 1 {
                errors.push(format!("Agent {}: max_concurrent_tasks must be >= 1", key));
            }
            if agent.timeout_secs.is_some_and(|t| t < 0.0) {
                errors.push(format!("Agent {}: timeout must be >= 0", key));
            }
        }

        let mut tool_names: Vec<_> = self.tools.keys().collect();
        tool_names.sort();
        for key in tool_names {
            let tool = &self.tools[key];
            if tool.name.is_empty() {
                errors.push(format!("Tool {}: name is required", key));
            }
            if tool.timeout_secs.is_some_and(|t| t < 0.0) {
                errors.push(format!("Tool {}: timeout must be >= 0", key));
            }
        }

        if self.executor.default_timeout_secs < 0.0 {
            errors.push("Executor default_timeout_secs must be >= 0".to_string());
        }
        if self.bus.inbox_capacity == 0 {
            errors.push("Bus inbox_capacity must be > 0".to_string());
        }
        if self.bus.max_message_size == 0 {
            errors.push("Bus max_message_size must be > 0".to_string());
        }
        if self.task.output_buffer == 0 {
            errors.push("Task output_buffer must be > 0".to_string());
        }
        if self.task.dispatch_interval_ms == 0 {
            errors.push("Task dispatch_interval_ms must be > 0".to_string());
        }

        errors
    }

    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::Config(errors.join("; ")))
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn config_error(path: &Path, err: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::Config(format!("failed to parse {}: {}", path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.executor.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.bus.inbox_capacity, 256);
        assert_eq!(config.bus.max_message_size, 1024 * 1024);
        assert_eq!(config.task.output_buffer, 32);
        assert_eq!(config.task.dispatch_interval(), Duration::from_millis(100));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[executor]
default_timeout_secs = 5.0

[agents.helper]
type = "echo"
tools = ["bash"]

[tools.bash]
timeout_secs = 2.5
blocked_commands = ["rm -rf"]
"#
        )
        .unwrap();

        let config = RuntimeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.executor.default_timeout(), Duration::from_secs(5));

        let helper = config.agent("helper").unwrap();
        assert_eq!(helper.name, "helper");
        assert_eq!(helper.agent_type, "echo");
        assert!(helper.enabled);
        assert_eq!(helper.tools, vec!["bash".to_string()]);

        let bash = config.tool("bash").unwrap();
        assert_eq!(bash.timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(bash.blocked_commands, vec!["rm -rf".to_string()]);
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "bus:\n  inbox_capacity: 8\nagents:\n  worker:\n    type: scripted\n    enabled: false\n"
        )
        .unwrap();

        let config = RuntimeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bus.inbox_capacity, 8);
        assert!(!config.agent("worker").unwrap().enabled);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let err = RuntimeConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut config = RuntimeConfig::default();
        let mut agent = AgentConfig::new("a", "");
        agent.max_concurrent_tasks = 0;
        config.agents.insert("a".to_string(), agent);

        let mut tool = ToolConfig::new("t");
        tool.timeout_secs = Some(-1.0);
        config.tools.insert("t".to_string(), tool);
        config.bus.inbox_capacity = 0;

        let errors = config.validate();
        assert_eq!(errors.len(), 4);
        assert!(errors[0].contains("type is required"));
        assert!(errors[1].contains("max_concurrent_tasks"));
        assert!(errors[2].contains("timeout must be >= 0"));
        assert!(errors[3].contains("inbox_capacity"));
        assert!(config.ensure_valid().is_err());
    }
}
