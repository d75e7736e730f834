use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ExecutorConfig, RuntimeConfig, ToolConfig};
use crate::error::panic_message;
use crate::tools::{
    validate_arguments, ResourceUsage, Tool, ToolCall, ToolContext, ToolLimits, ToolResult,
    CANCELLED_ERROR, TIMEOUT_ERROR,
};
use crate::types::{AgentContext, AgentId};

/// Who is asking for a tool call and under which budget.
#[derive(Debug, Clone, Default)]
pub struct ExecutionScope {
    pub agent_id: Option<AgentId>,
    /// Cancelling this token cancels the call. Cancelling the call never
    /// touches this token.
    pub parent: Option<CancellationToken>,
    pub agent_timeout: Option<Duration>,
}

impl ExecutionScope {
    pub fn for_agent(agent_id: AgentId) -> Self {
        Self {
            agent_id: Some(agent_id),
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.agent_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InFlightTool {
    pub call_id: Uuid,
    pub tool_name: String,
    pub agent_id: Option<AgentId>,
    pub elapsed: Duration,
}

/// Point-in-time view of the executor counters. Fields are read one by one,
/// so they need not agree with each other under concurrent calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorUsage {
    pub active: usize,
    pub total_calls: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub cancellations: u64,
    pub cumulative_time: Duration,
    pub in_flight: Vec<InFlightTool>,
}

struct InFlightEntry {
    tool_name: String,
    agent_id: Option<AgentId>,
    started: Instant,
    token: CancellationToken,
}

enum Outcome {
    Succeeded(Value),
    Failed(String),
    TimedOut,
    Cancelled,
}

/// Runs tools under a deadline and turns every fault into a failed
/// `ToolResult`.
pub struct ToolExecutor {
    default_timeout: Duration,
    max_memory_mb: u64,
    tool_configs: HashMap<String, ToolConfig>,
    in_flight: Mutex<HashMap<Uuid, InFlightEntry>>,
    active: AtomicUsize,
    total_calls: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    cancellations: AtomicU64,
    cumulative_micros: AtomicU64,
}

impl ToolExecutor {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            default_timeout: config.default_timeout(),
            max_memory_mb: config.max_memory_mb,
            tool_configs: HashMap::new(),
            in_flight: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            total_calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            cancellations: AtomicU64::new(0),
            cumulative_micros: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(&config.executor).with_tool_configs(config.tools.clone())
    }

    pub fn with_tool_configs(mut self, tool_configs: HashMap<String, ToolConfig>) -> Self {
        self.tool_configs = tool_configs;
        self
    }

    pub fn with_tool_config(mut self, config: ToolConfig) -> Self {
        self.tool_configs.insert(config.name.clone(), config);
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Deadline for one call: tool config, then the tool itself, then the
    /// agent, then the executor default.
    pub fn effective_timeout(&self, tool: &dyn Tool, agent_timeout: Option<Duration>) -> Duration {
        self.tool_configs
            .get(tool.name())
            .and_then(ToolConfig::timeout)
            .or_else(|| tool.timeout())
            .or(agent_timeout)
            .unwrap_or(self.default_timeout)
    }

    pub async fn execute_tool(
        &self,
        tool: &dyn Tool,
        arguments: Value,
        context: &AgentContext,
    ) -> ToolResult {
        self.execute_call(
            tool,
            ToolCall::new(tool.name(), arguments),
            context,
            ExecutionScope::default(),
        )
        .await
    }

    pub async fn execute_call(
        &self,
        tool: &dyn Tool,
        call: ToolCall,
        context: &AgentContext,
        scope: ExecutionScope,
    ) -> ToolResult {
        let name = tool.name().to_string();
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let config = self.tool_configs.get(&name);

        if config.is_some_and(|c| !c.enabled) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("Tool '{}' is disabled", name);
            return ToolResult::failure(&name, format!("tool '{}' is disabled", name))
                .with_call_id(call.id);
        }

        if let Err(e) = validate_arguments(&tool.parameters_schema(), &call.arguments) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("Rejected arguments for tool '{}': {}", name, e);
            return ToolResult::failure(&name, format!("invalid arguments: {}", e))
                .with_call_id(call.id);
        }

        let timeout = self.effective_timeout(tool, scope.agent_timeout);
        let token = scope
            .parent
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();

        let mut limits = config.map(ToolLimits::from_config).unwrap_or_default();
        limits.max_memory_mb.get_or_insert(self.max_memory_mb);

        let tool_context = ToolContext::new(context)
            .with_agent_id(scope.agent_id)
            .with_limits(limits)
            .with_cancellation(token.clone());

        let _guard = self.track(call.id, &name, scope.agent_id, token.clone());
        log::debug!("Executing tool '{}' (call {}, timeout {:?})", name, call.id, timeout);

        let started = Instant::now();
        let action = AssertUnwindSafe(tool.execute(call.arguments, &tool_context)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Outcome::Cancelled,
            result = tokio::time::timeout(timeout, action) => match result {
                Err(_) => Outcome::TimedOut,
                Ok(Err(panic)) => Outcome::Failed(panic_message("tool", panic)),
                Ok(Ok(Err(e))) => Outcome::Failed(format!("{:#}", e)),
                Ok(Ok(Ok(value))) => Outcome::Succeeded(value),
            },
        };
        let elapsed = started.elapsed();

        // Anything the tool spawned off the token stops with the call.
        token.cancel();

        self.cumulative_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        let usage = ResourceUsage {
            elapsed,
            memory_high_water_bytes: tool_context.memory_high_water(),
        };

        let result = match outcome {
            Outcome::Succeeded(value) => ToolResult::success(&name, value),
            Outcome::Failed(error) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("Tool '{}' failed: {}", name, error);
                ToolResult::failure(&name, error)
            }
            Outcome::TimedOut => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                log::warn!("Tool '{}' timed out after {:?}", name, timeout);
                ToolResult::failure(&name, TIMEOUT_ERROR)
            }
            Outcome::Cancelled => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.cancellations.fetch_add(1, Ordering::Relaxed);
                log::info!("Tool '{}' cancelled", name);
                ToolResult::failure(&name, CANCELLED_ERROR)
            }
        };

        result.with_call_id(call.id).with_usage(usage)
    }

    /// Cancels every call in flight right now. Calls that start afterwards
    /// are unaffected. Returns how many calls were signalled.
    pub fn cancel_all_tools(&self) -> usize {
        let drained: Vec<(Uuid, InFlightEntry)> = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            let drained: Vec<_> = in_flight.drain().collect();
            self.active.fetch_sub(drained.len(), Ordering::SeqCst);
            drained
        };

        for (call_id, entry) in &drained {
            log::info!("Cancelling tool '{}' (call {})", entry.tool_name, call_id);
            entry.token.cancel();
        }
        drained.len()
    }

    pub fn cancel_tool(&self, call_id: Uuid) -> bool {
        match self.untrack(call_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn get_resource_usage(&self) -> ExecutorUsage {
        let in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(call_id, entry)| InFlightTool {
                call_id: *call_id,
                tool_name: entry.tool_name.clone(),
                agent_id: entry.agent_id,
                elapsed: entry.started.elapsed(),
            })
            .collect();

        ExecutorUsage {
            active: self.active.load(Ordering::SeqCst),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            cumulative_time: Duration::from_micros(self.cumulative_micros.load(Ordering::Relaxed)),
            in_flight,
        }
    }

    fn track(
        &self,
        call_id: Uuid,
        tool_name: &str,
        agent_id: Option<AgentId>,
        token: CancellationToken,
    ) -> InFlightGuard<'_> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.insert(
            call_id,
            InFlightEntry {
                tool_name: tool_name.to_string(),
                agent_id,
                started: Instant::now(),
                token,
            },
        );
        self.active.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            executor: self,
            call_id,
        }
    }

    fn untrack(&self, call_id: Uuid) -> Option<InFlightEntry> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = in_flight.remove(&call_id);
        if entry.is_some() {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
        entry
    }
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new(&ExecutorConfig::default())
    }
}

/// Removes the call from the in-flight table however the call ends,
/// including when the calling future is dropped.
struct InFlightGuard<'a> {
    executor: &'a ToolExecutor,
    call_id: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.executor.untrack(self.call_id);
    }
}
