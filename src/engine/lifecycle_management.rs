use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::bus::{Inbox, MessageBus};
use super::executor::ToolExecutor;
use super::protocol::CommunicationProtocol;
use super::task::{TaskContext, TaskStream, ToolSet};
use crate::capabilities::Agent;
use crate::config::{AgentConfig, RuntimeConfig};
use crate::error::{panic_message, Result, RuntimeError};
use crate::factory::{AgentFactory, AgentRegistry};
use crate::lifecycle::{
    LifecycleEvent, LifecycleHandler, LifecycleHooks, LifecycleRecord, LifecycleStage,
    SharedStatus,
};
use crate::tools::Tool;
use crate::types::{AgentContext, AgentId, AgentStatus, Message};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusSnapshot {
    pub id: AgentId,
    pub name: String,
    pub status: AgentStatus,
    pub accepting: bool,
    pub tools: Vec<String>,
    pub session_id: String,
    pub active_task: bool,
    pub variables: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub destroyed: Vec<AgentId>,
    pub failures: Vec<(AgentId, RuntimeError)>,
    pub cancelled_tools: usize,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The agent instance and its context. Exactly one party holds it at a
/// time: the record while idle, the running task otherwise.
struct AgentSlot {
    agent: Box<dyn Agent>,
    context: AgentContext,
}

struct ActiveTask {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

struct AgentRecord {
    name: String,
    status: SharedStatus,
    accepting: bool,
    slot: Option<AgentSlot>,
    tools: ToolSet,
    active: Option<ActiveTask>,
    inbox: Arc<Mutex<Inbox>>,
    tool_timeout: Option<Duration>,
    session_id: String,
    variables: usize,
    created_at: DateTime<Utc>,
}

impl AgentRecord {
    fn snapshot(&self, id: AgentId) -> AgentStatusSnapshot {
        let mut tools: Vec<String> = self.tools.keys().cloned().collect();
        tools.sort();
        AgentStatusSnapshot {
            id,
            name: self.name.clone(),
            status: self.status.get(),
            accepting: self.accepting,
            tools,
            session_id: self.session_id.clone(),
            active_task: self.active.is_some(),
            variables: self
                .slot
                .as_ref()
                .map(|s| s.context.variables.len())
                .unwrap_or(self.variables),
            created_at: self.created_at,
        }
    }
}

/// What a task takes out of the record while it runs.
struct TaskLease {
    id: AgentId,
    slot: AgentSlot,
    status: SharedStatus,
    tools: ToolSet,
    inbox: Arc<Mutex<Inbox>>,
    tool_timeout: Option<Duration>,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
}

enum TaskOutcome {
    Finished,
    Faulted(String),
    Cancelled,
}

struct Dispatcher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ManagerInner {
    agents: RwLock<HashMap<AgentId, AgentRecord>>,
    bus: Arc<MessageBus>,
    executor: Arc<ToolExecutor>,
    hooks: LifecycleHooks,
    config: RuntimeConfig,
    dispatcher: std::sync::Mutex<Option<Dispatcher>>,
}

/// Owns every live agent and drives it through its lifecycle.
///
/// Cloning is cheap and every clone manages the same agents.
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<ManagerInner>,
}

impl LifecycleManager {
    pub fn new(config: RuntimeConfig) -> Self {
        let bus = Arc::new(MessageBus::new(config.bus.clone()));
        let executor = Arc::new(ToolExecutor::from_config(&config));
        Self::with_components(config, bus, executor)
    }

    pub fn with_components(
        config: RuntimeConfig,
        bus: Arc<MessageBus>,
        executor: Arc<ToolExecutor>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                agents: RwLock::new(HashMap::new()),
                bus,
                executor,
                hooks: LifecycleHooks::new(),
                config,
                dispatcher: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.inner.bus
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.inner.executor
    }

    pub fn protocol(&self) -> CommunicationProtocol {
        CommunicationProtocol::new(self.inner.bus.clone())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn add_lifecycle_handler(&self, stage: LifecycleStage, handler: LifecycleHandler) {
        self.inner.hooks.add(stage, handler);
    }

    /// Builds an agent, runs its `initialize` hook and registers it on the
    /// bus. Nothing is registered if initialization fails.
    pub async fn create_agent(
        &self,
        factory: &dyn AgentFactory,
        name: &str,
        context: Option<AgentContext>,
    ) -> Result<AgentId> {
        let agent = factory
            .create(name)
            .map_err(|source| RuntimeError::Initialization {
                name: name.to_string(),
                source,
            })?;
        self.register_agent(agent, name, context, Vec::new(), None)
            .await
    }

    /// Creates an agent of `config.agent_type` from the registry, with the
    /// configured tools added to its own.
    pub async fn create_agent_from_config(
        &self,
        registry: &AgentRegistry,
        config: &AgentConfig,
        context: Option<AgentContext>,
    ) -> Result<AgentId> {
        if !config.enabled {
            return Err(RuntimeError::validation(format!(
                "agent '{}' is disabled",
                config.name
            )));
        }
        if config.max_concurrent_tasks > 1 {
            log::warn!(
                "Agent '{}' asks for {} concurrent tasks; agents run one task at a time",
                config.name,
                config.max_concurrent_tasks
            );
        }

        let extra_tools = config
            .tools
            .iter()
            .map(|name| registry.create_tool(name))
            .collect::<Result<Vec<_>>>()?;
        let agent = registry.create_agent(&config.agent_type, &config.name)?;

        let mut context = context.unwrap_or_default();
        for (key, value) in &config.environment {
            context
                .variables
                .entry(key.clone())
                .or_insert_with(|| json!(value));
        }

        self.register_agent(agent, &config.name, Some(context), extra_tools, config.timeout())
            .await
    }

    async fn register_agent(
        &self,
        mut agent: Box<dyn Agent>,
        name: &str,
        context: Option<AgentContext>,
        extra_tools: Vec<Arc<dyn Tool>>,
        tool_timeout: Option<Duration>,
    ) -> Result<AgentId> {
        let id = AgentId::new_v4();

        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        for tool in agent.tools() {
            let tool_name = tool.name().to_string();
            if tools.insert(tool_name.clone(), tool).is_some() {
                return Err(RuntimeError::validation(format!(
                    "agent '{}' registers tool '{}' twice",
                    name, tool_name
                )));
            }
        }
        for tool in extra_tools {
            tools.entry(tool.name().to_string()).or_insert(tool);
        }

        let mut context = context.unwrap_or_else(|| AgentContext::for_agent(id));
        if context.session_id.is_empty() {
            context.session_id = AgentContext::for_agent(id).session_id;
        }
        self.emit(LifecycleRecord::new(id, LifecycleStage::Created).with_metadata("name", json!(name)));

        let initialized = AssertUnwindSafe(agent.initialize(&mut context))
            .catch_unwind()
            .await;
        let failure = match initialized {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(panic) => Some(anyhow::anyhow!(panic_message("agent", panic))),
        };
        if let Some(source) = failure {
            log::error!("Agent '{}' failed to initialize: {:#}", name, source);
            self.emit(
                LifecycleRecord::new(id, LifecycleStage::Error)
                    .with_metadata("error", json!(format!("{:#}", source))),
            );
            return Err(RuntimeError::Initialization {
                name: name.to_string(),
                source,
            });
        }

        let status = SharedStatus::new(id, AgentStatus::Created);
        status.apply(LifecycleEvent::Initialized)?;
        let inbox = self.inner.bus.register(id);

        let record = AgentRecord {
            name: name.to_string(),
            status,
            accepting: false,
            tools: Arc::new(tools),
            active: None,
            inbox: Arc::new(Mutex::new(inbox)),
            tool_timeout,
            session_id: context.session_id.clone(),
            variables: context.variables.len(),
            slot: Some(AgentSlot { agent, context }),
            created_at: Utc::now(),
        };
        self.agents_mut().insert(id, record);

        log::info!("Created agent '{}' ({})", name, id);
        self.emit(LifecycleRecord::new(id, LifecycleStage::Initialized));
        Ok(id)
    }

    /// Marks the agent as accepting tasks.
    pub fn start_agent(&self, id: AgentId) -> Result<()> {
        {
            let mut agents = self.agents_mut();
            let record = agents
                .get_mut(&id)
                .ok_or_else(|| RuntimeError::agent_not_found(id))?;
            if !record.status.get().is_active() {
                record.status.apply(LifecycleEvent::Started)?;
            }
            record.accepting = true;
        }

        log::info!("Started agent {}", id);
        self.emit(LifecycleRecord::new(id, LifecycleStage::Started));
        Ok(())
    }

    /// Starts a task on the agent and returns its output stream.
    ///
    /// Fails with `AgentBusy` while another task holds the agent. The task
    /// runs on the current tokio runtime; dropping the stream cancels it.
    pub fn run_agent_task(&self, id: AgentId, input: impl Into<String>) -> Result<TaskStream> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RuntimeError::Config(format!("no async runtime: {}", e)))?;
        let lease = self.begin_task(id, "run a task on")?;

        let (output, receiver) = mpsc::channel(self.inner.config.task.output_buffer.max(1));
        let stream = TaskStream::new(id, lease.cancel.clone(), receiver);
        let input = input.into();

        let manager = self.clone();
        runtime.spawn(async move {
            manager.drive_task(lease, input, output).await;
        });

        Ok(stream)
    }

    async fn drive_task(&self, lease: TaskLease, input: String, output: mpsc::Sender<Message>) {
        let TaskLease {
            id,
            slot,
            status,
            tools,
            inbox,
            tool_timeout,
            cancel,
            done,
        } = lease;
        let AgentSlot { mut agent, context } = slot;

        let mut task = TaskContext::new(
            id,
            context,
            tools,
            self.inner.executor.clone(),
            self.inner.bus.clone(),
            status.clone(),
            inbox,
            cancel.clone(),
            tool_timeout,
        )
        .with_output(output);

        let outcome = {
            let body = AssertUnwindSafe(agent.run(input, &mut task)).catch_unwind();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => TaskOutcome::Cancelled,
                result = body => match result {
                    Ok(Ok(())) => TaskOutcome::Finished,
                    Ok(Err(e)) => TaskOutcome::Faulted(format!("{:#}", e)),
                    Err(panic) => TaskOutcome::Faulted(panic_message("agent", panic)),
                },
            }
        };

        if let TaskOutcome::Faulted(error) = &outcome {
            task.emit(Message::error(error.clone())).await;
        }

        let completed = task.is_marked_completed();
        let (context, output) = task.into_parts();
        self.finish_task(id, &status, AgentSlot { agent, context }, outcome, completed);
        drop(output);
        let _ = done.send(true);
    }

    /// Delivers everything waiting in the agent's inbox to `Agent::process`,
    /// one message at a time, and publishes the replies. Stops at the first
    /// fault, leaving later messages queued. Returns how many messages were
    /// handled.
    pub async fn process_pending(&self, id: AgentId) -> Result<usize> {
        let lease = self.begin_task(id, "process messages on")?;
        let TaskLease {
            id,
            slot,
            status,
            tools,
            inbox,
            tool_timeout,
            cancel,
            done,
        } = lease;
        let AgentSlot { mut agent, context } = slot;

        let mut task = TaskContext::new(
            id,
            context,
            tools,
            self.inner.executor.clone(),
            self.inner.bus.clone(),
            status.clone(),
            inbox.clone(),
            cancel.clone(),
            tool_timeout,
        );

        let mut handled = 0;
        let mut outcome = TaskOutcome::Finished;
        loop {
            if cancel.is_cancelled() {
                outcome = TaskOutcome::Cancelled;
                break;
            }
            let next = inbox.lock().await.try_recv();
            let Some(message) = next else {
                break;
            };

            let sender = message.sender;
            let message_id = message.id;
            task.set_reply_to(sender);

            let result = {
                let body = AssertUnwindSafe(agent.process(message, &mut task)).catch_unwind();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = body => Some(result),
                }
            };
            handled += 1;

            match result {
                None => {
                    outcome = TaskOutcome::Cancelled;
                    break;
                }
                Some(Ok(Ok(Some(mut reply)))) => {
                    reply.sender = Some(id);
                    if reply.recipient.is_none() {
                        reply.recipient = sender;
                    }
                    if let Err(e) = self.inner.bus.publish(reply, None) {
                        log::warn!("Agent {} produced an unpublishable reply: {}", id, e);
                    }
                }
                Some(Ok(Ok(None))) => {}
                Some(Ok(Err(e))) => {
                    outcome = TaskOutcome::Faulted(format!("{:#}", e));
                }
                Some(Err(panic)) => {
                    outcome = TaskOutcome::Faulted(panic_message("agent", panic));
                }
            }

            if let TaskOutcome::Faulted(error) = &outcome {
                let mut notice = Message::error(error.clone())
                    .from_agent(id)
                    .in_response_to(message_id);
                if let Some(sender) = sender {
                    notice = notice.to_agent(sender);
                }
                if let Err(e) = self.inner.bus.publish(notice, None) {
                    log::warn!("Could not report fault of agent {}: {}", id, e);
                }
                break;
            }
        }

        let completed = task.is_marked_completed();
        let (context, _) = task.into_parts();
        self.finish_task(id, &status, AgentSlot { agent, context }, outcome, completed);
        let _ = done.send(true);
        Ok(handled)
    }

    /// Starts a background loop that hands queued inbox messages to
    /// `Agent::process` every `task.dispatch_interval_ms`. Agents that are
    /// busy or not accepting are skipped until a later tick. Starting an
    /// already running loop does nothing.
    pub fn start_dispatch(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RuntimeError::Config(format!("no async runtime: {}", e)))?;
        let mut dispatcher = self.dispatcher();
        if dispatcher.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let period = self.inner.config.task.dispatch_interval();
        let manager = Arc::downgrade(&self.inner);
        let stop = cancel.clone();
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // The loop must not keep a dropped manager alive.
                let Some(inner) = manager.upgrade() else {
                    break;
                };
                LifecycleManager { inner }.dispatch_ready(&stop).await;
            }
            log::debug!("Dispatch loop exited");
        });

        *dispatcher = Some(Dispatcher { cancel, handle });
        log::info!("Started message dispatch every {:?}", period);
        Ok(())
    }

    /// Whether the dispatch loop is running.
    pub fn is_running(&self) -> bool {
        self.dispatcher()
            .as_ref()
            .is_some_and(|d| !d.handle.is_finished())
    }

    /// Stops the dispatch loop and waits for its current round to end.
    pub async fn stop_dispatch(&self) {
        let dispatcher = self.dispatcher().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.cancel.cancel();
            if let Err(e) = dispatcher.handle.await {
                log::warn!("Dispatch loop ended abnormally: {}", e);
            }
            log::info!("Stopped message dispatch");
        }
    }

    async fn dispatch_ready(&self, stop: &CancellationToken) {
        for id in self.ready_agents() {
            if stop.is_cancelled() {
                break;
            }
            match self.process_pending(id).await {
                Ok(0) => {}
                Ok(handled) => log::debug!("Dispatched {} messages to agent {}", handled, id),
                Err(
                    e @ (RuntimeError::AgentBusy(_)
                    | RuntimeError::NotFound { .. }
                    | RuntimeError::InvalidState { .. }),
                ) => log::debug!("Skipped dispatch to agent {}: {}", id, e),
                Err(e) => log::warn!("Dispatch to agent {} failed: {}", id, e),
            }
        }
    }

    fn ready_agents(&self) -> Vec<AgentId> {
        self.agents()
            .iter()
            .filter(|(_, record)| {
                record.accepting
                    && record.slot.is_some()
                    && record
                        .inbox
                        .try_lock()
                        .is_ok_and(|inbox| !inbox.is_empty())
            })
            .map(|(id, _)| *id)
            .collect()
    }

    fn begin_task(&self, id: AgentId, operation: &'static str) -> Result<TaskLease> {
        let mut agents = self.agents_mut();
        let record = agents
            .get_mut(&id)
            .ok_or_else(|| RuntimeError::agent_not_found(id))?;

        if !record.accepting {
            return Err(RuntimeError::InvalidState {
                id,
                status: record.status.get(),
                operation,
            });
        }
        let slot = record.slot.take().ok_or(RuntimeError::AgentBusy(id))?;

        if let Err(e) = record.status.apply(LifecycleEvent::TaskStarted) {
            record.slot = Some(slot);
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let (done, done_rx) = watch::channel(false);
        record.active = Some(ActiveTask {
            cancel: cancel.clone(),
            done: done_rx,
        });

        Ok(TaskLease {
            id,
            slot,
            status: record.status.clone(),
            tools: record.tools.clone(),
            inbox: record.inbox.clone(),
            tool_timeout: record.tool_timeout,
            cancel,
            done,
        })
    }

    /// Returns the agent to its record and settles the final status. Runs
    /// before the task's output closes, so a caller that saw the stream end
    /// can start the next task immediately.
    fn finish_task(
        &self,
        id: AgentId,
        status: &SharedStatus,
        slot: AgentSlot,
        outcome: TaskOutcome,
        completed: bool,
    ) {
        let event = match &outcome {
            TaskOutcome::Finished if completed => LifecycleEvent::TaskCompleted,
            TaskOutcome::Finished => LifecycleEvent::TaskFinished,
            TaskOutcome::Faulted(_) => LifecycleEvent::Faulted,
            TaskOutcome::Cancelled => LifecycleEvent::Stopped,
        };
        let final_status = status.try_apply(event);

        {
            let mut agents = self.agents_mut();
            if let Some(record) = agents.get_mut(&id) {
                record.variables = slot.context.variables.len();
                record.slot = Some(slot);
                record.active = None;
            }
        }

        match outcome {
            TaskOutcome::Faulted(error) => {
                log::warn!("Task on agent {} failed: {}", id, error);
                self.emit(
                    LifecycleRecord::new(id, LifecycleStage::Error).with_metadata("error", json!(error)),
                );
            }
            TaskOutcome::Cancelled => log::info!("Task on agent {} cancelled", id),
            TaskOutcome::Finished => {
                log::debug!("Task on agent {} finished as {:?}", id, final_status)
            }
        }
    }

    /// Cancels the running task, if any, and waits for the agent to come
    /// back. Stopping an idle agent does nothing.
    pub async fn stop_agent(&self, id: AgentId) -> Result<()> {
        let active = {
            let agents = self.agents();
            let record = agents
                .get(&id)
                .ok_or_else(|| RuntimeError::agent_not_found(id))?;
            record
                .active
                .as_ref()
                .map(|a| (a.cancel.clone(), a.done.clone()))
        };

        let Some((cancel, mut done)) = active else {
            self.settle_stopped(id);
            return Ok(());
        };

        cancel.cancel();
        let _ = done.wait_for(|finished| *finished).await;
        self.settle_stopped(id);

        log::info!("Stopped agent {}", id);
        self.emit(LifecycleRecord::new(id, LifecycleStage::Stopped));
        Ok(())
    }

    // A task started after the cancelled one owns the status; leave it alone.
    fn settle_stopped(&self, id: AgentId) {
        let agents = self.agents_mut();
        if let Some(record) = agents.get(&id) {
            if record.active.is_none() && record.status.get() != AgentStatus::Idle {
                record.status.try_apply(LifecycleEvent::Stopped);
            }
        }
    }

    /// Stops the agent, unregisters it from the bus, runs its teardown and
    /// forgets it. A failing teardown is reported after the agent is gone.
    pub async fn destroy_agent(&self, id: AgentId) -> Result<()> {
        {
            let mut agents = self.agents_mut();
            let record = agents
                .get_mut(&id)
                .ok_or_else(|| RuntimeError::agent_not_found(id))?;
            record.accepting = false;
        }

        self.stop_agent(id).await?;
        self.inner.bus.unregister(id);

        let record = self
            .agents_mut()
            .remove(&id)
            .ok_or_else(|| RuntimeError::agent_not_found(id))?;
        record.status.try_apply(LifecycleEvent::Destroyed);

        let teardown = match record.slot {
            Some(AgentSlot {
                mut agent,
                mut context,
            }) => {
                let result = AssertUnwindSafe(agent.stop(&mut context))
                    .catch_unwind()
                    .await;
                match result {
                    Ok(result) => result,
                    Err(panic) => Err(anyhow::anyhow!(panic_message("agent", panic))),
                }
            }
            None => Ok(()),
        };

        log::info!("Destroyed agent '{}' ({})", record.name, id);
        self.emit(LifecycleRecord::new(id, LifecycleStage::Destroyed));

        teardown.map_err(|source| {
            log::error!("Teardown of agent {} failed: {:#}", id, source);
            RuntimeError::Teardown { id, source }
        })
    }

    /// Stops the dispatch loop, destroys every agent, then cancels whatever
    /// tool calls remain. One agent failing to tear down does not stop the
    /// sweep.
    pub async fn shutdown(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        let dispatcher = self.dispatcher().take();
        if let Some(dispatcher) = &dispatcher {
            dispatcher.cancel.cancel();
        }

        for id in self.list_agents() {
            match self.destroy_agent(id).await {
                Ok(()) => report.destroyed.push(id),
                Err(RuntimeError::NotFound { .. }) => {}
                Err(e) => {
                    report.destroyed.push(id);
                    report.failures.push((id, e));
                }
            }
        }

        report.cancelled_tools = self.inner.executor.cancel_all_tools();
        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.handle.await {
                log::warn!("Dispatch loop ended abnormally: {}", e);
            }
        }
        log::info!(
            "Shut down {} agents ({} teardown failures)",
            report.destroyed.len(),
            report.failures.len()
        );
        report
    }

    pub fn get_agent_status(&self, id: AgentId) -> Result<AgentStatusSnapshot> {
        self.agents()
            .get(&id)
            .map(|record| record.snapshot(id))
            .ok_or_else(|| RuntimeError::agent_not_found(id))
    }

    pub fn get_all_agents_status(&self) -> Vec<AgentStatusSnapshot> {
        let mut snapshots: Vec<AgentStatusSnapshot> = self
            .agents()
            .iter()
            .map(|(id, record)| record.snapshot(*id))
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        snapshots
    }

    pub fn list_agents(&self) -> Vec<AgentId> {
        self.agents().keys().copied().collect()
    }

    pub fn find_agent(&self, name: &str) -> Option<AgentId> {
        self.agents()
            .iter()
            .find(|(_, record)| record.name == name)
            .map(|(id, _)| *id)
    }

    fn emit(&self, record: LifecycleRecord) {
        self.inner.hooks.emit(record);
    }

    fn dispatcher(&self) -> std::sync::MutexGuard<'_, Option<Dispatcher>> {
        self.inner
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn agents(&self) -> RwLockReadGuard<'_, HashMap<AgentId, AgentRecord>> {
        self.inner.agents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn agents_mut(&self) -> RwLockWriteGuard<'_, HashMap<AgentId, AgentRecord>> {
        self.inner.agents.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}
