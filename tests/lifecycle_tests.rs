//! Integration tests for agent lifecycle management: task ownership,
//! cancellation, fault reporting, message dispatch and teardown.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agten::capabilities::{EchoAgent, ScriptedAgent};
use agten::config::{AgentConfig, TaskConfig};
use agten::factory::AgentFactory;
use agten::lifecycle::{LifecycleRecord, LifecycleStage};
use agten::tools::{Tool, ToolContext};
use agten::types::{AgentContext, AgentId, AgentStatus, Message, MessageType, Metadata};
use agten::{Agent, AgentRegistry, LifecycleManager, RuntimeConfig, RuntimeError, TaskContext};

/// Blocks until its call is cancelled.
struct Sleeper;

#[async_trait]
impl Tool for Sleeper {
    fn name(&self) -> &str {
        "sleeper"
    }

    fn description(&self) -> &str {
        "Sleeps until cancelled"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _params: Value, context: &ToolContext<'_>) -> Result<Value> {
        tokio::select! {
            _ = context.cancellation.cancelled() => Ok(json!("woken")),
            _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(json!("slept")),
        }
    }
}

/// Agent whose setup or teardown can be made to fail.
struct Fragile {
    fail_init: bool,
    fail_stop: bool,
}

#[async_trait]
impl Agent for Fragile {
    fn name(&self) -> &str {
        "fragile"
    }

    async fn initialize(&mut self, _context: &mut AgentContext) -> Result<()> {
        if self.fail_init {
            bail!("no credentials");
        }
        Ok(())
    }

    async fn process(&mut self, _message: Message, _task: &mut TaskContext) -> Result<Option<Message>> {
        Ok(None)
    }

    async fn run(&mut self, input: String, task: &mut TaskContext) -> Result<()> {
        task.respond(input).await;
        Ok(())
    }

    async fn stop(&mut self, _context: &mut AgentContext) -> Result<()> {
        if self.fail_stop {
            bail!("socket already closed");
        }
        Ok(())
    }
}

fn fragile(fail_init: bool, fail_stop: bool) -> impl AgentFactory {
    move |_: &str| -> Box<dyn Agent> { Box::new(Fragile { fail_init, fail_stop }) }
}

fn sleepy_scripted() -> impl AgentFactory {
    |name: &str| -> Box<dyn Agent> {
        Box::new(ScriptedAgent::new(name).with_tool(Arc::new(Sleeper)))
    }
}

async fn started(manager: &LifecycleManager, factory: &dyn AgentFactory, name: &str) -> AgentId {
    let id = manager.create_agent(factory, name, None).await.unwrap();
    manager.start_agent(id).unwrap();
    id
}

async fn wait_for_tool_call(manager: &LifecycleManager) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.executor().active_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("tool call never started");
}

async fn wait_for_status(manager: &LifecycleManager, id: AgentId, wanted: AgentStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.get_agent_status(id).unwrap().status != wanted {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("agent never reached {:?}", wanted));
}

#[tokio::test]
async fn test_second_task_is_rejected_while_busy() {
    let manager = LifecycleManager::default();
    let id = started(&manager, &sleepy_scripted(), "busy").await;

    let first = manager.run_agent_task(id, "sleep 5000").unwrap();
    let err = manager.run_agent_task(id, "hello").err().unwrap();
    assert!(matches!(err, RuntimeError::AgentBusy(busy) if busy == id));

    first.cancel();
    manager.stop_agent(id).await.unwrap();

    let messages = manager.run_agent_task(id, "hello").unwrap().collect_all().await;
    assert_eq!(messages.last().unwrap().content, "hello");
}

#[tokio::test]
async fn test_dropping_stream_cancels_task_and_tool() {
    let manager = LifecycleManager::default();
    let id = started(&manager, &sleepy_scripted(), "dropper").await;

    let stream = manager.run_agent_task(id, "tool sleeper {}").unwrap();
    wait_for_tool_call(&manager).await;
    assert_eq!(manager.get_agent_status(id).unwrap().status, AgentStatus::Acting);

    drop(stream);
    wait_for_status(&manager, id, AgentStatus::Idle).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.get_agent_status(id).unwrap().active_task {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(manager.executor().active_count(), 0);
    assert!(manager.executor().get_resource_usage().in_flight.is_empty());
}

#[tokio::test]
async fn test_cancel_all_tools_lets_task_finish() {
    let manager = LifecycleManager::default();
    let id = started(&manager, &sleepy_scripted(), "worker").await;

    let mut stream = manager
        .run_agent_task(id, "tool sleeper {}\nstill here")
        .unwrap();
    let call = stream.next().await.unwrap();
    assert_eq!(call.message_type, MessageType::ToolCall);

    wait_for_tool_call(&manager).await;
    assert_eq!(manager.get_agent_status(id).unwrap().status, AgentStatus::Acting);
    assert_eq!(manager.executor().cancel_all_tools(), 1);

    let rest = stream.collect_all().await;
    let kinds: Vec<MessageType> = rest.iter().map(|m| m.message_type).collect();
    assert_eq!(kinds, vec![MessageType::ToolResult, MessageType::Response]);
    assert_eq!(rest[0].metadata["success"], json!(false));
    assert_eq!(rest[1].content, "still here");
    assert_eq!(manager.get_agent_status(id).unwrap().status, AgentStatus::Idle);
}

#[tokio::test]
async fn test_waiting_agent_receives_message() {
    let manager = LifecycleManager::default();
    let id = started(&manager, &sleepy_scripted(), "listener").await;

    let stream = manager.run_agent_task(id, "wait 5").unwrap();
    wait_for_status(&manager, id, AgentStatus::Waiting).await;

    manager
        .protocol()
        .send_task(AgentId::new_v4(), id, "the answer", Metadata::new())
        .unwrap();

    let response = stream.first_response().await.unwrap();
    assert_eq!(response.content, "the answer");
}

#[tokio::test]
async fn test_failed_initialization_registers_nothing() {
    let manager = LifecycleManager::default();
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = errors.clone();
    manager.add_lifecycle_handler(
        LifecycleStage::Error,
        Arc::new(move |_: &LifecycleRecord| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let err = manager
        .create_agent(&fragile(true, false), "fragile", None)
        .await
        .unwrap_err();

    assert!(matches!(err, RuntimeError::Initialization { .. }));
    assert!(err.to_string().contains("no credentials"));
    assert!(manager.list_agents().is_empty());
    assert_eq!(manager.bus().stats().registered, 0);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_destroyed_agent_is_gone() {
    let manager = LifecycleManager::default();
    let echo = |name: &str| -> Box<dyn Agent> { Box::new(EchoAgent::new(name)) };
    let id = started(&manager, &echo, "echo").await;

    manager.destroy_agent(id).await.unwrap();

    assert!(manager.get_agent_status(id).unwrap_err().is_not_found());
    assert!(manager.start_agent(id).unwrap_err().is_not_found());
    assert!(manager.run_agent_task(id, "x").err().unwrap().is_not_found());
    assert!(manager.stop_agent(id).await.unwrap_err().is_not_found());
    assert!(!manager.bus().is_registered(id));
}

#[tokio::test]
async fn test_teardown_failure_is_reported_after_removal() {
    let manager = LifecycleManager::default();
    let id = started(&manager, &fragile(false, true), "fragile").await;

    let err = manager.destroy_agent(id).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Teardown { id: failed, .. } if failed == id));
    assert!(manager.find_agent("fragile").is_none());
}

#[tokio::test]
async fn test_shutdown_collects_partial_failures() {
    let manager = LifecycleManager::default();
    let good = started(&manager, &fragile(false, false), "good").await;
    let bad = started(&manager, &fragile(false, true), "bad").await;

    let report = manager.shutdown().await;

    assert!(!report.is_clean());
    assert_eq!(report.destroyed.len(), 2);
    assert!(report.destroyed.contains(&good));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, bad);
    assert!(manager.list_agents().is_empty());
}

#[tokio::test]
async fn test_lifecycle_hooks_fire_in_order() {
    let manager = LifecycleManager::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for stage in [
        LifecycleStage::Created,
        LifecycleStage::Initialized,
        LifecycleStage::Started,
        LifecycleStage::Destroyed,
    ] {
        let seen = seen.clone();
        manager.add_lifecycle_handler(
            stage,
            Arc::new(move |record: &LifecycleRecord| seen.lock().unwrap().push(record.stage)),
        );
    }

    let echo = |name: &str| -> Box<dyn Agent> { Box::new(EchoAgent::new(name)) };
    let id = started(&manager, &echo, "echo").await;
    manager.destroy_agent(id).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            LifecycleStage::Created,
            LifecycleStage::Initialized,
            LifecycleStage::Started,
            LifecycleStage::Destroyed,
        ]
    );
}

#[tokio::test]
async fn test_process_pending_fault_replies_with_error() {
    let manager = LifecycleManager::default();
    let id = started(&manager, &sleepy_scripted(), "mailbox").await;

    let caller = AgentId::new_v4();
    let mut caller_inbox = manager.bus().register(caller);
    let protocol = manager.protocol();
    let doomed = protocol
        .send_task(caller, id, "fail disk full", Metadata::new())
        .unwrap();
    protocol
        .send_task(caller, id, "later", Metadata::new())
        .unwrap();

    assert_eq!(manager.process_pending(id).await.unwrap(), 1);

    let notice = caller_inbox.try_recv().unwrap();
    assert_eq!(notice.message_type, MessageType::Error);
    assert!(notice.content.contains("disk full"));
    assert_eq!(notice.metadata["in_response_to"], json!(doomed.id.to_string()));
    assert_eq!(manager.get_agent_status(id).unwrap().status, AgentStatus::Error);

    // The queued message survives the fault.
    assert_eq!(manager.process_pending(id).await.unwrap(), 1);
    assert_eq!(caller_inbox.try_recv().unwrap().content, "later");
}

#[tokio::test]
async fn test_create_from_config() {
    let manager = LifecycleManager::default();
    let sandbox = tempfile::tempdir().unwrap();
    let registry = AgentRegistry::with_defaults(sandbox.path().to_path_buf());

    let mut disabled = AgentConfig::new("off", "echo");
    disabled.enabled = false;
    let err = manager
        .create_agent_from_config(&registry, &disabled, None)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Validation(_)));

    let unknown = AgentConfig::new("ghost", "oracle");
    let err = manager
        .create_agent_from_config(&registry, &unknown, None)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::NotFound { kind: "agent type", .. }));

    let mut config = AgentConfig::new("reader", "echo");
    config.tools = vec!["read_file".to_string()];
    config
        .environment
        .insert("REGION".to_string(), "eu".to_string());
    let id = manager
        .create_agent_from_config(&registry, &config, None)
        .await
        .unwrap();

    let snapshot = manager.get_agent_status(id).unwrap();
    assert_eq!(snapshot.name, "reader");
    assert_eq!(snapshot.tools, vec!["read_file".to_string()]);
    assert_eq!(manager.find_agent("reader"), Some(id));
}

async fn assert_settled_idle(manager: &LifecycleManager, id: AgentId) {
    let snapshot = manager.get_agent_status(id).unwrap();
    assert_eq!(snapshot.status, AgentStatus::Idle);
    assert!(!snapshot.active_task);
    assert_eq!(manager.executor().active_count(), 0);
}

#[tokio::test]
async fn test_stop_while_acting_settles_idle() {
    let manager = LifecycleManager::default();
    let id = started(&manager, &sleepy_scripted(), "actor").await;

    let _stream = manager.run_agent_task(id, "tool sleeper {}").unwrap();
    wait_for_tool_call(&manager).await;
    assert_eq!(manager.get_agent_status(id).unwrap().status, AgentStatus::Acting);

    manager.stop_agent(id).await.unwrap();
    assert_settled_idle(&manager, id).await;
}

#[tokio::test]
async fn test_stop_while_waiting_settles_idle() {
    let manager = LifecycleManager::default();
    let id = started(&manager, &sleepy_scripted(), "waiter").await;

    let _stream = manager.run_agent_task(id, "wait 30").unwrap();
    wait_for_status(&manager, id, AgentStatus::Waiting).await;

    manager.stop_agent(id).await.unwrap();
    assert_settled_idle(&manager, id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_leaves_next_task_running() {
    let manager = LifecycleManager::default();
    let id = started(&manager, &sleepy_scripted(), "relay").await;

    for _ in 0..50 {
        let first = manager.run_agent_task(id, "sleep 5000").unwrap();
        let stopper = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.stop_agent(id).await })
        };

        // The stream closes only after the agent is back in its record.
        first.collect_all().await;
        let second = manager.run_agent_task(id, "sleep 5000").unwrap();
        stopper.await.unwrap().unwrap();

        let snapshot = manager.get_agent_status(id).unwrap();
        assert!(snapshot.active_task);
        assert_eq!(snapshot.status, AgentStatus::Thinking);

        second.cancel();
        manager.stop_agent(id).await.unwrap();
        assert_settled_idle(&manager, id).await;
    }
}

fn fast_dispatch() -> LifecycleManager {
    LifecycleManager::new(RuntimeConfig {
        task: TaskConfig {
            dispatch_interval_ms: 10,
            ..TaskConfig::default()
        },
        ..RuntimeConfig::default()
    })
}

#[tokio::test]
async fn test_dispatch_loop_answers_queued_messages() {
    let manager = fast_dispatch();
    let echo = |name: &str| -> Box<dyn Agent> { Box::new(EchoAgent::new(name)) };
    let id = started(&manager, &echo, "echo").await;

    assert!(!manager.is_running());
    manager.start_dispatch().unwrap();
    manager.start_dispatch().unwrap();
    assert!(manager.is_running());

    let caller = AgentId::new_v4();
    let mut caller_inbox = manager.bus().register(caller);
    manager
        .protocol()
        .send_task(caller, id, "ping", Metadata::new())
        .unwrap();

    let reply = caller_inbox
        .recv_timeout(Duration::from_secs(5))
        .await
        .expect("no reply from dispatched agent");
    assert_eq!(reply.content, "ping");
    assert_eq!(reply.sender, Some(id));

    let report = manager.shutdown().await;
    assert!(report.is_clean());
    assert!(!manager.is_running());
}

#[tokio::test]
async fn test_dispatch_waits_for_start_and_free_slot() {
    let manager = fast_dispatch();
    let id = manager
        .create_agent(&sleepy_scripted(), "late", None)
        .await
        .unwrap();
    manager.start_dispatch().unwrap();

    let caller = AgentId::new_v4();
    let mut caller_inbox = manager.bus().register(caller);
    let protocol = manager.protocol();
    protocol
        .send_task(caller, id, "first", Metadata::new())
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(caller_inbox.try_recv().is_none());

    manager.start_agent(id).unwrap();
    let busy = manager.run_agent_task(id, "sleep 5000").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(caller_inbox.try_recv().is_none());

    busy.cancel();
    manager.stop_agent(id).await.unwrap();
    let reply = caller_inbox
        .recv_timeout(Duration::from_secs(5))
        .await
        .expect("queued message was never dispatched");
    assert_eq!(reply.content, "first");

    manager.stop_dispatch().await;
    manager.stop_dispatch().await;
    assert!(!manager.is_running());

    protocol
        .send_task(caller, id, "second", Metadata::new())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(caller_inbox.try_recv().is_none());
    assert_eq!(manager.process_pending(id).await.unwrap(), 1);
}
