use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::bus::{Inbox, MessageBus, PublishReport};
use super::executor::{ExecutionScope, ToolExecutor};
use super::protocol::CommunicationProtocol;
use crate::error::Result;
use crate::lifecycle::{LifecycleEvent, SharedStatus};
use crate::tools::{Tool, ToolCall, ToolResult};
use crate::types::{AgentContext, AgentId, Message, MessageType};

pub type ToolSet = Arc<HashMap<String, Arc<dyn Tool>>>;

/// Everything an agent body can touch while it owns the agent for one task.
pub struct TaskContext {
    agent_id: AgentId,
    pub context: AgentContext,
    tools: ToolSet,
    executor: Arc<ToolExecutor>,
    bus: Arc<MessageBus>,
    status: SharedStatus,
    inbox: Arc<Mutex<Inbox>>,
    output: Option<mpsc::Sender<Message>>,
    cancellation: CancellationToken,
    tool_timeout: Option<Duration>,
    reply_to: Option<AgentId>,
    completed: bool,
}

impl TaskContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        agent_id: AgentId,
        context: AgentContext,
        tools: ToolSet,
        executor: Arc<ToolExecutor>,
        bus: Arc<MessageBus>,
        status: SharedStatus,
        inbox: Arc<Mutex<Inbox>>,
        cancellation: CancellationToken,
        tool_timeout: Option<Duration>,
    ) -> Self {
        Self {
            agent_id,
            context,
            tools,
            executor,
            bus,
            status,
            inbox,
            output: None,
            cancellation,
            tool_timeout,
            reply_to: None,
            completed: false,
        }
    }

    pub(crate) fn with_output(mut self, output: mpsc::Sender<Message>) -> Self {
        self.output = Some(output);
        self
    }

    pub(crate) fn set_reply_to(&mut self, reply_to: Option<AgentId>) {
        self.reply_to = reply_to;
    }

    /// Splits off the output channel so the caller decides when the stream
    /// ends.
    pub(crate) fn into_parts(self) -> (AgentContext, Option<mpsc::Sender<Message>>) {
        (self.context, self.output)
    }

    pub(crate) fn is_marked_completed(&self) -> bool {
        self.completed
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn status(&self) -> crate::types::AgentStatus {
        self.status.get()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Ends the task in `Completed` rather than `Idle`.
    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    /// Hands a message to the caller of the task. Without a caller (mailbox
    /// dispatch) the message goes on the bus instead, addressed to whoever
    /// sent the message being processed.
    ///
    /// Returns false once nobody is listening.
    pub async fn emit(&self, mut message: Message) -> bool {
        if message.sender.is_none() {
            message.sender = Some(self.agent_id);
        }

        let Some(output) = &self.output else {
            if message.recipient.is_none() {
                message.recipient = self.reply_to;
            }
            return match self.bus.publish(message, None) {
                Ok(_) => true,
                Err(e) => {
                    log::warn!("Agent {} could not publish: {}", self.agent_id, e);
                    false
                }
            };
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => false,
            sent = output.send(message) => sent.is_ok(),
        }
    }

    pub async fn respond(&self, content: impl Into<String>) -> bool {
        self.emit(Message::response(content)).await
    }

    /// Runs one of the agent's tools through the executor. The agent sits in
    /// `Acting` for the duration of the call.
    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> ToolResult {
        let call = ToolCall::new(name, arguments);
        let Some(tool) = self.tools.get(name).cloned() else {
            log::warn!("Agent {} asked for unknown tool '{}'", self.agent_id, name);
            return ToolResult::failure(name, format!("tool '{}' not found", name))
                .with_call_id(call.id);
        };

        self.status.try_apply(LifecycleEvent::ToolInvoked);
        let scope = ExecutionScope::for_agent(self.agent_id)
            .with_parent(self.cancellation.clone())
            .with_agent_timeout(self.tool_timeout);
        let result = self
            .executor
            .execute_call(tool.as_ref(), call, &self.context, scope)
            .await;
        self.status.try_apply(LifecycleEvent::ToolReturned);

        result
    }

    /// Calls a tool and emits the call and its result as messages.
    pub async fn call_tool_reporting(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> ToolResult {
        let call = ToolCall::new(name, arguments.clone());
        self.emit(call.to_message(self.agent_id)).await;

        let result = self.call_tool(name, arguments).await.with_call_id(call.id);
        self.emit(result.to_message(self.agent_id)).await;
        result
    }

    /// Waits for the next message in the agent's inbox. `None` on timeout
    /// or cancellation.
    pub async fn wait_for_message(&self, timeout: Option<Duration>) -> Option<Message> {
        self.status.try_apply(LifecycleEvent::AwaitingMessage);

        let received = {
            let mut inbox = self.inbox.lock().await;
            tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => None,
                message = async {
                    match timeout {
                        Some(limit) => inbox.recv_timeout(limit).await,
                        None => inbox.recv().await,
                    }
                } => message,
            }
        };

        self.status.try_apply(LifecycleEvent::MessageReceived);
        received
    }

    pub fn publish(&self, mut message: Message, topic: Option<&str>) -> Result<PublishReport> {
        if message.sender.is_none() {
            message.sender = Some(self.agent_id);
        }
        self.bus.publish(message, topic)
    }

    pub fn protocol(&self) -> CommunicationProtocol {
        CommunicationProtocol::new(self.bus.clone())
    }
}

/// Messages produced by a running task, in production order.
///
/// The stream ends when the task finishes. Dropping it cancels the task.
pub struct TaskStream {
    agent_id: AgentId,
    cancellation: CancellationToken,
    inner: ReceiverStream<Message>,
    _guard: DropGuard,
}

impl TaskStream {
    pub(crate) fn new(
        agent_id: AgentId,
        cancellation: CancellationToken,
        receiver: mpsc::Receiver<Message>,
    ) -> Self {
        Self {
            agent_id,
            _guard: cancellation.clone().drop_guard(),
            cancellation,
            inner: ReceiverStream::new(receiver),
        }
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Drains the stream until the task ends.
    pub async fn collect_all(mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = futures::StreamExt::next(&mut self).await {
            messages.push(message);
        }
        messages
    }

    /// Reads until the first `Response`. The rest of the task is cancelled
    /// when the stream is dropped.
    pub async fn first_response(mut self) -> Option<Message> {
        while let Some(message) = futures::StreamExt::next(&mut self).await {
            if message.message_type == MessageType::Response {
                return Some(message);
            }
        }
        None
    }
}

impl Stream for TaskStream {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}
