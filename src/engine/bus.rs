use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::conversation::ConversationState;
use crate::config::BusConfig;
use crate::error::{Result, RuntimeError};
use crate::types::{AgentId, ConversationId, Message, Metadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    InboxFull,
    InboxClosed,
    UnknownRecipient,
}

/// Called for every delivery the bus gives up on.
pub type DropHook = Arc<dyn Fn(&Message, AgentId, DropReason) + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    pub delivered: Vec<AgentId>,
    pub dropped: Vec<AgentId>,
}

impl PublishReport {
    pub fn delivered_to(&self, agent_id: AgentId) -> bool {
        self.delivered.contains(&agent_id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusStats {
    pub registered: usize,
    pub topics: usize,
    pub conversations: usize,
    pub delivered: u64,
    pub dropped: u64,
    pub undeliverable: u64,
}

/// Receiving end of an agent's direct feed.
pub struct Inbox {
    agent_id: AgentId,
    receiver: mpsc::Receiver<Message>,
}

impl Inbox {
    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    /// `None` if nothing arrives in time or the agent was unregistered.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.receiver.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            messages.push(message);
        }
        messages
    }
}

/// In-process router for agent messages.
///
/// Publishing never blocks: each agent has a bounded inbox and a delivery
/// that does not fit is dropped, counted and logged. Conversation history is
/// guarded per conversation, so traffic in one conversation never waits on
/// another.
pub struct MessageBus {
    config: BusConfig,
    inboxes: RwLock<HashMap<AgentId, mpsc::Sender<Message>>>,
    direct: RwLock<HashSet<AgentId>>,
    topics: RwLock<HashMap<String, HashSet<AgentId>>>,
    conversations: RwLock<HashMap<ConversationId, Arc<Mutex<ConversationState>>>>,
    drop_hook: RwLock<Option<DropHook>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
    undeliverable: AtomicU64,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            inboxes: RwLock::new(HashMap::new()),
            direct: RwLock::new(HashSet::new()),
            topics: RwLock::new(HashMap::new()),
            conversations: RwLock::new(HashMap::new()),
            drop_hook: RwLock::new(None),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            undeliverable: AtomicU64::new(0),
        }
    }

    /// Creates the agent's inbox and subscribes it to direct delivery.
    /// Registering again replaces the inbox.
    pub fn register(&self, agent_id: AgentId) -> Inbox {
        let (sender, receiver) = mpsc::channel(self.config.inbox_capacity.max(1));
        write(&self.inboxes).insert(agent_id, sender);
        write(&self.direct).insert(agent_id);
        log::debug!("Registered agent {} on the bus", agent_id);

        Inbox { agent_id, receiver }
    }

    pub fn unregister(&self, agent_id: AgentId) {
        write(&self.inboxes).remove(&agent_id);
        write(&self.direct).remove(&agent_id);
        write(&self.topics).retain(|_, subscribers| {
            subscribers.remove(&agent_id);
            !subscribers.is_empty()
        });
        log::debug!("Unregistered agent {} from the bus", agent_id);
    }

    pub fn is_registered(&self, agent_id: AgentId) -> bool {
        read(&self.inboxes).contains_key(&agent_id)
    }

    /// Subscribes to `topic`, or to direct delivery when `topic` is `None`.
    pub fn subscribe(&self, agent_id: AgentId, topic: Option<&str>) -> Result<()> {
        if !self.is_registered(agent_id) {
            return Err(RuntimeError::agent_not_found(agent_id));
        }

        let added = match topic {
            Some(topic) => write(&self.topics)
                .entry(topic.to_string())
                .or_default()
                .insert(agent_id),
            None => write(&self.direct).insert(agent_id),
        };
        if added {
            log::debug!("Agent {} subscribed to {}", agent_id, topic.unwrap_or("direct"));
        }
        Ok(())
    }

    pub fn unsubscribe(&self, agent_id: AgentId, topic: Option<&str>) {
        let removed = match topic {
            Some(topic) => {
                let mut topics = write(&self.topics);
                let removed = topics
                    .get_mut(topic)
                    .is_some_and(|subscribers| subscribers.remove(&agent_id));
                if topics.get(topic).is_some_and(HashSet::is_empty) {
                    topics.remove(topic);
                }
                removed
            }
            None => write(&self.direct).remove(&agent_id),
        };
        if removed {
            log::debug!(
                "Agent {} unsubscribed from {}",
                agent_id,
                topic.unwrap_or("direct")
            );
        }
    }

    pub fn subscribers(&self, topic: &str) -> Vec<AgentId> {
        read(&self.topics)
            .get(topic)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn set_drop_hook(&self, hook: DropHook) {
        *write(&self.drop_hook) = Some(hook);
    }

    /// Validates and routes `message`.
    ///
    /// Routing, first match wins: the recipient alone; every subscriber of
    /// `topic`; the other participants of the tagged conversation; every
    /// other directly subscribed agent. A message tagged with a known
    /// conversation is appended to its history while the conversation lock
    /// is held across delivery.
    pub fn publish(&self, message: Message, topic: Option<&str>) -> Result<PublishReport> {
        message.validate(self.config.max_message_size)?;

        let conversation = message
            .conversation_id()
            .and_then(|id| read(&self.conversations).get(&id).cloned());

        let Some(conversation) = conversation else {
            let targets = self.route(&message, topic, None);
            return Ok(self.deliver(&message, targets));
        };

        let mut state = conversation.lock().unwrap_or_else(PoisonError::into_inner);
        let targets = self.route(&message, topic, Some(&state));
        state.append(message.clone());
        Ok(self.deliver(&message, targets))
    }

    fn route(
        &self,
        message: &Message,
        topic: Option<&str>,
        conversation: Option<&ConversationState>,
    ) -> Vec<AgentId> {
        if let Some(recipient) = message.recipient {
            if read(&self.direct).contains(&recipient) {
                return vec![recipient];
            }
            self.undeliverable.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "Message {} for unknown recipient {} dropped",
                message.id,
                recipient
            );
            self.notify_drop(message, recipient, DropReason::UnknownRecipient);
            return Vec::new();
        }

        if let Some(topic) = topic {
            return self.subscribers(topic);
        }

        if let Some(state) = conversation {
            return state.audience(message.sender);
        }

        read(&self.direct)
            .iter()
            .copied()
            .filter(|id| Some(*id) != message.sender)
            .collect()
    }

    fn deliver(&self, message: &Message, targets: Vec<AgentId>) -> PublishReport {
        let mut report = PublishReport::default();
        if targets.is_empty() {
            return report;
        }

        let mut failed = Vec::new();
        {
            let inboxes = read(&self.inboxes);
            for agent_id in targets {
                let outcome = match inboxes.get(&agent_id) {
                    Some(sender) => match sender.try_send(message.clone()) {
                        Ok(()) => None,
                        Err(TrySendError::Full(_)) => Some(DropReason::InboxFull),
                        Err(TrySendError::Closed(_)) => Some(DropReason::InboxClosed),
                    },
                    None => Some(DropReason::InboxClosed),
                };

                match outcome {
                    None => {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                        report.delivered.push(agent_id);
                    }
                    Some(reason) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        report.dropped.push(agent_id);
                        failed.push((agent_id, reason));
                    }
                }
            }
        }

        // Hooks run without the inbox table locked so they may use the bus.
        for (agent_id, reason) in failed {
            log::warn!(
                "Dropped message {} for agent {}: {:?}",
                message.id,
                agent_id,
                reason
            );
            self.notify_drop(message, agent_id, reason);
        }
        report
    }

    fn notify_drop(&self, message: &Message, agent_id: AgentId, reason: DropReason) {
        let hook = read(&self.drop_hook).clone();
        if let Some(hook) = hook {
            hook(message, agent_id, reason);
        }
    }

    pub fn open_conversation(
        &self,
        participants: impl IntoIterator<Item = AgentId>,
        metadata: Metadata,
    ) -> ConversationId {
        let state = ConversationState::new(participants, metadata);
        let id = state.conversation_id;
        write(&self.conversations).insert(id, Arc::new(Mutex::new(state)));
        log::debug!("Opened conversation {}", id);
        id
    }

    pub fn close_conversation(&self, conversation_id: ConversationId) -> Option<ConversationState> {
        write(&self.conversations)
            .remove(&conversation_id)
            .map(|state| state.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    pub fn get_conversation(&self, conversation_id: ConversationId) -> Option<ConversationState> {
        let state = read(&self.conversations).get(&conversation_id).cloned()?;
        let snapshot = state.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Some(snapshot)
    }

    pub fn get_conversation_history(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        self.get_conversation(conversation_id)
            .map(|state| state.history)
            .ok_or_else(|| RuntimeError::not_found("conversation", conversation_id))
    }

    pub fn list_conversations(&self) -> Vec<ConversationId> {
        read(&self.conversations).keys().copied().collect()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            registered: read(&self.inboxes).len(),
            topics: read(&self.topics).len(),
            conversations: read(&self.conversations).len(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            undeliverable: self.undeliverable.load(Ordering::Relaxed),
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.config.max_message_size
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
