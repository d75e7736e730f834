use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{AgentId, ConversationId, Message, Metadata};

/// Participants and ordered history of one conversation. The bus owns the
/// live copy; callers only ever see clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: ConversationId,
    pub participants: BTreeSet<AgentId>,
    pub history: Vec<Message>,
    pub created_at: DateTime<Utc>,
    /// Sender of the most recent message.
    pub current_agent: Option<AgentId>,
    pub metadata: Metadata,
}

impl ConversationState {
    pub fn new(participants: impl IntoIterator<Item = AgentId>, metadata: Metadata) -> Self {
        Self {
            conversation_id: ConversationId::new_v4(),
            participants: participants.into_iter().collect(),
            history: Vec::new(),
            created_at: Utc::now(),
            current_agent: None,
            metadata,
        }
    }

    pub fn is_participant(&self, agent_id: AgentId) -> bool {
        self.participants.contains(&agent_id)
    }

    pub(crate) fn append(&mut self, message: Message) {
        if message.sender.is_some() {
            self.current_agent = message.sender;
        }
        self.history.push(message);
    }

    /// Participants that should receive a message from `sender`.
    pub(crate) fn audience(&self, sender: Option<AgentId>) -> Vec<AgentId> {
        self.participants
            .iter()
            .copied()
            .filter(|p| Some(*p) != sender)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
