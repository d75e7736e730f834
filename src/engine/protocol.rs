use serde_json::{json, Value};
use std::sync::Arc;

use super::bus::{MessageBus, PublishReport};
use crate::error::{Result, RuntimeError};
use crate::types::message::{INITIATOR_KEY, PARTICIPANTS_KEY};
use crate::types::{AgentId, ConversationId, Message, MessageId, MessageType, Metadata};

/// Builds well-formed messages for the common interaction patterns and
/// hands them to the bus.
#[derive(Clone)]
pub struct CommunicationProtocol {
    bus: Arc<MessageBus>,
}

impl CommunicationProtocol {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn send_task(
        &self,
        sender: AgentId,
        recipient: AgentId,
        content: impl Into<String>,
        metadata: Metadata,
    ) -> Result<Message> {
        let message = Message::task(content)
            .from_agent(sender)
            .to_agent(recipient)
            .with_all_metadata(metadata);
        self.bus.publish(message.clone(), None)?;
        Ok(message)
    }

    pub fn send_response(
        &self,
        sender: AgentId,
        recipient: AgentId,
        content: impl Into<String>,
        in_response_to: Option<MessageId>,
    ) -> Result<Message> {
        let mut message = Message::response(content)
            .from_agent(sender)
            .to_agent(recipient);
        if let Some(original) = in_response_to {
            message = message.in_response_to(original);
        }
        self.bus.publish(message.clone(), None)?;
        Ok(message)
    }

    pub fn send_error(
        &self,
        sender: AgentId,
        recipient: AgentId,
        error: impl Into<String>,
        in_response_to: Option<MessageId>,
    ) -> Result<Message> {
        let mut message = Message::error(error).from_agent(sender).to_agent(recipient);
        if let Some(original) = in_response_to {
            message = message.in_response_to(original);
        }
        self.bus.publish(message.clone(), None)?;
        Ok(message)
    }

    /// Status update for every other directly subscribed agent.
    pub fn broadcast_status(
        &self,
        sender: AgentId,
        status: impl Into<String>,
        metadata: Metadata,
    ) -> Result<PublishReport> {
        let message = Message::status(status)
            .from_agent(sender)
            .with_all_metadata(metadata);
        self.bus.publish(message, None)
    }

    /// Opens a conversation between `initiator` and `participants` and
    /// publishes the first task to everyone but the initiator.
    pub fn create_conversation(
        &self,
        initiator: AgentId,
        participants: &[AgentId],
        initial_message: impl Into<String>,
    ) -> Result<ConversationId> {
        let mut members: Vec<AgentId> = participants.to_vec();
        if !members.contains(&initiator) {
            members.push(initiator);
        }

        let mut metadata = Metadata::new();
        metadata.insert(INITIATOR_KEY.to_string(), json!(initiator.to_string()));
        metadata.insert(
            PARTICIPANTS_KEY.to_string(),
            Value::Array(members.iter().map(|p| json!(p.to_string())).collect()),
        );

        let conversation_id = self.bus.open_conversation(members, metadata.clone());
        let message = Message::new(MessageType::Task, initial_message)
            .from_agent(initiator)
            .with_all_metadata(metadata)
            .in_conversation(conversation_id);

        if let Err(e) = self.bus.publish(message, None) {
            self.bus.close_conversation(conversation_id);
            return Err(e);
        }
        log::info!(
            "Agent {} opened conversation {} with {} participants",
            initiator,
            conversation_id,
            participants.len()
        );
        Ok(conversation_id)
    }

    pub fn reply_to_conversation(
        &self,
        conversation_id: ConversationId,
        sender: AgentId,
        content: impl Into<String>,
    ) -> Result<Message> {
        let state = self
            .bus
            .get_conversation(conversation_id)
            .ok_or_else(|| RuntimeError::not_found("conversation", conversation_id))?;
        if !state.is_participant(sender) {
            return Err(RuntimeError::validation(format!(
                "agent {} is not a participant of conversation {}",
                sender, conversation_id
            )));
        }

        let mut message = Message::response(content)
            .from_agent(sender)
            .in_conversation(conversation_id);
        if let Some(last) = state.history.last() {
            message = message.in_response_to(last.id);
        }
        self.bus.publish(message.clone(), None)?;
        Ok(message)
    }
}
