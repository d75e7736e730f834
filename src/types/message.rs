use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use super::{AgentId, ConversationId, MessageId, MessageType};
use crate::error::{Result, RuntimeError};

pub type Metadata = HashMap<String, Value>;

pub const CONVERSATION_ID_KEY: &str = "conversation_id";
pub const PARTICIPANTS_KEY: &str = "participants";
pub const INITIATOR_KEY: &str = "initiator";
pub const IN_RESPONSE_TO_KEY: &str = "in_response_to";

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic time since the first message of this process was created.
fn monotonic_now() -> Duration {
    EPOCH.get_or_init(Instant::now).elapsed()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    pub metadata: Metadata,
    pub sender: Option<AgentId>,
    pub recipient: Option<AgentId>,
    pub timestamp: Duration,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(message_type: MessageType, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_v4(),
            message_type,
            content: content.into(),
            metadata: Metadata::new(),
            sender: None,
            recipient: None,
            timestamp: monotonic_now(),
            created_at: Utc::now(),
        }
    }

    pub fn task(content: impl Into<String>) -> Self {
        Self::new(MessageType::Task, content)
    }

    pub fn response(content: impl Into<String>) -> Self {
        Self::new(MessageType::Response, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(MessageType::Error, content)
    }

    pub fn status(content: impl Into<String>) -> Self {
        Self::new(MessageType::Status, content)
    }

    pub fn from_agent(mut self, sender: AgentId) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn to_agent(mut self, recipient: AgentId) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_all_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn in_conversation(self, conversation_id: ConversationId) -> Self {
        self.with_metadata(CONVERSATION_ID_KEY, Value::String(conversation_id.to_string()))
    }

    pub fn in_response_to(self, message_id: MessageId) -> Self {
        self.with_metadata(IN_RESPONSE_TO_KEY, Value::String(message_id.to_string()))
    }

    /// The conversation this message is tagged with, if the tag parses.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.metadata
            .get(CONVERSATION_ID_KEY)
            .and_then(|v| v.as_str())
            .and_then(|s| ConversationId::parse_str(s).ok())
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }

    /// Rejects messages the bus must never deliver.
    pub fn validate(&self, max_size: usize) -> Result<()> {
        if self.id.is_nil() {
            return Err(RuntimeError::validation("message id is nil"));
        }
        if self.sender.is_some_and(|s| s.is_nil()) {
            return Err(RuntimeError::validation("message sender is nil"));
        }
        if self.recipient.is_some_and(|r| r.is_nil()) {
            return Err(RuntimeError::validation("message recipient is nil"));
        }
        if let Some(raw) = self.metadata.get(CONVERSATION_ID_KEY) {
            let parsed = raw
                .as_str()
                .map(ConversationId::parse_str)
                .and_then(|r| r.ok());
            if parsed.is_none() {
                return Err(RuntimeError::validation(format!(
                    "metadata field '{}' must be a conversation id string, got {}",
                    CONVERSATION_ID_KEY, raw
                )));
            }
        }

        let metadata_size = serde_json::to_string(&self.metadata)
            .map(|s| s.len())
            .unwrap_or(0);
        let size = self.content.len() + metadata_size;
        if size > max_size {
            return Err(RuntimeError::validation(format!(
                "message size {} exceeds limit {}",
                size, max_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let sender = AgentId::new_v4();
        let recipient = AgentId::new_v4();
        let message = Message::task("Test message")
            .from_agent(sender)
            .to_agent(recipient);

        assert_eq!(message.message_type, MessageType::Task);
        assert_eq!(message.content, "Test message");
        assert_eq!(message.sender, Some(sender));
        assert_eq!(message.recipient, Some(recipient));
        assert!(!message.id.is_nil());
        assert!(!message.is_broadcast());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Message::status("a");
        let b = Message::status("b");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let first = Message::task("first");
        let second = Message::task("second");
        assert!(second.timestamp >= first.timestamp);
    }

    #[test]
    fn test_conversation_tag() {
        let conversation = ConversationId::new_v4();
        let message = Message::task("hi").in_conversation(conversation);
        assert_eq!(message.conversation_id(), Some(conversation));
        assert!(message.validate(1024).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_conversation_tag() {
        let message = Message::task("hi").with_metadata(CONVERSATION_ID_KEY, json!(42));
        let err = message.validate(1024).unwrap_err();
        assert!(matches!(err, RuntimeError::Validation(_)));
    }

    #[test]
    fn test_validate_rejects_nil_recipient() {
        let message = Message::task("hi").to_agent(AgentId::nil());
        assert!(message.validate(1024).is_err());
    }

    #[test]
    fn test_validate_rejects_oversize() {
        let message = Message::task("x".repeat(100));
        assert!(message.validate(10).is_err());
        assert!(message.validate(1000).is_ok());
    }

    #[test]
    fn test_serializes_type_field() {
        let message = Message::response("done");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "response");
    }
}
