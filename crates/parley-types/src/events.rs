use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ConversationStatus, Message, MessageRole};

/// Events delivered over the live stream. The bus carries the
/// conversation-scoped variants; `Connected` and `Ping` are produced by the
/// stream itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    /// First event on every stream
    #[serde(rename = "connected")]
    Connected,

    /// Heartbeat keeping intermediaries from closing an idle stream
    #[serde(rename = "ping")]
    Ping,

    /// One or more messages were appended to a conversation
    #[serde(rename = "message:new", rename_all = "camelCase")]
    MessageNew {
        conversation_id: String,
        payload: MessagesPayload,
    },

    /// A conversation changed status
    #[serde(rename = "status:update", rename_all = "camelCase")]
    StatusUpdate {
        conversation_id: String,
        payload: StatusPayload,
    },
}

impl GatewayEvent {
    pub fn message_new(message: &Message) -> Self {
        Self::MessageNew {
            conversation_id: message.conversation_id.clone(),
            payload: MessagesPayload {
                messages: vec![WireMessage::from(message)],
            },
        }
    }

    pub fn status_update(conversation_id: &str, status: ConversationStatus) -> Self {
        Self::StatusUpdate {
            conversation_id: conversation_id.to_string(),
            payload: StatusPayload { status },
        }
    }

    /// Returns the conversation this event belongs to. Stream control events
    /// (`Connected`, `Ping`) return `None`.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::MessageNew { conversation_id, .. } => Some(conversation_id),
            Self::StatusUpdate { conversation_id, .. } => Some(conversation_id),
            Self::Connected | Self::Ping => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Ping => "ping",
            Self::MessageNew { .. } => "message:new",
            Self::StatusUpdate { .. } => "status:update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesPayload {
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: ConversationStatus,
}

/// Normalized message shape pushed to live clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            role: message.role,
            content: message.content.clone(),
            created_at: message.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn control_events_serialize_to_bare_type() {
        assert_eq!(
            serde_json::to_value(GatewayEvent::Connected).unwrap(),
            json!({ "type": "connected" })
        );
        assert_eq!(
            serde_json::to_value(GatewayEvent::Ping).unwrap(),
            json!({ "type": "ping" })
        );
    }

    #[test]
    fn status_update_wire_shape() {
        let event = GatewayEvent::status_update("c-1", ConversationStatus::HumanActive);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "status:update",
                "conversationId": "c-1",
                "payload": { "status": "HUMAN_ACTIVE" }
            })
        );
        assert_eq!(event.conversation_id(), Some("c-1"));
    }

    #[test]
    fn message_new_wire_shape() {
        let created_at = "2026-03-01T10:00:00.250Z".parse::<DateTime<Utc>>().unwrap();
        let message = Message {
            id: "m-1".into(),
            conversation_id: "c-9".into(),
            role: MessageRole::User,
            sender: "guest".into(),
            content: "hello".into(),
            metadata: None,
            created_at,
        };

        let value = serde_json::to_value(GatewayEvent::message_new(&message)).unwrap();
        assert_eq!(value["type"], "message:new");
        assert_eq!(value["conversationId"], "c-9");
        let wire = &value["payload"]["messages"][0];
        assert_eq!(wire["id"], "m-1");
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"], "hello");
        assert!(wire["createdAt"].as_str().unwrap().starts_with("2026-03-01T10:00:00.250"));
        // sender and metadata stay server-side
        assert!(wire.get("sender").is_none());
    }

    #[test]
    fn events_deserialize_from_wire() {
        let raw = r#"{"type":"status:update","conversationId":"abc","payload":{"status":"CLOSED"}}"#;
        let event: GatewayEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event, GatewayEvent::status_update("abc", ConversationStatus::Closed));
        assert_eq!(event.kind(), "status:update");
    }
}
