//! Wire events for the chat socket.
//!
//! Both directions use a JSON envelope tagged by `type`. Inbound frames are
//! decoded in two steps so that an unknown `type` and a missing field are
//! reported separately. Payload fields are read leniently: a value of the
//! wrong JSON type is treated as missing or invalid, never as bad JSON.

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::database::{Role, StoredMessage};

/// Message as shown to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub content: String,
    pub role: Role,
    pub conversation_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
}

impl From<&StoredMessage> for MessageView {
    fn from(m: &StoredMessage) -> Self {
        Self {
            id: m.id,
            content: m.content.clone(),
            role: m.role,
            conversation_id: m.conversation_id,
            created_at: m.created_at,
            user_id: m.user_id,
            agent_id: m.agent_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        user_id: Uuid,
        message: String,
    },
    NewMessage {
        message: MessageView,
    },
    MessageChunk {
        chunk: String,
        conversation_id: Uuid,
    },
    MessageComplete {
        message: MessageView,
        conversation_id: Uuid,
    },
    JoinedConversation {
        conversation_id: Uuid,
    },
    LeftConversation {
        conversation_id: Uuid,
    },
    Typing {
        user_id: Uuid,
        is_typing: bool,
        conversation_id: Uuid,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn connected(user_id: Uuid) -> Self {
        ServerEvent::Connected {
            user_id,
            message: "Connected to Joulaa Chat".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::MessageChunk { .. } => "message_chunk",
            ServerEvent::MessageComplete { .. } => "message_complete",
            ServerEvent::JoinedConversation { .. } => "joined_conversation",
            ServerEvent::LeftConversation { .. } => "left_conversation",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Serialize once into a frame that can be shared across connections.
    pub fn to_frame(&self) -> Utf8Bytes {
        match serde_json::to_string(self) {
            Ok(json) => json.into(),
            Err(err) => {
                tracing::error!(error = %err, event = self.kind(), "failed to encode event");
                r#"{"type":"error","message":"Internal server error"}"#.into()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    SendMessage {
        conversation_id: Uuid,
        content: String,
        agent_id: Option<Uuid>,
    },
    JoinConversation {
        conversation_id: Uuid,
    },
    LeaveConversation {
        conversation_id: Uuid,
    },
    Typing {
        conversation_id: Uuid,
        is_typing: bool,
    },
}

impl ClientEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::JoinConversation { .. } => "join_conversation",
            ClientEvent::LeaveConversation { .. } => "leave_conversation",
            ClientEvent::Typing { .. } => "typing",
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        match self {
            ClientEvent::SendMessage { conversation_id, .. }
            | ClientEvent::JoinConversation { conversation_id }
            | ClientEvent::LeaveConversation { conversation_id }
            | ClientEvent::Typing { conversation_id, .. } => *conversation_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Invalid JSON format")]
    Malformed,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("{0}")]
    MissingField(&'static str),
    #[error("Invalid {0}")]
    InvalidId(&'static str),
}

struct Fields {
    conversation_id: Option<String>,
    /// `message`, falling back to `content`
    text: Option<String>,
    agent_id: Option<String>,
    is_typing: bool,
}

impl Fields {
    fn read(object: &Map<String, Value>) -> Self {
        let text = |name: &str| match object.get(name) {
            Some(Value::String(s)) => non_empty(Some(s.clone())),
            _ => None,
        };
        Self {
            conversation_id: id_field(object.get("conversation_id")),
            text: text("message").or_else(|| text("content")),
            agent_id: id_field(object.get("agent_id")),
            is_typing: object
                .get("is_typing")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }
}

/// Strings pass through; other non-null values are kept in their JSON form
/// so they fail id parsing instead of looking absent.
fn id_field(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

const MISSING_SEND_FIELDS: &str = "Missing conversation_id or message";
const MISSING_CONVERSATION: &str = "Missing conversation_id";

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_id(raw: &str, field: &'static str) -> Result<Uuid, DecodeError> {
    Uuid::parse_str(raw.trim()).map_err(|_| DecodeError::InvalidId(field))
}

/// Decode one inbound text frame.
pub fn decode(text: &str) -> Result<ClientEvent, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(|_| DecodeError::Malformed)?;
    let Some(object) = value.as_object() else {
        return Err(DecodeError::Malformed);
    };
    let kind = match object.get("type") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "None".to_string(),
        Some(other) => other.to_string(),
    };
    if !matches!(
        kind.as_str(),
        "send_message" | "join_conversation" | "leave_conversation" | "typing"
    ) {
        return Err(DecodeError::UnknownType(kind));
    }

    let fields = Fields::read(object);

    match kind.as_str() {
        "send_message" => {
            let (Some(conversation_id), Some(content)) =
                (non_empty(fields.conversation_id), fields.text)
            else {
                return Err(DecodeError::MissingField(MISSING_SEND_FIELDS));
            };
            let agent_id = non_empty(fields.agent_id)
                .map(|raw| parse_id(&raw, "agent_id"))
                .transpose()?;
            Ok(ClientEvent::SendMessage {
                conversation_id: parse_id(&conversation_id, "conversation_id")?,
                content,
                agent_id,
            })
        }
        other => {
            let conversation_id = non_empty(fields.conversation_id)
                .ok_or(DecodeError::MissingField(MISSING_CONVERSATION))?;
            let conversation_id = parse_id(&conversation_id, "conversation_id")?;
            Ok(match other {
                "join_conversation" => ClientEvent::JoinConversation { conversation_id },
                "leave_conversation" => ClientEvent::LeaveConversation { conversation_id },
                _ => ClientEvent::Typing {
                    conversation_id,
                    is_typing: fields.is_typing,
                },
            })
        }
    }
}
