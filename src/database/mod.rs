//! Persistence collaborator for the realtime chat subsystem.
//!
//! The realtime layer only reads users and agents and appends messages, so the
//! store surface is limited to those operations. [`postgres::PgChatStore`] is
//! the production implementation; [`memory::MemoryChatStore`] backs local runs
//! without a database and the test suite.

pub mod config;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryChatStore;
pub use postgres::PgChatStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub role: String,
    pub is_active: bool,
}

impl UserRecord {
    pub fn is_admin(&self) -> bool {
        matches!(self.role.as_str(), "admin" | "super_admin")
    }
}

/// Agent configuration as consumed by the LLM gateway
#[derive(Debug, Clone, PartialEq)]
pub struct AgentProfile {
    pub id: Uuid,
    pub name: String,
    pub agent_type: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub system_prompt_ar: Option<String>,
    pub system_prompt_en: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub is_active: bool,
    /// Owning organization; `None` for platform-wide agents
    pub organization_id: Option<Uuid>,
    pub is_public: bool,
}

impl AgentProfile {
    /// A profile with the column defaults of the `ai_agents` table.
    pub fn new(id: Uuid, name: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            agent_type: agent_type.into(),
            llm_provider: "anthropic".to_string(),
            llm_model: "claude-3-sonnet".to_string(),
            system_prompt_ar: None,
            system_prompt_en: None,
            max_tokens: 4000,
            temperature: 0.7,
            is_active: true,
            organization_id: None,
            is_public: false,
        }
    }

    /// Whether the agent may answer in a conversation of `organization_id`
    /// that is bound to `bound_agent`.
    pub fn usable_in(&self, organization_id: Option<Uuid>, bound_agent: Option<Uuid>) -> bool {
        self.is_public
            || bound_agent == Some(self.id)
            || self.organization_id.is_some() && self.organization_id == organization_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// A message to append to a conversation on behalf of `sender`.
///
/// Access is always checked against `sender`, also for assistant turns
/// produced in response to that sender.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender: Uuid,
    pub role: Role,
    pub content: String,
    pub agent_id: Option<Uuid>,
}

impl NewMessage {
    pub fn from_user(conversation_id: Uuid, sender: Uuid, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            sender,
            role: Role::User,
            content: content.into(),
            agent_id: None,
        }
    }

    pub fn from_agent(
        conversation_id: Uuid,
        on_behalf_of: Uuid,
        agent_id: Uuid,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            sender: on_behalf_of,
            role: Role::Assistant,
            content: content.into(),
            agent_id: Some(agent_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    /// Author for user turns; `None` for assistant turns
    pub user_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Active user by id, `None` if unknown or deactivated.
    async fn find_active_user(&self, user_id: Uuid) -> Result<Option<UserRecord>, StoreError>;

    /// Persist a message after checking that `sender` may write to the
    /// conversation. Bumps the conversation's message counter.
    async fn add_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError>;

    /// Active agent by id, provided it may answer in the conversation: it is
    /// public, it is the conversation's bound agent, or it belongs to the
    /// conversation's organization. `None` otherwise.
    async fn find_agent_for_conversation(
        &self,
        conversation_id: Uuid,
        agent_id: Uuid,
    ) -> Result<Option<AgentProfile>, StoreError>;

    /// The `limit` most recent messages of a conversation, oldest first.
    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;
}

pub(crate) fn conversation_not_found() -> StoreError {
    StoreError::NotFound("Conversation not found".to_string())
}

pub(crate) fn access_denied() -> StoreError {
    StoreError::PermissionDenied("Access denied to conversation".to_string())
}

/// Longest user message accepted, in characters.
pub const MAX_MESSAGE_CHARS: usize = 10_000;

/// Assistant turns are bounded by the agent's token budget instead.
pub(crate) fn validate_content(message: &NewMessage) -> Result<(), StoreError> {
    if message.content.trim().is_empty() {
        return Err(StoreError::Validation("Message content cannot be empty".to_string()));
    }
    if message.role == Role::User && message.content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(StoreError::Validation(format!(
            "Message content exceeds {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_roles() {
        let mut user = UserRecord {
            id: Uuid::new_v4(),
            email: "a@example.com".into(),
            username: "a".into(),
            role: "user".into(),
            is_active: true,
        };
        assert!(!user.is_admin());
        user.role = "super_admin".into();
        assert!(user.is_admin());
    }

    #[test]
    fn agent_scope() {
        let org = Uuid::new_v4();
        let mut agent = AgentProfile::new(Uuid::new_v4(), "HR", "hr");
        assert!(!agent.usable_in(None, None));
        assert!(!agent.usable_in(Some(org), None));
        assert!(agent.usable_in(None, Some(agent.id)));

        agent.organization_id = Some(org);
        assert!(agent.usable_in(Some(org), None));
        assert!(!agent.usable_in(Some(Uuid::new_v4()), None));
        assert!(!agent.usable_in(None, None));

        agent.is_public = true;
        assert!(agent.usable_in(Some(Uuid::new_v4()), None));
    }

    #[test]
    fn content_limits() {
        let (conversation, user) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(validate_content(&NewMessage::from_user(conversation, user, "   ")).is_err());

        let at_limit = "ع".repeat(MAX_MESSAGE_CHARS);
        assert!(validate_content(&NewMessage::from_user(conversation, user, at_limit)).is_ok());

        let over = "a".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            validate_content(&NewMessage::from_user(conversation, user, over.clone())),
            Err(StoreError::Validation(_))
        ));
        let reply = NewMessage::from_agent(conversation, user, Uuid::new_v4(), over);
        assert!(validate_content(&reply).is_ok());
    }

    #[test]
    fn role_parse_round_trips() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("tool"), None);
    }
}
