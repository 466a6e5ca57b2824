use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{
    access_denied, conversation_not_found, validate_content, AgentProfile, ChatStore, NewMessage,
    Role, StoreError, StoredMessage, UserRecord,
};

#[derive(Debug, Clone)]
struct ConversationRow {
    owner: Uuid,
    organization_id: Option<Uuid>,
    agent_id: Option<Uuid>,
    message_count: i64,
    last_message_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserRecord>,
    agents: HashMap<Uuid, AgentProfile>,
    conversations: HashMap<Uuid, ConversationRow>,
    /// (user, organization) pairs with an active membership
    memberships: HashSet<(Uuid, Uuid)>,
    messages: Vec<StoredMessage>,
}

/// Process-local [`ChatStore`] with the same access rules as the Postgres store
#[derive(Default)]
pub struct MemoryChatStore {
    tables: RwLock<Tables>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: UserRecord) {
        self.tables.write().users.insert(user.id, user);
    }

    /// Insert an active user with the given role and return its id.
    pub fn add_user(&self, username: &str, role: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.insert_user(UserRecord {
            id,
            email: format!("{username}@example.com"),
            username: username.to_string(),
            role: role.to_string(),
            is_active: true,
        });
        id
    }

    pub fn insert_agent(&self, agent: AgentProfile) {
        self.tables.write().agents.insert(agent.id, agent);
    }

    pub fn insert_conversation(&self, id: Uuid, owner: Uuid, organization_id: Option<Uuid>) {
        self.tables.write().conversations.insert(
            id,
            ConversationRow {
                owner,
                organization_id,
                agent_id: None,
                message_count: 0,
                last_message_at: None,
            },
        );
    }

    /// Bind a conversation to the agent it was started with.
    pub fn assign_agent(&self, conversation_id: Uuid, agent_id: Uuid) {
        if let Some(conversation) = self.tables.write().conversations.get_mut(&conversation_id) {
            conversation.agent_id = Some(agent_id);
        }
    }

    pub fn add_member(&self, user_id: Uuid, organization_id: Uuid) {
        self.tables.write().memberships.insert((user_id, organization_id));
    }

    /// All messages of a conversation in insertion order.
    pub fn messages(&self, conversation_id: Uuid) -> Vec<StoredMessage> {
        self.tables
            .read()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn message_count(&self, conversation_id: Uuid) -> Option<i64> {
        self.tables
            .read()
            .conversations
            .get(&conversation_id)
            .map(|c| c.message_count)
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn find_active_user(&self, user_id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .tables
            .read()
            .users
            .get(&user_id)
            .filter(|u| u.is_active)
            .cloned())
    }

    async fn add_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        validate_content(&message)?;
        let mut tables = self.tables.write();
        let Tables {
            conversations,
            memberships,
            messages,
            ..
        } = &mut *tables;

        let conversation = conversations
            .get_mut(&message.conversation_id)
            .ok_or_else(conversation_not_found)?;
        if conversation.owner != message.sender {
            let member = conversation
                .organization_id
                .is_some_and(|org| memberships.contains(&(message.sender, org)));
            if !member {
                return Err(access_denied());
            }
        }

        let now = Utc::now();
        let stored = StoredMessage {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            role: message.role,
            user_id: (message.role == Role::User).then_some(message.sender),
            agent_id: message.agent_id,
            content: message.content,
            created_at: now,
            updated_at: now,
        };
        conversation.message_count += 1;
        conversation.last_message_at = Some(now);
        messages.push(stored.clone());
        Ok(stored)
    }

    async fn find_agent_for_conversation(
        &self,
        conversation_id: Uuid,
        agent_id: Uuid,
    ) -> Result<Option<AgentProfile>, StoreError> {
        let tables = self.tables.read();
        let Some(conversation) = tables.conversations.get(&conversation_id) else {
            return Ok(None);
        };
        Ok(tables
            .agents
            .get(&agent_id)
            .filter(|a| a.is_active)
            .filter(|a| a.usable_in(conversation.organization_id, conversation.agent_id))
            .cloned())
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let tables = self.tables.read();
        let all: Vec<&StoredMessage> = tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .collect();
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).cloned().collect())
    }
}
