use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use super::{
    access_denied, conversation_not_found, validate_content, AgentProfile, ChatStore, NewMessage,
    Role, StoreError, StoredMessage, UserRecord,
};

const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, user_id, \
     (message_metadata->>'agent_id')::uuid AS agent_id, created_at, updated_at";

/// [`ChatStore`] over the service's Postgres schema
#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn message_from_row(row: &PgRow) -> Result<StoredMessage, sqlx::Error> {
    let role: String = row.try_get("role")?;
    let role = Role::parse(&role).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: "role".to_string(),
        source: format!("unknown message role '{role}'").into(),
    })?;
    Ok(StoredMessage {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        role,
        content: row.try_get("content")?,
        user_id: row.try_get("user_id")?,
        agent_id: row.try_get("agent_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn agent_from_row(row: &PgRow) -> Result<AgentProfile, sqlx::Error> {
    let id: Uuid = row.try_get("id")?;
    let name_en: Option<String> = row.try_get("name_en")?;
    let name_ar: String = row.try_get("name_ar")?;
    let agent_type: String = row.try_get("agent_type")?;

    let mut agent = AgentProfile::new(id, name_en.unwrap_or(name_ar), agent_type);
    if let Some(provider) = row.try_get::<Option<String>, _>("llm_provider")? {
        agent.llm_provider = provider;
    }
    if let Some(model) = row.try_get::<Option<String>, _>("llm_model")? {
        agent.llm_model = model;
    }
    agent.system_prompt_ar = row.try_get("system_prompt_ar")?;
    agent.system_prompt_en = row.try_get("system_prompt_en")?;
    // Numeric settings are stored as text columns.
    if let Some(max_tokens) = row
        .try_get::<Option<String>, _>("max_tokens")?
        .and_then(|v| v.trim().parse().ok())
    {
        agent.max_tokens = max_tokens;
    }
    if let Some(temperature) = row
        .try_get::<Option<String>, _>("temperature")?
        .and_then(|v| v.trim().parse().ok())
    {
        agent.temperature = temperature;
    }
    agent.is_active = row.try_get::<Option<bool>, _>("is_active")?.unwrap_or(true);
    agent.organization_id = row.try_get("organization_id")?;
    agent.is_public = row.try_get::<Option<bool>, _>("is_public")?.unwrap_or(false);
    Ok(agent)
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn find_active_user(&self, user_id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, email, username, role, is_active FROM users \
             WHERE id = $1 AND is_active = TRUE",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(UserRecord {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            username: row.try_get("username")?,
            role: row
                .try_get::<Option<String>, _>("role")?
                .unwrap_or_else(|| "user".to_string()),
            is_active: row.try_get::<Option<bool>, _>("is_active")?.unwrap_or(false),
        }))
    }

    async fn add_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        validate_content(&message)?;
        let mut tx = self.pool.begin().await?;

        let conversation = sqlx::query(
            "SELECT user_id, organization_id FROM conversations WHERE id = $1 FOR UPDATE",
        )
        .bind(message.conversation_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(conversation_not_found)?;

        let owner: Uuid = conversation.try_get("user_id")?;
        let organization_id: Option<Uuid> = conversation.try_get("organization_id")?;
        if owner != message.sender {
            let Some(organization_id) = organization_id else {
                return Err(access_denied());
            };
            let member: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM user_organizations \
                 WHERE user_id = $1 AND organization_id = $2 AND is_active = TRUE)",
            )
            .bind(message.sender)
            .bind(organization_id)
            .fetch_one(&mut *tx)
            .await?;
            if !member {
                return Err(access_denied());
            }
        }

        let author = (message.role == Role::User).then_some(message.sender);
        let metadata = message.agent_id.map(|id| json!({ "agent_id": id }));
        let now: DateTime<Utc> = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO messages \
             (id, conversation_id, role, content, message_type, user_id, message_metadata, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 'text', $5, $6::json, $7, $7) \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(author)
        .bind(metadata.map(sqlx::types::Json))
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let stored = message_from_row(&row)?;

        sqlx::query(
            "UPDATE conversations SET message_count = COALESCE(message_count, 0) + 1, \
             last_message_at = $2 WHERE id = $1",
        )
        .bind(message.conversation_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(stored)
    }

    async fn find_agent_for_conversation(
        &self,
        conversation_id: Uuid,
        agent_id: Uuid,
    ) -> Result<Option<AgentProfile>, StoreError> {
        let row = sqlx::query(
            "SELECT a.id, a.name_ar, a.name_en, lower(a.agent_type::text) AS agent_type, \
             a.llm_provider, a.llm_model, a.system_prompt_ar, a.system_prompt_en, a.max_tokens, \
             a.temperature, a.is_active, a.organization_id, a.is_public \
             FROM ai_agents a JOIN conversations c ON c.id = $1 \
             WHERE a.id = $2 AND a.is_active = TRUE \
             AND (a.is_public = TRUE OR c.agent_id = a.id OR a.organization_id = c.organization_id)",
        )
        .bind(conversation_id)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(agent_from_row).transpose()?)
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT * FROM (SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id = $1 ORDER BY created_at DESC LIMIT $2) recent \
             ORDER BY created_at ASC"
        ))
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| message_from_row(row).map_err(StoreError::from))
            .collect()
    }
}
