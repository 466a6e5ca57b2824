use std::sync::Arc;

use crate::auth::JwtKeys;
use crate::config::AppConfig;
use crate::database::{ChatStore, MemoryChatStore, PgChatStore};
use crate::gateway::{AgentGateway, GatewayRouter};
use crate::realtime::{RealtimeHub, SessionSettings};

/// Shared handles passed to every request and connection task
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub keys: JwtKeys,
    pub hub: Arc<RealtimeHub>,
    pub store: Arc<dyn ChatStore>,
    pub gateway: Arc<dyn AgentGateway>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ChatStore>,
        gateway: Arc<dyn AgentGateway>,
    ) -> Self {
        Self {
            keys: JwtKeys::from_config(&config.auth),
            config: Arc::new(config),
            hub: Arc::new(RealtimeHub::new()),
            store,
            gateway,
        }
    }

    /// Build the production collaborators described by `config`.
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn ChatStore> = match config.database.url.as_deref() {
            Some(url) => {
                let pool = config.database.create_postgres_pool(url).await?;
                tracing::info!(max_connections = config.database.max_connections, "connected to Postgres");
                Arc::new(PgChatStore::new(pool))
            }
            None => {
                tracing::warn!("database.url not set, using in-memory store");
                Arc::new(MemoryChatStore::new())
            }
        };
        let gateway = Arc::new(GatewayRouter::from_config(&config.llm, config.environment)?);
        Ok(Self::new(config, store, gateway))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::from_config(&self.config)
    }
}
