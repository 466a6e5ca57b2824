//! Agent/LLM gateway: turns an agent profile plus history into a stream of
//! text chunks.

pub mod anthropic;
pub mod development;
pub mod openai;
pub mod prompt;
pub mod sse;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use thiserror::Error;

use crate::config::{Environment, LlmConfig, ProviderKind};
use crate::database::{AgentProfile, Role};

pub use anthropic::AnthropicGateway;
pub use development::DevelopmentGateway;
pub use openai::OpenAiGateway;

/// Incremental reply text; the stream ends after the provider's completion
/// signal or yields exactly one error and stops.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("failed to decode provider stream: {0}")]
    Decode(String),
    #[error("timed out waiting for provider")]
    Timeout,
    #[error("agent misconfigured: {0}")]
    AgentMisconfigured(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Unavailable(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub agent: AgentProfile,
    /// Earlier turns, oldest first, excluding `message`
    pub history: Vec<ChatTurn>,
    pub message: String,
}

#[async_trait]
pub trait AgentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn stream_reply(&self, request: ReplyRequest) -> Result<ReplyStream, GatewayError>;
}

/// Usable API key: present, non-empty and not a template placeholder.
fn usable_key(key: Option<&str>) -> Option<&str> {
    key.map(str::trim)
        .filter(|k| !k.is_empty() && !k.contains("placeholder"))
}

/// Routes each request to the provider named by the agent.
///
/// Providers without a usable key are served by the development gateway
/// outside production and fail with [`GatewayError::Unavailable`] in
/// production.
pub struct GatewayRouter {
    default_provider: ProviderKind,
    openai: Option<Arc<dyn AgentGateway>>,
    anthropic: Option<Arc<dyn AgentGateway>>,
    development: Arc<dyn AgentGateway>,
    allow_development: bool,
}

impl GatewayRouter {
    pub fn from_config(config: &LlmConfig, environment: Environment) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let openai = usable_key(config.openai_api_key.as_deref()).map(|key| {
            Arc::new(OpenAiGateway::new(client.clone(), &config.openai_base_url, key))
                as Arc<dyn AgentGateway>
        });
        let anthropic = usable_key(config.anthropic_api_key.as_deref()).map(|key| {
            Arc::new(AnthropicGateway::new(client.clone(), &config.anthropic_base_url, key))
                as Arc<dyn AgentGateway>
        });
        let allow_development = environment != Environment::Production;

        if openai.is_none() && anthropic.is_none() {
            if allow_development {
                tracing::warn!("no LLM provider keys configured, using development replies");
            } else {
                tracing::error!("no LLM provider keys configured, agent replies will fail");
            }
        }

        Ok(Self {
            default_provider: config.default_provider,
            openai,
            anthropic,
            development: Arc::new(DevelopmentGateway::default()),
            allow_development,
        })
    }

    /// Router that serves every agent from `gateway`.
    pub fn single(gateway: Arc<dyn AgentGateway>) -> Self {
        Self {
            default_provider: ProviderKind::Development,
            openai: None,
            anthropic: None,
            development: gateway,
            allow_development: true,
        }
    }

    pub fn provider_for(&self, agent: &AgentProfile) -> ProviderKind {
        ProviderKind::from_name(&agent.llm_provider).unwrap_or(self.default_provider)
    }

    fn select(&self, agent: &AgentProfile) -> Result<Arc<dyn AgentGateway>, GatewayError> {
        let kind = self.provider_for(agent);
        let configured = match kind {
            ProviderKind::OpenAi => self.openai.clone(),
            ProviderKind::Anthropic => self.anthropic.clone(),
            ProviderKind::Development => None,
        };
        match configured {
            Some(gateway) => Ok(gateway),
            None if self.allow_development => Ok(self.development.clone()),
            None => Err(GatewayError::Unavailable(format!(
                "provider '{}' is not configured",
                agent.llm_provider
            ))),
        }
    }
}

#[async_trait]
impl AgentGateway for GatewayRouter {
    fn name(&self) -> &'static str {
        "router"
    }

    async fn stream_reply(&self, request: ReplyRequest) -> Result<ReplyStream, GatewayError> {
        let gateway = self.select(&request.agent)?;
        tracing::debug!(
            agent_id = %request.agent.id,
            provider = gateway.name(),
            history = request.history.len(),
            "requesting agent reply"
        );
        gateway.stream_reply(request).await
    }
}
