use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::database::config::DatabaseConfig;
use crate::logging::LogConfig;
use crate::realtime::BackpressurePolicy;

const DEVELOPMENT_SECRET: &str = "your-secret-key-change-in-production";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub worker_threads: usize,
    pub api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            api_prefix: "/api/v1".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("server.host '{}' is not an IP address", self.host)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub secret_key: String,
    pub algorithm: String,
    pub access_token_expire_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: DEVELOPMENT_SECRET.to_string(),
            algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    OpenAi,
    Development,
}

impl ProviderKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAi),
            "development" | "mock" => Some(Self::Development),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub default_provider: ProviderKind,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub request_timeout_secs: u64,
    pub chunk_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: ProviderKind::Anthropic,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            anthropic_api_key: None,
            anthropic_base_url: "https://api.anthropic.com".to_string(),
            request_timeout_secs: 60,
            chunk_timeout_secs: 30,
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }
}

/// Per-connection limits and participation rules for the chat socket
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Number of recent messages handed to the agent as context
    pub history_window: usize,
    /// Outbound frames queued per connection before backpressure applies
    pub outbound_buffer: usize,
    pub backpressure: BackpressurePolicy,
    pub max_message_bytes: usize,
    pub ping_interval_secs: u64,
    pub auto_leave_on_disconnect: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            history_window: 20,
            outbound_buffer: 256,
            backpressure: BackpressurePolicy::Disconnect,
            max_message_bytes: 64 * 1024,
            ping_interval_secs: 30,
            auto_leave_on_disconnect: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub realtime: RealtimeConfig,
    pub log: LogConfig,
}

impl AppConfig {
    /// Load defaults, then `config/default` and `config/{RUN_MODE}`, then
    /// `JOULAA__*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name("config/default").required(false))
            .add_source(::config::File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                ::config::Environment::with_prefix("JOULAA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: AppConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.secret_key.trim().is_empty() {
            return Err(ConfigError::Invalid("auth.secret_key must be set".into()));
        }
        if self.environment == Environment::Production && self.auth.secret_key == DEVELOPMENT_SECRET {
            return Err(ConfigError::Invalid(
                "auth.secret_key still has the development default".into(),
            ));
        }
        if !self.auth.algorithm.eq_ignore_ascii_case("HS256") {
            return Err(ConfigError::Invalid(format!(
                "auth.algorithm '{}' is not supported",
                self.auth.algorithm
            )));
        }
        if self.realtime.outbound_buffer == 0 {
            return Err(ConfigError::Invalid("realtime.outbound_buffer must be positive".into()));
        }
        if self.realtime.history_window == 0 {
            return Err(ConfigError::Invalid("realtime.history_window must be positive".into()));
        }
        self.server.socket_addr()?;
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.realtime.history_window, 20);
        assert_eq!(cfg.server.port, 8000);
    }

    #[test]
    fn production_rejects_development_secret() {
        let cfg = AppConfig {
            environment: Environment::Production,
            ..AppConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_asymmetric_algorithms() {
        let mut cfg = AppConfig::default();
        cfg.auth.algorithm = "RS256".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn provider_names_are_case_insensitive() {
        assert_eq!(ProviderKind::from_name("OpenAI"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::from_name("anthropic"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::from_name("gemini"), None);
    }
}
