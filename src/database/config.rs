use serde::Deserialize;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    ConnectOptions, PgPool,
};
use std::time::Duration;
use log::LevelFilter;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres URL; the in-memory store is used when unset
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url: None,
            max_connections: 10,
            min_connections: 1,
            idle_timeout_secs: 600,
        }
    }
}

impl DatabaseConfig {
    pub fn postgres(url: &str) -> Self {
        DatabaseConfig {
            url: Some(url.to_string()),
            ..DatabaseConfig::default()
        }
    }

    pub async fn create_postgres_pool(&self, url: &str) -> Result<PgPool, sqlx::Error> {
        let connect_options = url
            .parse::<PgConnectOptions>()?
            .log_statements(LevelFilter::Debug);
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .idle_timeout(Some(Duration::from_secs(self.idle_timeout_secs)))
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect_options)
            .await
    }
}
