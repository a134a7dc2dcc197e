use anyhow::{anyhow, Error, Result};
use dotenvy::dotenv;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub broker_url: String,
    pub store_url: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_rate_limit_quota")]
    pub rate_limit_quota: u32,

    #[serde(default = "default_rate_limit_window_seconds")]
    pub rate_limit_window_seconds: u64,

    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl: u64,

    #[serde(default)]
    pub node_env: Environment,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    #[serde(default)]
    pub force_failure: bool,
}

fn default_port() -> u16 {
    3000
}

fn default_rate_limit_quota() -> u32 {
    50
}

fn default_rate_limit_window_seconds() -> u64 {
    3600
}

fn default_idempotency_ttl() -> u64 {
    86_400
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_ms() -> u64 {
    1_000
}

fn default_retry_max_ms() -> u64 {
    16_000
}

fn default_prefetch_count() -> u16 {
    10
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {e}"))?;
        Ok(config)
    }

    /// Rate-limit window in milliseconds, the score resolution of the
    /// admission script.
    pub fn window_ms(&self) -> u64 {
        self.rate_limit_window_seconds.saturating_mul(1_000)
    }
}
