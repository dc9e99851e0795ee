// src/config.rs
use crate::models::{ModelProfile, ModelSpec};
use crate::services::profile_store::ENV_PROFILE_ID;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_MODELS: &str = "gemini-2.5-flash,gemini-2.0-flash";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub redis_url: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub models: Vec<String>,
    pub request_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let request_timeout = match non_blank("REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                anyhow::anyhow!("REQUEST_TIMEOUT_SECS must be a number of seconds: {}", e)
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let models = parse_model_list(
            &non_blank("GEMINI_MODELS").unwrap_or_else(|| DEFAULT_MODELS.to_string()),
        );

        Ok(Self {
            bind_addr: non_blank("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            redis_url: non_blank("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            api_key: non_blank("GEMINI_API_KEY").unwrap_or_default(),
            base_url: non_blank("GEMINI_BASE_URL"),
            models,
            request_timeout: Duration::from_secs(request_timeout),
        })
    }

    /// The profile sourced from the environment. It cannot be edited or deleted.
    pub fn env_profile(&self) -> ModelProfile {
        ModelProfile {
            id: ENV_PROFILE_ID.to_string(),
            name: "Environment".to_string(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            models: self.models.iter().map(ModelSpec::from_name).collect(),
            is_default: true,
        }
    }
}

fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}
