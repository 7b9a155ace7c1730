use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openrouter: OpenRouterConfig,
    pub rate_limit: RateLimitConfig,
    pub channel: ChannelConfig,
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub base_url: String,
    pub explanation_model: String,
    pub classification_model: String,
    pub referer: String,
    pub title: String,
    /// `None` leaves remote calls unbounded.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub daily_limit: u32,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
    pub data_dir: String,
    pub db_filename: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
