use std::{env, time::Duration};

use url::Url;

use super::env::{
    AppConfig, ChannelConfig, ConfigError, DirectoryConfig, LoggingConfig, OpenRouterConfig,
    RateLimitConfig,
};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_lookup(|key| env::var(key).ok())
}

impl AppConfig {
    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = var("OPENROUTER_API_KEY").ok_or(ConfigError::Missing("OPENROUTER_API_KEY"))?;

        let base_url = var("OPENROUTER_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        validate_base_url(&base_url)?;

        let timeout_secs = parse_number::<u64>(var("ANALYSIS_TIMEOUT_SECS"), "ANALYSIS_TIMEOUT_SECS")?
            .unwrap_or(60);

        let openrouter = OpenRouterConfig {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            explanation_model: var("EXPLANATION_MODEL")
                .unwrap_or_else(|| "perplexity/sonar".to_string()),
            classification_model: var("CLASSIFICATION_MODEL")
                .unwrap_or_else(|| "openai/gpt-4o".to_string()),
            referer: var("OPENROUTER_REFERER")
                .unwrap_or_else(|| "https://github.com/robg3/".to_string()),
            title: var("OPENROUTER_TITLE").unwrap_or_else(|| "Context Menu Truthy".to_string()),
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        };

        let rate_limit = RateLimitConfig {
            daily_limit: parse_number(var("DAILY_REQUEST_LIMIT"), "DAILY_REQUEST_LIMIT")?
                .unwrap_or(10),
        };

        let capacity: usize =
            parse_number(var("CHANNEL_CAPACITY"), "CHANNEL_CAPACITY")?.unwrap_or(32);
        if capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "CHANNEL_CAPACITY",
                reason: "must be greater than zero".to_string(),
            });
        }
        let channel = ChannelConfig { capacity };

        let directories = DirectoryConfig {
            logs_dir: var("LOGS_DIR").unwrap_or_else(|| "logs".to_string()),
            data_dir: var("DATA_DIR").unwrap_or_else(|| "data".to_string()),
            db_filename: var("DB_FILENAME").unwrap_or_else(|| "state.db".to_string()),
        };

        let logging = LoggingConfig {
            level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        };

        Ok(Self {
            openrouter,
            rate_limit,
            channel,
            directories,
            logging,
        })
    }
}

fn validate_base_url(raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|err| ConfigError::Invalid {
        key: "OPENROUTER_BASE_URL",
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            key: "OPENROUTER_BASE_URL",
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }
    Ok(())
}

fn parse_number<T>(value: Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|err| ConfigError::Invalid {
                key,
                reason: err.to_string(),
            })
        })
        .transpose()
}
