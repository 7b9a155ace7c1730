use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};

use crate::{domain::RateLimitState, tasks::rate_limiter::RateLimitStore};

const RATE_LIMIT_KEY: &str = "rateLimit";

/// Key-value records scoped to this installation.
#[derive(Clone)]
pub struct StorageRepository {
    pool: SqlitePool,
}

impl StorageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = query_as(r#"SELECT value FROM storage WHERE key = ?1"#)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read storage key {key}"))?;
        Ok(row.map(|(value,)| value))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        query(
            r#"INSERT INTO storage (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP"#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write storage key {key}"))?;
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for StorageRepository {
    async fn load(&self) -> Result<Option<RateLimitState>> {
        self.get(RATE_LIMIT_KEY)
            .await?
            .map(|raw| {
                serde_json::from_str::<RateLimitState>(&raw)
                    .with_context(|| format!("corrupt {RATE_LIMIT_KEY} record: {raw}"))
            })
            .transpose()
    }

    async fn save(&self, state: RateLimitState) -> Result<()> {
        let raw = serde_json::to_string(&state)?;
        self.set(RATE_LIMIT_KEY, &raw).await
    }
}
