use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::RateLimitState;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Durable home of the single quota record.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn load(&self) -> Result<Option<RateLimitState>>;
    async fn save(&self, state: RateLimitState) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: TimeDelta,
}

impl RateLimitPolicy {
    pub fn daily(limit: u32) -> Self {
        Self {
            limit,
            window: TimeDelta::days(1),
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::daily(10)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed(RateLimitState),
    Denied,
}

/// A missing record behaves like one whose window has just ended.
pub fn evaluate(
    state: Option<RateLimitState>,
    now: DateTime<Utc>,
    policy: RateLimitPolicy,
) -> RateDecision {
    let state = state.unwrap_or(RateLimitState {
        count: 0,
        reset_at: now,
    });

    if now >= state.reset_at {
        RateDecision::Allowed(RateLimitState {
            count: 1,
            reset_at: now + policy.window,
        })
    } else if state.count < policy.limit {
        RateDecision::Allowed(RateLimitState {
            count: state.count + 1,
            ..state
        })
    } else {
        RateDecision::Denied
    }
}

/// Load, decide and persist. The read-modify-write is not atomic: concurrent
/// callers may each observe the same count and overshoot the limit slightly.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policy: RateLimitPolicy,
    clock: Clock,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, policy: RateLimitPolicy) -> Self {
        Self::with_clock(store, policy, Arc::new(Utc::now))
    }

    pub fn with_clock(store: Arc<dyn RateLimitStore>, policy: RateLimitPolicy, clock: Clock) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub async fn check_and_consume(&self) -> Result<bool> {
        let current = self.store.load().await?;
        match evaluate(current, (self.clock)(), self.policy) {
            RateDecision::Allowed(next) => {
                self.store.save(next).await?;
                tracing::debug!(
                    target: "ratelimit",
                    count = next.count,
                    reset_at = %next.reset_at,
                    "request allowed"
                );
                Ok(true)
            }
            RateDecision::Denied => {
                tracing::info!(
                    target: "ratelimit",
                    limit = self.policy.limit,
                    "daily quota exhausted"
                );
                Ok(false)
            }
        }
    }
}
