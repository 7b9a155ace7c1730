use tokio::time::Instant;

use crate::{
    ai::AnalysisService,
    domain::{AnalysisFailure, FactCheckResponse, PageSelectionRequest},
    tasks::rate_limiter::RateLimiter,
};

pub const ANALYSIS_FAILED: &str = "Failed to analyze the statement";
pub const RATE_LIMIT_FAILED: &str = "Failed to check the rate limit";

pub struct FactCheckOrchestrator {
    limiter: RateLimiter,
    analysis: AnalysisService,
}

impl FactCheckOrchestrator {
    pub fn new(limiter: RateLimiter, analysis: AnalysisService) -> Self {
        Self { limiter, analysis }
    }

    /// Gate on the quota, run the analysis and fold every outcome into one
    /// response. Never returns an error.
    pub async fn handle(&self, request: &PageSelectionRequest) -> FactCheckResponse {
        let started = Instant::now();
        let response = self.process(request).await;

        tracing::info!(
            target: "orchestrator",
            title = %request.title,
            url = %request.url,
            text_len = request.text.chars().count(),
            outcome = response.kind(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fact_check_completed"
        );
        response
    }

    async fn process(&self, request: &PageSelectionRequest) -> FactCheckResponse {
        match self.limiter.check_and_consume().await {
            Ok(true) => {}
            Ok(false) => {
                return FactCheckResponse::RateLimitExceeded {
                    error: self.quota_message(),
                };
            }
            Err(err) => {
                tracing::error!(target: "orchestrator", error = %err, "rate limit check failed");
                return FactCheckResponse::Failure(AnalysisFailure {
                    error: RATE_LIMIT_FAILED.to_string(),
                    details: Some(format!("{err:#}")),
                });
            }
        }

        match self.analysis.analyze(request).await {
            Ok(result) => FactCheckResponse::Result(result),
            Err(err) => {
                // `{:#}` keeps the reqwest source chain in the details.
                let cause = format!("{:#}", anyhow::Error::from(err));
                tracing::error!(target: "orchestrator", error = %cause, "analysis failed");
                FactCheckResponse::Failure(AnalysisFailure {
                    error: ANALYSIS_FAILED.to_string(),
                    details: Some(format!("Failed to analyze accuracy: {cause}")),
                })
            }
        }
    }

    fn quota_message(&self) -> String {
        format!(
            "You have reached the limit of {} fact checks per day. Please try again tomorrow.",
            self.limiter.policy().limit
        )
    }
}
