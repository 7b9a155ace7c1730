use std::sync::Arc;

use tokio::time::Instant;

use crate::domain::{AnalysisResult, PageSelectionRequest, Timing};

use super::{
    inference::{
        build_classification_request, build_explanation_request, parse_classification,
        parse_explanation,
    },
    AnalysisError, ChatTransport,
};

/// Runs the explanation call and then classifies its answer.
#[derive(Clone)]
pub struct AnalysisService {
    transport: Arc<dyn ChatTransport>,
    explanation_model: String,
    classification_model: String,
}

impl AnalysisService {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        explanation_model: impl Into<String>,
        classification_model: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            explanation_model: explanation_model.into(),
            classification_model: classification_model.into(),
        }
    }

    pub async fn analyze(
        &self,
        page: &PageSelectionRequest,
    ) -> Result<AnalysisResult, AnalysisError> {
        let started = Instant::now();
        let request = build_explanation_request(&self.explanation_model, page);
        let explanation = parse_explanation(self.transport.complete(&request).await?)?;
        let stage1 = started.elapsed();
        tracing::debug!(
            target: "analysis",
            elapsed_ms = stage1.as_millis() as u64,
            citations = explanation.citations.len(),
            "explanation stage finished"
        );

        let started = Instant::now();
        let request = build_classification_request(&self.classification_model, &explanation.content);
        let accuracy = parse_classification(self.transport.complete(&request).await?)?;
        let stage2 = started.elapsed();
        tracing::debug!(
            target: "analysis",
            elapsed_ms = stage2.as_millis() as u64,
            accuracy = %accuracy,
            "classification stage finished"
        );

        Ok(AnalysisResult {
            accuracy,
            explanation: explanation.content,
            citations: explanation.citations,
            timing: Timing::new(stage1, stage2),
        })
    }
}
