pub mod message;
pub mod types;

pub use message::{BackgroundMessage, ContentMessage, ProcessingResponse};
pub use types::{
    Accuracy, AnalysisFailure, AnalysisResult, FactCheckResponse, PageSelectionRequest,
    RateLimitState, Timing,
};
