pub mod analysis;
pub mod client;
pub mod error;
pub mod inference;

pub use analysis::AnalysisService;
pub use client::{ChatTransport, OpenRouterClient};
pub use error::AnalysisError;
