use std::{fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text the user selected plus the page it was selected on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSelectionRequest {
    pub title: String,
    pub url: String,
    pub text: String,
}

/// Verdict vocabulary shared with the rendering surface. The wire strings are
/// matched case-sensitively on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Accuracy {
    #[serde(rename = "Almost certainly true")]
    AlmostCertainlyTrue,
    #[serde(rename = "Somewhere in between")]
    SomewhereInBetween,
    #[serde(rename = "I don't know")]
    DontKnow,
    #[serde(rename = "Requires more context")]
    RequiresMoreContext,
    #[serde(rename = "Almost certainly false")]
    AlmostCertainlyFalse,
}

impl Accuracy {
    /// All labels, ordered from most to least truthful.
    pub const ALL: [Accuracy; 5] = [
        Accuracy::AlmostCertainlyTrue,
        Accuracy::SomewhereInBetween,
        Accuracy::DontKnow,
        Accuracy::RequiresMoreContext,
        Accuracy::AlmostCertainlyFalse,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Accuracy::AlmostCertainlyTrue => "Almost certainly true",
            Accuracy::SomewhereInBetween => "Somewhere in between",
            Accuracy::DontKnow => "I don't know",
            Accuracy::RequiresMoreContext => "Requires more context",
            Accuracy::AlmostCertainlyFalse => "Almost certainly false",
        }
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAccuracy(pub String);

impl fmt::Display for UnknownAccuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown accuracy label {:?}", self.0)
    }
}

impl std::error::Error for UnknownAccuracy {}

impl FromStr for Accuracy {
    type Err = UnknownAccuracy;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Accuracy::ALL
            .into_iter()
            .find(|accuracy| accuracy.label() == value)
            .ok_or_else(|| UnknownAccuracy(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    #[serde(with = "seconds")]
    pub stage1: Duration,
    #[serde(with = "seconds")]
    pub stage2: Duration,
    #[serde(with = "seconds")]
    pub total: Duration,
}

impl Timing {
    pub fn new(stage1: Duration, stage2: Duration) -> Self {
        Self {
            stage1,
            stage2,
            total: stage1 + stage2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub accuracy: Accuracy,
    pub explanation: String,
    #[serde(default)]
    pub citations: Vec<String>,
    pub timing: Timing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFailure {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Exactly one of these is produced per processed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactCheckResponse {
    Result(AnalysisResult),
    Failure(AnalysisFailure),
    RateLimitExceeded { error: String },
}

impl FactCheckResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            FactCheckResponse::Result(_) => "result",
            FactCheckResponse::Failure(_) => "failure",
            FactCheckResponse::RateLimitExceeded { .. } => "rate_limit_exceeded",
        }
    }
}

/// Persisted quota record. `reset_at` is stored as epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub count: u32,
    #[serde(rename = "resetTime", with = "chrono::serde::ts_milliseconds")]
    pub reset_at: DateTime<Utc>,
}

/// Durations travel as `"1.23s"` strings.
mod seconds {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:.2}s", value.as_secs_f64()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let secs = raw
            .strip_suffix('s')
            .unwrap_or(&raw)
            .trim()
            .parse::<f64>()
            .map_err(de::Error::custom)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}
