use serde::{Deserialize, Serialize};

use crate::quota::UsageStats;

/// Body of `POST /api/llm/generate`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    100
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerateResponse {
    pub response: String,
    pub usage: UsageStats,
    /// Backend time in seconds, rounded to two decimals. Absent in test mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_time_seconds: Option<f64>,
    /// Caller's username, only echoed back in test mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Round to two decimals for display.
pub fn round_seconds(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}
