//! # API Request/Response Types

use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Query string accepted by `/api/{*path}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiQuery {
    #[serde(default, alias = "skipHistory")]
    pub skip_history: bool,
}
