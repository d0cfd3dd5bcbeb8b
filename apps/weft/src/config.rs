//! # Configuration
//!
//! Optional `weft.toml` plus environment overrides.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//!
//! [history]
//! capacity = 100
//!
//! [security]
//! cors_origins = ["http://localhost:3000"]
//! rate_limit = 100
//! ```
//!
//! ## Environment Variables
//!
//! - `WEFT_CORS_ORIGINS`: comma-separated origins, or `*` for all
//! - `WEFT_RATE_LIMIT`: requests per second, `0` disables limiting
//! - `WEFT_API_KEY`: read by the auth middleware, never stored here

use serde::{Deserialize, Serialize};
use std::path::Path;
use weft_core::WeftError;
use weft_core::primitives::MAX_STACK;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "weft.toml";

/// Default rate limit in requests per second.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

// =============================================================================
// SECTIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum undo entries kept per session.
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_STACK,
        }
    }
}

/// CORS and rate limiting. `None` means "use the built-in default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub cors_origins: Option<Vec<String>>,
    pub rate_limit: Option<u32>,
}

impl SecurityConfig {
    /// Overlay `WEFT_CORS_ORIGINS` and `WEFT_RATE_LIMIT` onto the file values.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        if let Ok(origins) = std::env::var("WEFT_CORS_ORIGINS") {
            self.cors_origins = Some(
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
        if let Some(limit) = std::env::var("WEFT_RATE_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.rate_limit = Some(limit);
        }
        self
    }

    pub fn rate_limit(&self) -> u32 {
        self.rate_limit.unwrap_or(DEFAULT_RATE_LIMIT)
    }
}

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub history: HistoryConfig,
    pub security: SecurityConfig,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, WeftError> {
        toml::from_str(text).map_err(|e| WeftError::DeserializationError(e.to_string()))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `weft.toml` in the working
    /// directory is used when present, defaults otherwise. Environment
    /// overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, WeftError> {
        let config = match explicit {
            Some(path) => Self::read(path)?,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    Self::read(fallback)?
                } else {
                    tracing::debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    Self::default()
                }
            }
        };
        Ok(config.with_env())
    }

    fn read(path: &Path) -> Result<Self, WeftError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            WeftError::IoError(format!("Read config '{}': {}", path.display(), e))
        })?;
        let config = Self::from_toml(&text)?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    #[must_use]
    pub fn with_env(mut self) -> Self {
        self.security = self.security.with_env();
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").expect("parse");
        assert_eq!(config, Config::default());
        assert_eq!(config.history.capacity, MAX_STACK);
        assert_eq!(config.security.rate_limit(), DEFAULT_RATE_LIMIT);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 9000

            [security]
            cors_origins = ["http://example.test"]
            "#,
        )
        .expect("parse");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.security.cors_origins,
            Some(vec!["http://example.test".to_string()])
        );
        assert_eq!(config.security.rate_limit, None);
    }

    #[test]
    fn malformed_file_is_rejected() {
        let err = Config::from_toml("[server]\nport = \"eighty\"").expect_err("type error");
        assert!(matches!(err, WeftError::DeserializationError(_)));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let temp = tempfile::tempdir().expect("temp dir");
        let err = Config::load(Some(&temp.path().join("absent.toml"))).expect_err("missing");
        assert!(matches!(err, WeftError::IoError(_)));
    }

    #[test]
    fn explicit_path_is_read() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("weft.toml");
        std::fs::write(&path, "[history]\ncapacity = 7\n").expect("write");
        let config = Config::load(Some(&path)).expect("load");
        assert_eq!(config.history.capacity, 7);
    }
}
