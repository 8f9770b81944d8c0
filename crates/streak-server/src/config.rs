//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the reference backend can start with zero
//! configuration for local development and tests.

use std::net::SocketAddr;

use streak_shared::constants::{APP_NAME, DEFAULT_HTTP_PORT};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Human-readable name reported by `/info`.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Most records one `/scores` query may return.
    /// Env: `MAX_SCORE_PAGE`
    /// Default: `1000`
    pub max_score_page: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            instance_name: format!("{APP_NAME} Node"),
            max_score_page: 1000,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Ok(val) = std::env::var("MAX_SCORE_PAGE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_score_page = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_SCORE_PAGE, using default"),
            }
        }

        config
    }
}
