//! # Weave Configuration
//!
//! Configuration for the orchestration core, loaded from a TOML file plus
//! `WEAVE_`-prefixed environment overrides.
//!
//! ## Structure
//!
//! ```text
//! config/
//! └── mod.rs    # WeaveConfig + per-section types
//! ```
//!
//! ## Loading
//!
//! Configuration is loaded from `config/weave.toml` (override the path with
//! `WEAVE_CONFIG_PATH`) and then layered with environment variables using a
//! double-underscore separator, e.g. `WEAVE_DATABASE__URL` or
//! `WEAVE_WEB__PORT`. Every section has a `Default` so the system can boot
//! with no file at all.
//!
//! ## Example
//!
//! ```toml
//! [web]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [execution]
//! environment = "development"
//! default_max_request_loops = 20
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{WeaveError, WeaveResult};

/// Default path for the configuration file
const DEFAULT_CONFIG_PATH: &str = "config/weave";

/// Top-level configuration for the orchestration core
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WeaveConfig {
    /// Database connection settings
    #[serde(default)]
    pub database: DatabaseConfig,
    /// HTTP server settings
    #[serde(default)]
    pub web: WebConfig,
    /// Message bus subject bases and channel sizing
    #[serde(default)]
    pub bus: BusConfig,
    /// Event-stream and transport timing
    #[serde(default)]
    pub streaming: StreamingConfig,
    /// Execution environment settings
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl WeaveConfig {
    /// Load configuration from file + environment overrides
    ///
    /// The file is optional; environment variables always win. Returns
    /// `WeaveError::Configuration` if a present file or an override fails to
    /// deserialize.
    pub fn load() -> WeaveResult<Self> {
        let path = std::env::var("WEAVE_CONFIG_PATH")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(
                config::Environment::with_prefix("WEAVE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| WeaveError::Configuration(e.to_string()))
    }
}

/// Database connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    pub url: String,
    /// Maximum pool connections
    #[serde(default = "DatabaseConfig::default_max_connections")]
    pub max_connections: u32,
    /// Seconds to wait when acquiring a connection
    #[serde(default = "DatabaseConfig::default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,
}

impl DatabaseConfig {
    fn default_max_connections() -> u32 {
        10
    }

    fn default_acquire_timeout_seconds() -> u64 {
        5
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/weave".to_string(),
            max_connections: Self::default_max_connections(),
            acquire_timeout_seconds: Self::default_acquire_timeout_seconds(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Graceful-shutdown budget for the whole process
    #[serde(default = "WebConfig::default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl WebConfig {
    fn default_shutdown_timeout_ms() -> u64 {
        30_000
    }

    /// `host:port` string for the TCP listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_ms: Self::default_shutdown_timeout_ms(),
        }
    }
}

/// Message bus subject bases
///
/// Subjects are dotted strings; per-user subjects are derived by appending
/// the user identifier to the base for the event kind.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    /// Base subject for websocket response fan-out
    pub response_base: String,
    /// Base subject for task lifecycle events
    pub lifecycle_base: String,
    /// Base subject for agent invocation
    pub agent_invoke_base: String,
    /// Base subject for tool-gather results
    pub tool_gather_base: String,
    /// Base subject for sub-agent handoff
    pub handoff_base: String,
    /// Base subject for task execution requests
    pub execute_base: String,
    /// Base subject for task finish notifications
    pub finish_base: String,
    /// Bounded buffer capacity for each subscriber channel
    #[serde(default = "BusConfig::default_channel_capacity")]
    pub channel_capacity: usize,
}

impl BusConfig {
    fn default_channel_capacity() -> usize {
        100
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            response_base: "ws.response".to_string(),
            lifecycle_base: "task.lifecycle".to_string(),
            agent_invoke_base: "agent.invoke".to_string(),
            tool_gather_base: "tool.gather".to_string(),
            handoff_base: "task.handoff".to_string(),
            execute_base: "task.execute".to_string(),
            finish_base: "task.finish".to_string(),
            channel_capacity: Self::default_channel_capacity(),
        }
    }
}

/// Event-stream and transport timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// Seconds between event-stream heartbeat frames
    pub heartbeat_interval_seconds: u64,
    /// Deadline for a single transport write
    pub write_timeout_seconds: u64,
    /// Budget for the detached final-status persist on stream teardown
    pub finalize_timeout_seconds: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 30,
            write_timeout_seconds: 5,
            finalize_timeout_seconds: 5,
        }
    }
}

/// Execution environment settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Environment name surfaced in logs ("development", "production", ...)
    pub environment: String,
    /// Fixed administrative user identifier used until a real
    /// authentication layer derives identity from transport context
    pub default_user_id: String,
    /// Default `max_request_loop` for newly created tasks
    pub default_max_request_loops: i32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            default_user_id: "admin".to_string(),
            default_max_request_loops: 20,
        }
    }
}
