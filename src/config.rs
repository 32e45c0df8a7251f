//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `BACKHAUL_LISTEN`, `BACKHAUL_LOG_LEVEL`
//! 2. **Config file** — path via `--config <path>`, or `backhaul.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//!
//! [logging]
//! level = "info"
//!
//! [tunnel]
//! body_chunk_size = 1024    # request-body read size in bytes
//! channel_capacity = 256    # per-agent send/receive queue depth
//! response_buffer = 64      # per-request response-chunk queue depth
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8080`).
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Tunnel sizing knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    /// Request bodies are read and forwarded in buffers of this many bytes
    /// (default 1024).
    #[serde(default = "default_body_chunk_size")]
    pub body_chunk_size: usize,
    /// Depth of each agent channel's send and receive queues (default 256).
    /// Senders block when full; nothing is dropped.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Depth of the per-request response-chunk queue (default 64).
    #[serde(default = "default_response_buffer")]
    pub response_buffer: usize,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_body_chunk_size() -> usize {
    1024
}
fn default_channel_capacity() -> usize {
    256
}
fn default_response_buffer() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            body_chunk_size: default_body_chunk_size(),
            channel_capacity: default_channel_capacity(),
            response_buffer: default_response_buffer(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file >
    /// defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise
    /// looks for `backhaul.toml` in the current directory, falling back to
    /// compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("backhaul.toml").exists() {
            let content =
                std::fs::read_to_string("backhaul.toml").expect("Failed to read backhaul.toml");
            toml::from_str(&content).expect("Failed to parse backhaul.toml")
        } else {
            Config::default()
        };

        // Env var overrides
        if let Ok(listen) = std::env::var("BACKHAUL_LISTEN") {
            config.server.listen = listen;
        }
        if let Ok(level) = std::env::var("BACKHAUL_LOG_LEVEL") {
            config.logging.level = level;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.tunnel.body_chunk_size, 1024);
        assert_eq!(config.tunnel.channel_capacity, 256);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            listen = "127.0.0.1:9000"

            [tunnel]
            body_chunk_size = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.tunnel.body_chunk_size, 4096);
        assert_eq!(config.tunnel.channel_capacity, 256);
        assert_eq!(config.logging.level, "info");
    }
}
