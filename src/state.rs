//! Shared application state passed to every handler via Axum's `State`
//! extractor.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::tunnel::registry::Registry;

/// Shared state for the relay.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Live agent sessions and their host claims.
    pub registry: Arc<Registry>,
    /// Monotonic instant when the server started (for uptime reporting).
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(Registry::new()),
            start_time: Instant::now(),
        }
    }
}
