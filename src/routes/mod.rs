//! HTTP surface of the relay.
//!
//! Two real routes plus a fallback:
//!
//! - `GET /_connect` — agent WebSocket upgrade ([`connect`])
//! - `GET /_agents` — connected-agent listing ([`agents`])
//! - everything else — proxied to the agent claiming the request's host
//!   ([`proxy`])

use axum::routing::{any, get};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod agents;
pub mod connect;
pub mod proxy;

/// Build the relay router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/_connect", any(connect::connect))
        .route("/_agents", get(agents::list_agents))
        .fallback(proxy::proxy)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
