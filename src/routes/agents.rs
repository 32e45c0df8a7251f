//! `GET /_agents` — connected-agent introspection.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// List connected agents: client id, claimed hosts, in-flight request
/// count, and connection age.
pub async fn list_agents(State(state): State<AppState>) -> Json<Value> {
    let agents = state.registry.agents().await;
    #[allow(clippy::cast_possible_truncation)]
    let uptime_ms = state.start_time.elapsed().as_millis() as u64;
    Json(json!({
        "agents": agents,
        "uptime_ms": uptime_ms,
    }))
}
