//! `GET /_connect` — the agent-facing WebSocket endpoint.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocket;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::state::AppState;
use crate::tunnel::channel::DuplexChannel;
use crate::tunnel::codec::FramedCodec;
use crate::tunnel::session::AgentSession;

/// Upgrade an agent connection and run its session until the socket dies.
/// Anything that is not a WebSocket upgrade gets a 400.
pub async fn connect(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(ws) = ws else {
        return (StatusCode::BAD_REQUEST, "Expected WebSocket").into_response();
    };
    let client_id = Uuid::new_v4().to_string();
    let span = info_span!("agent", client_id = %client_id);
    ws.on_upgrade(move |socket| run_session(socket, state, client_id).instrument(span))
        .into_response()
}

/// The session message loop: construct the channel, track the session, and
/// dispatch inbound agent events until the channel closes.
async fn run_session(socket: WebSocket, state: AppState, client_id: String) {
    let channel = DuplexChannel::new(socket, FramedCodec, state.config.tunnel.channel_capacity);
    let session = Arc::new(AgentSession::new(client_id, channel));
    state.registry.on_connect(Arc::clone(&session)).await;
    info!("agent connected");

    loop {
        tokio::select! {
            () = session.channel.closed() => break,
            msg = session.channel.recv() => {
                let Some(msg) = msg else { break };
                let id = msg.id().to_string();
                let kind = msg.kind();
                if let Err(err) = session.dispatch(&state.registry, msg).await {
                    // Request-local: drop the offending entry, keep serving.
                    warn!(%err, kind, "failed to handle agent message");
                    session.remove_pending(&id).await;
                }
            }
        }
    }

    state.registry.on_disconnect(&session).await;
    info!("agent disconnected");
}
