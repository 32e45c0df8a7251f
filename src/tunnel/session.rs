//! Per-agent session state and inbound message dispatch.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info};

use crate::error::TunnelError;
use crate::tunnel::channel::DuplexChannel;
use crate::tunnel::messages::{AgentMessage, ServerMessage};
use crate::tunnel::registry::Registry;

/// The head of a proxied response, delivered once per correlation id.
#[derive(Debug)]
pub struct ResponseHead {
    pub status_code: u16,
    /// Reason phrase supplied by the agent. Carried for completeness; the
    /// HTTP writer derives its own from the status code.
    pub status_message: String,
    pub headers: HashMap<String, String>,
}

/// State for one in-flight proxied request, keyed by correlation id on its
/// session. Dropping the record closes the body sink, which ends the HTTP
/// response stream.
pub struct PendingRequest {
    head_tx: Option<oneshot::Sender<ResponseHead>>,
    body_tx: mpsc::Sender<Bytes>,
}

impl PendingRequest {
    pub fn new(head_tx: oneshot::Sender<ResponseHead>, body_tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            head_tx: Some(head_tx),
            body_tx,
        }
    }
}

/// One connected agent: its channel, the hosts it has claimed, and the
/// table of in-flight proxied requests.
pub struct AgentSession {
    pub client_id: String,
    pub channel: DuplexChannel<ServerMessage, AgentMessage>,
    pub connected_at: Instant,
    claimed_hosts: Mutex<Vec<String>>,
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl AgentSession {
    pub fn new(client_id: String, channel: DuplexChannel<ServerMessage, AgentMessage>) -> Self {
        Self {
            client_id,
            channel,
            connected_at: Instant::now(),
            claimed_hosts: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Record a host claim on this session so teardown can release it.
    pub async fn push_claim(&self, host: String) {
        self.claimed_hosts.lock().await.push(host);
    }

    /// Snapshot of the hosts this session has claimed.
    pub async fn claimed_hosts(&self) -> Vec<String> {
        self.claimed_hosts.lock().await.clone()
    }

    /// Admit a proxied request under `id`.
    pub async fn insert_pending(&self, id: String, pending: PendingRequest) {
        self.pending.lock().await.insert(id, pending);
    }

    /// Release the pending entry for `id`, closing its sinks.
    pub async fn remove_pending(&self, id: &str) {
        self.pending.lock().await.remove(id);
    }

    /// Number of in-flight proxied requests.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Release every pending entry. Called on session teardown; the dropped
    /// sinks end all in-flight HTTP responses.
    pub async fn clear_pending(&self) {
        self.pending.lock().await.clear();
    }

    /// Handle one inbound agent message.
    ///
    /// # Errors
    ///
    /// [`TunnelError::UnknownCorrelationId`] when the message references a
    /// request this session is not tracking, and [`TunnelError::ChannelClosed`]
    /// when an ack cannot be sent. Both are request-local; the caller logs
    /// and moves on.
    pub async fn dispatch(&self, registry: &Registry, msg: AgentMessage) -> Result<(), TunnelError> {
        match msg {
            AgentMessage::Register { id, domain, .. } => {
                self.handle_register(registry, id, domain).await
            }
            AgentMessage::ResponseStart {
                id,
                status_code,
                status_message,
                headers,
            } => {
                self.handle_response_start(
                    id,
                    ResponseHead {
                        status_code,
                        status_message,
                        headers,
                    },
                )
                .await
            }
            AgentMessage::Data { id, chunk } => self.handle_data(id, chunk).await,
            AgentMessage::DataEnd { id, error } => self.handle_data_end(id, error).await,
            // Reserved for tunneled WebSocket flows.
            AgentMessage::WsOpened { .. }
            | AgentMessage::WsMessage { .. }
            | AgentMessage::WsClosed { .. } => Ok(()),
        }
    }

    async fn handle_register(
        &self,
        registry: &Registry,
        id: String,
        domain: String,
    ) -> Result<(), TunnelError> {
        // Host names are case-insensitive; claims and lookups both normalize.
        let host = domain.to_ascii_lowercase();
        registry.claim(&host, self).await;
        info!(host = %host, "agent claimed host");
        self.channel
            .send(ServerMessage::Registered { id, domain })
            .await
    }

    async fn handle_response_start(
        &self,
        id: String,
        head: ResponseHead,
    ) -> Result<(), TunnelError> {
        let mut pending = self.pending.lock().await;
        let Some(entry) = pending.get_mut(&id) else {
            return Err(TunnelError::UnknownCorrelationId(id));
        };
        let Some(head_tx) = entry.head_tx.take() else {
            debug!(id = %id, "duplicate response-start ignored");
            return Ok(());
        };
        if head_tx.send(head).is_err() {
            // The HTTP client went away before the head arrived.
            pending.remove(&id);
        }
        Ok(())
    }

    async fn handle_data(&self, id: String, chunk: Bytes) -> Result<(), TunnelError> {
        let body_tx = {
            let pending = self.pending.lock().await;
            let Some(entry) = pending.get(&id) else {
                return Err(TunnelError::UnknownCorrelationId(id));
            };
            entry.body_tx.clone()
        };
        // Pushed outside the table lock: the sink is bounded and a slow HTTP
        // client must not stall dispatch for unrelated requests at teardown.
        if body_tx.send(chunk).await.is_err() {
            debug!(id = %id, "response sink gone, dropping request");
            self.pending.lock().await.remove(&id);
        }
        Ok(())
    }

    async fn handle_data_end(
        &self,
        id: String,
        error: Option<serde_json::Value>,
    ) -> Result<(), TunnelError> {
        if let Some(error) = error {
            debug!(id = %id, %error, "agent reported response error");
        }
        // Dropping the entry closes the body sink; the response stream ends.
        match self.pending.lock().await.remove(&id) {
            Some(_) => Ok(()),
            None => Err(TunnelError::UnknownCorrelationId(id)),
        }
    }
}
