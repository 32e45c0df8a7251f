//! Process-wide agent registry: live sessions and host claims.
//!
//! Claims are last-writer-wins — a later `register` for an already-claimed
//! host silently overrides. Release is conditional: a session only removes
//! claims that still point at its own client id, so a re-claimed host
//! survives the old claimant's teardown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::tunnel::session::AgentSession;

/// One row of the `/_agents` listing.
#[derive(Debug, Serialize)]
pub struct AgentInfo {
    pub client_id: String,
    pub hosts: Vec<String>,
    pub pending_requests: usize,
    pub connected_ms: u64,
}

#[derive(Default)]
pub struct Registry {
    sessions: RwLock<HashMap<String, Arc<AgentSession>>>,
    host_claims: RwLock<HashMap<String, String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly connected session.
    pub async fn on_connect(&self, session: Arc<AgentSession>) {
        self.sessions
            .write()
            .await
            .insert(session.client_id.clone(), session);
    }

    /// Point `host` at `session`, overriding any existing claim.
    pub async fn claim(&self, host: &str, session: &AgentSession) {
        session.push_claim(host.to_string()).await;
        self.host_claims
            .write()
            .await
            .insert(host.to_string(), session.client_id.clone());
    }

    /// The session currently claiming `host`, if any.
    pub async fn resolve(&self, host: &str) -> Option<Arc<AgentSession>> {
        let client_id = self.host_claims.read().await.get(host).cloned()?;
        self.sessions.read().await.get(&client_id).cloned()
    }

    /// Tear down a session: release its claims (only those still pointing at
    /// it), forget it, close its channel, and end its in-flight requests.
    pub async fn on_disconnect(&self, session: &Arc<AgentSession>) {
        let hosts = session.claimed_hosts().await;
        {
            let mut claims = self.host_claims.write().await;
            for host in &hosts {
                // Compare-and-delete: a newer claimant keeps the host.
                if claims.get(host).is_some_and(|id| *id == session.client_id) {
                    claims.remove(host);
                }
            }
        }
        self.sessions.write().await.remove(&session.client_id);
        session.channel.close();
        session.clear_pending().await;
        info!(hosts = hosts.len(), "agent session torn down");
    }

    /// Snapshot every live session for the introspection listing.
    pub async fn agents(&self) -> Vec<AgentInfo> {
        let sessions = self.sessions.read().await;
        let now = Instant::now();
        let mut list = Vec::with_capacity(sessions.len());
        for session in sessions.values() {
            #[allow(clippy::cast_possible_truncation)]
            let connected_ms = now.duration_since(session.connected_at).as_millis() as u64;
            list.push(AgentInfo {
                client_id: session.client_id.clone(),
                hosts: session.claimed_hosts().await,
                pending_requests: session.pending_count().await,
                connected_ms,
            });
        }
        list
    }

    /// Close every session's channel. Used during server shutdown.
    pub async fn close_all(&self) {
        for session in self.sessions.read().await.values() {
            session.channel.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::channel::testutil::memory_socket;
    use crate::tunnel::channel::DuplexChannel;
    use crate::tunnel::codec::FramedCodec;

    fn test_session(client_id: &str) -> Arc<AgentSession> {
        let (socket, _peer) = memory_socket();
        Arc::new(AgentSession::new(
            client_id.to_string(),
            DuplexChannel::new(socket, FramedCodec, 16),
        ))
    }

    #[tokio::test]
    async fn resolve_unclaimed_host_is_none() {
        let registry = Registry::new();
        assert!(registry.resolve("acme.test").await.is_none());
    }

    #[tokio::test]
    async fn claim_routes_to_the_session() {
        let registry = Registry::new();
        let session = test_session("a");
        registry.on_connect(session.clone()).await;
        registry.claim("acme.test", &session).await;
        let resolved = registry.resolve("acme.test").await.unwrap();
        assert_eq!(resolved.client_id, "a");
    }

    #[tokio::test]
    async fn later_claim_wins() {
        let registry = Registry::new();
        let first = test_session("a");
        let second = test_session("b");
        registry.on_connect(first.clone()).await;
        registry.on_connect(second.clone()).await;
        registry.claim("acme.test", &first).await;
        registry.claim("acme.test", &second).await;
        assert_eq!(registry.resolve("acme.test").await.unwrap().client_id, "b");
    }

    #[tokio::test]
    async fn disconnect_releases_only_own_claims() {
        let registry = Registry::new();
        let first = test_session("a");
        let second = test_session("b");
        registry.on_connect(first.clone()).await;
        registry.on_connect(second.clone()).await;
        registry.claim("acme.test", &first).await;
        registry.claim("acme.test", &second).await;

        // The earlier claimant disconnects after being overridden; the newer
        // claim must survive.
        registry.on_disconnect(&first).await;
        assert_eq!(registry.resolve("acme.test").await.unwrap().client_id, "b");

        registry.on_disconnect(&second).await;
        assert!(registry.resolve("acme.test").await.is_none());
    }

    #[tokio::test]
    async fn disconnect_forgets_the_session() {
        let registry = Registry::new();
        let session = test_session("a");
        registry.on_connect(session.clone()).await;
        registry.claim("acme.test", &session).await;
        registry.on_disconnect(&session).await;
        assert!(session.channel.is_closed());
        assert!(registry.resolve("acme.test").await.is_none());
        assert!(registry.agents().await.is_empty());
    }
}
