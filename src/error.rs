//! Tunnel error kinds.
//!
//! Two families, distinguished by where they are handled rather than by
//! type: request-local errors (`UnknownCorrelationId`, `HostNotRegistered`,
//! `ChannelClosed` seen by a proxy handler) abort a single request and leave
//! the session running; session-fatal errors (`MalformedFrame`,
//! `UnknownMessageType`, `Socket`) tear the channel down through its
//! single-shot close.

use thiserror::Error;

/// Errors produced by the tunnel wire protocol and channel machinery.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Frame shorter than its length prefix, metadata overrunning the frame,
    /// or metadata that is not valid JSON. Session-fatal.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Valid JSON metadata with an unrecognized `type` discriminator.
    /// Session-fatal.
    #[error("unknown message type: {0:?}")]
    UnknownMessageType(String),

    /// Send attempted on a closed duplex channel. The caller aborts its one
    /// request; the session is already gone.
    #[error("channel is closed")]
    ChannelClosed,

    /// A dispatched message referenced a correlation id with no pending
    /// entry. Logged and discarded; the session continues.
    #[error("no pending request for id {0:?}")]
    UnknownCorrelationId(String),

    /// An inbound HTTP request named a host no live agent has claimed.
    #[error("no agent registered for host {0:?}")]
    HostNotRegistered(String),

    /// WebSocket read/write failure or peer close. Session-fatal.
    #[error("socket error: {0}")]
    Socket(String),
}
