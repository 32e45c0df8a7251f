//! Typed tunnel message grammar.
//!
//! Two enums, one per direction, discriminated by the JSON `type` field.
//! Chunk-bearing variants (`data`, `request-data`) keep their bytes out of
//! the metadata entirely: the field is skipped by serde and bound from the
//! frame payload by the codec, so bodies cross the wire as raw binary.

use std::collections::HashMap;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::TunnelError;

/// Messages an agent sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentMessage {
    /// Claim a host name for this session. The `apiKey` is carried but not
    /// validated.
    #[serde(rename_all = "camelCase")]
    Register {
        id: String,
        #[serde(default)]
        api_key: String,
        domain: String,
    },
    /// Begin the HTTP response for a correlation id.
    #[serde(rename_all = "camelCase")]
    ResponseStart {
        id: String,
        status_code: u16,
        #[serde(default)]
        status_message: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// A response body chunk. The bytes ride as the frame payload.
    Data {
        id: String,
        #[serde(skip)]
        chunk: Bytes,
    },
    /// Response complete. `error` is advisory.
    DataEnd {
        id: String,
        #[serde(default)]
        error: Option<serde_json::Value>,
    },
    /// Reserved for tunneled WebSocket flows.
    WsOpened { id: String },
    /// Reserved for tunneled WebSocket flows.
    WsMessage {
        id: String,
        #[serde(default)]
        data: Option<serde_json::Value>,
    },
    /// Reserved for tunneled WebSocket flows.
    WsClosed { id: String },
}

impl AgentMessage {
    /// The correlation (or registration) id the message refers to.
    pub fn id(&self) -> &str {
        match self {
            Self::Register { id, .. }
            | Self::ResponseStart { id, .. }
            | Self::Data { id, .. }
            | Self::DataEnd { id, .. }
            | Self::WsOpened { id }
            | Self::WsMessage { id, .. }
            | Self::WsClosed { id } => id,
        }
    }

    /// Wire name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::ResponseStart { .. } => "response-start",
            Self::Data { .. } => "data",
            Self::DataEnd { .. } => "data-end",
            Self::WsOpened { .. } => "ws-opened",
            Self::WsMessage { .. } => "ws-message",
            Self::WsClosed { .. } => "ws-closed",
        }
    }
}

/// Messages the relay sends to an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Ack of `register`, echoing the agent-supplied id and domain.
    Registered { id: String, domain: String },
    /// An inbound HTTP request begins. `url` is the path plus query string.
    #[serde(rename_all = "camelCase")]
    RequestStart {
        id: String,
        domain: String,
        method: String,
        url: String,
        headers: HashMap<String, String>,
        has_body: bool,
    },
    /// A request body chunk. The bytes ride as the frame payload.
    RequestData {
        id: String,
        #[serde(skip)]
        chunk: Bytes,
    },
    /// Request body complete.
    RequestEnd { id: String },
    /// Session-level error report.
    Error { message: String },
}

impl ServerMessage {
    /// Wire name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "registered",
            Self::RequestStart { .. } => "request-start",
            Self::RequestData { .. } => "request-data",
            Self::RequestEnd { .. } => "request-end",
            Self::Error { .. } => "error",
        }
    }
}

/// A message that can cross the framed wire: JSON metadata plus an optional
/// out-of-band chunk.
pub trait WireMessage: Sized + Send + 'static {
    /// Wire names this direction accepts, used to tell an unknown `type`
    /// apart from malformed JSON.
    const TYPES: &'static [&'static str];

    /// Serialize the metadata document (never includes the chunk).
    ///
    /// # Errors
    ///
    /// [`TunnelError::MalformedFrame`] if serialization fails.
    fn encode_metadata(&self) -> Result<Vec<u8>, TunnelError>;

    /// Parse the metadata document.
    ///
    /// # Errors
    ///
    /// [`TunnelError::UnknownMessageType`] for an unrecognized `type`,
    /// [`TunnelError::MalformedFrame`] otherwise.
    fn decode_metadata(metadata: &[u8]) -> Result<Self, TunnelError>;

    /// The out-of-band chunk, empty for chunkless variants.
    fn chunk(&self) -> &[u8];

    /// Bind the frame payload. No-op for chunkless variants.
    fn set_chunk(&mut self, chunk: Bytes);
}

/// Peek the `type` discriminator before committing to a full parse.
#[derive(Deserialize)]
struct TypeTag {
    #[serde(rename = "type")]
    kind: String,
}

fn decode_tagged<T: DeserializeOwned>(
    metadata: &[u8],
    known: &[&str],
) -> Result<T, TunnelError> {
    let tag: TypeTag = serde_json::from_slice(metadata)
        .map_err(|e| TunnelError::MalformedFrame(format!("metadata is not a tagged object: {e}")))?;
    if !known.contains(&tag.kind.as_str()) {
        return Err(TunnelError::UnknownMessageType(tag.kind));
    }
    serde_json::from_slice(metadata)
        .map_err(|e| TunnelError::MalformedFrame(format!("invalid {} metadata: {e}", tag.kind)))
}

impl WireMessage for AgentMessage {
    const TYPES: &'static [&'static str] = &[
        "register",
        "response-start",
        "data",
        "data-end",
        "ws-opened",
        "ws-message",
        "ws-closed",
    ];

    fn encode_metadata(&self) -> Result<Vec<u8>, TunnelError> {
        serde_json::to_vec(self).map_err(|e| TunnelError::MalformedFrame(e.to_string()))
    }

    fn decode_metadata(metadata: &[u8]) -> Result<Self, TunnelError> {
        decode_tagged(metadata, Self::TYPES)
    }

    fn chunk(&self) -> &[u8] {
        match self {
            Self::Data { chunk, .. } => chunk,
            _ => &[],
        }
    }

    fn set_chunk(&mut self, chunk: Bytes) {
        if let Self::Data { chunk: slot, .. } = self {
            *slot = chunk;
        }
    }
}

impl WireMessage for ServerMessage {
    const TYPES: &'static [&'static str] = &[
        "registered",
        "request-start",
        "request-data",
        "request-end",
        "error",
    ];

    fn encode_metadata(&self) -> Result<Vec<u8>, TunnelError> {
        serde_json::to_vec(self).map_err(|e| TunnelError::MalformedFrame(e.to_string()))
    }

    fn decode_metadata(metadata: &[u8]) -> Result<Self, TunnelError> {
        decode_tagged(metadata, Self::TYPES)
    }

    fn chunk(&self) -> &[u8] {
        match self {
            Self::RequestData { chunk, .. } => chunk,
            _ => &[],
        }
    }

    fn set_chunk(&mut self, chunk: Bytes) {
        if let Self::RequestData { chunk: slot, .. } = self {
            *slot = chunk;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_parses_camel_case_fields() {
        let msg = AgentMessage::decode_metadata(
            br#"{"type":"register","id":"r1","apiKey":"k","domain":"acme.test"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            AgentMessage::Register {
                id: "r1".to_string(),
                api_key: "k".to_string(),
                domain: "acme.test".to_string(),
            }
        );
    }

    #[test]
    fn response_start_parses_headers() {
        let msg = AgentMessage::decode_metadata(
            br#"{"type":"response-start","id":"m","statusCode":200,"statusMessage":"OK","headers":{"content-type":"text/plain"}}"#,
        )
        .unwrap();
        match msg {
            AgentMessage::ResponseStart {
                status_code,
                headers,
                ..
            } => {
                assert_eq!(status_code, 200);
                assert_eq!(headers["content-type"], "text/plain");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn data_metadata_omits_the_chunk() {
        let msg = AgentMessage::Data {
            id: "x".to_string(),
            chunk: Bytes::from_static(b"bytes that must not leak into JSON"),
        };
        assert_eq!(msg.encode_metadata().unwrap(), br#"{"type":"data","id":"x"}"#);
    }

    #[test]
    fn request_start_serializes_has_body_camel_case() {
        let msg = ServerMessage::RequestStart {
            id: "m".to_string(),
            domain: "acme.test".to_string(),
            method: "GET".to_string(),
            url: "/foo?x=1".to_string(),
            headers: HashMap::new(),
            has_body: false,
        };
        let json = String::from_utf8(msg.encode_metadata().unwrap()).unwrap();
        assert!(json.contains(r#""hasBody":false"#), "got: {json}");
        assert!(json.starts_with(r#"{"type":"request-start""#), "got: {json}");
    }

    #[test]
    fn unknown_type_is_its_own_error() {
        let err = AgentMessage::decode_metadata(br#"{"type":"flush","id":"x"}"#).unwrap_err();
        match err {
            TunnelError::UnknownMessageType(kind) => assert_eq!(kind, "flush"),
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn missing_tag_is_malformed() {
        let err = AgentMessage::decode_metadata(br#"{"id":"x"}"#).unwrap_err();
        assert!(matches!(err, TunnelError::MalformedFrame(_)));
    }

    #[test]
    fn error_report_shape() {
        let msg = ServerMessage::Error {
            message: "boom".to_string(),
        };
        assert_eq!(
            msg.encode_metadata().unwrap(),
            br#"{"type":"error","message":"boom"}"#
        );
    }

    #[test]
    fn data_end_error_field_is_optional() {
        let msg = AgentMessage::decode_metadata(br#"{"type":"data-end","id":"m"}"#).unwrap();
        assert_eq!(
            msg,
            AgentMessage::DataEnd {
                id: "m".to_string(),
                error: None,
            }
        );
    }
}
