//! The request multiplexer: every request that is not `/_connect` or
//! `/_agents` lands here and is forwarded to the agent claiming its host.
//!
//! Per request: admit (resolve host, allocate a correlation id, register a
//! pending entry), forward (`request-start`, body chunks, `request-end`),
//! then stream the agent's `response-start`/`data`/`data-end` events back as
//! a chunked HTTP response. Exactly one round trip; no retry, no buffering
//! beyond the bounded chunk queue.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::TunnelError;
use crate::state::AppState;
use crate::tunnel::messages::ServerMessage;
use crate::tunnel::session::{AgentSession, PendingRequest, ResponseHead};

pub async fn proxy(State(state): State<AppState>, request: Request) -> Response {
    if wants_websocket(request.headers()) {
        return (StatusCode::BAD_REQUEST, "WebSocket not supported").into_response();
    }
    let Some(host) = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_ascii_lowercase)
    else {
        debug!("rejecting request without a host header");
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(session) = state.registry.resolve(&host).await else {
        let err = TunnelError::HostNotRegistered(host);
        debug!(%err, "rejecting proxied request");
        return StatusCode::BAD_REQUEST.into_response();
    };

    let correlation_id = Uuid::new_v4().to_string();
    let (parts, body) = request.into_parts();
    let has_body = request_has_body(&parts.headers);

    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(state.config.tunnel.response_buffer);
    session
        .insert_pending(
            correlation_id.clone(),
            PendingRequest::new(head_tx, body_tx),
        )
        .await;

    let start = ServerMessage::RequestStart {
        id: correlation_id.clone(),
        domain: host,
        method: parts.method.to_string(),
        url: request_url(&parts.uri),
        headers: flatten_headers(&parts.headers),
        has_body,
    };
    if let Err(err) = session.channel.send(start).await {
        warn!(%err, "failed to forward request to agent");
        session.remove_pending(&correlation_id).await;
        return StatusCode::BAD_GATEWAY.into_response();
    }

    if has_body {
        tokio::spawn(forward_request_body(
            Arc::clone(&session),
            correlation_id.clone(),
            body,
            state.config.tunnel.body_chunk_size,
        ));
    }

    // Body forwarding runs concurrently; the response cannot start before
    // the agent sends response-start.
    let head = tokio::select! {
        head = head_rx => match head {
            Ok(head) => head,
            // Pending entry dropped before a head arrived.
            Err(_) => return StatusCode::BAD_GATEWAY.into_response(),
        },
        () = session.channel.closed() => {
            session.remove_pending(&correlation_id).await;
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    stream_response(&head, body_rx)
}

/// Pump the request body to the agent in fixed-size reads, then mark it
/// complete. Sends only the bytes each read actually filled.
async fn forward_request_body(
    session: Arc<AgentSession>,
    id: String,
    body: Body,
    chunk_size: usize,
) {
    let stream = body.into_data_stream().map_err(std::io::Error::other);
    let mut reader = StreamReader::new(stream);
    let mut buf = vec![0u8; chunk_size];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let msg = ServerMessage::RequestData {
                    id: id.clone(),
                    chunk: Bytes::copy_from_slice(&buf[..n]),
                };
                if session.channel.send(msg).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                debug!(%err, "request body read failed");
                break;
            }
        }
    }
    if let Err(err) = session.channel.send(ServerMessage::RequestEnd { id }).await {
        debug!(%err, "failed to complete request body");
    }
}

/// Build the HTTP response from the agent's head and the chunk sink. The
/// body length is unknown up front, so the agent's framing headers are
/// replaced with `transfer-encoding: chunked`.
fn stream_response(head: &ResponseHead, body_rx: mpsc::Receiver<Bytes>) -> Response {
    let status = StatusCode::from_u16(head.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in &head.headers {
            if name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("transfer-encoding")
            {
                continue;
            }
            let (Ok(parsed_name), Ok(parsed_value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_str(value),
            ) else {
                warn!(header = %name, "dropping invalid response header from agent");
                continue;
            };
            headers.append(parsed_name, parsed_value);
        }
        headers.insert(
            header::TRANSFER_ENCODING,
            HeaderValue::from_static("chunked"),
        );
    }
    let body = Body::from_stream(ReceiverStream::new(body_rx).map(Ok::<_, Infallible>));
    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

fn wants_websocket(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Path plus query, with the `?` separator only when a query is present.
fn request_url(uri: &Uri) -> String {
    match uri.query() {
        Some(query) if !query.is_empty() => format!("{}?{query}", uri.path()),
        _ => uri.path().to_string(),
    }
}

/// Whether the request carries a body worth pumping.
fn request_has_body(headers: &HeaderMap) -> bool {
    let declared_len = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    declared_len.is_some_and(|n| n > 0) || headers.contains_key(header::TRANSFER_ENCODING)
}

/// Collapse a `HeaderMap` into the wire's string map, joining repeated
/// headers with commas.
fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        map.entry(name.as_str().to_string())
            .and_modify(|joined| {
                joined.push(',');
                joined.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_includes_query_separator() {
        let uri: Uri = "http://acme.test/foo?x=1&y=2".parse().unwrap();
        assert_eq!(request_url(&uri), "/foo?x=1&y=2");
    }

    #[test]
    fn url_without_query_has_no_separator() {
        let uri: Uri = "http://acme.test/foo".parse().unwrap();
        assert_eq!(request_url(&uri), "/foo");
    }

    #[test]
    fn body_detection() {
        let mut headers = HeaderMap::new();
        assert!(!request_has_body(&headers));

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        assert!(!request_has_body(&headers));

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        assert!(request_has_body(&headers));

        let mut chunked = HeaderMap::new();
        chunked.insert(
            header::TRANSFER_ENCODING,
            HeaderValue::from_static("chunked"),
        );
        assert!(request_has_body(&chunked));
    }

    #[test]
    fn repeated_headers_join_with_commas() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        let map = flatten_headers(&headers);
        assert_eq!(map["accept"], "text/html,application/json");
    }

    #[test]
    fn websocket_upgrade_is_detected_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(wants_websocket(&headers));
        assert!(!wants_websocket(&HeaderMap::new()));
    }
}
