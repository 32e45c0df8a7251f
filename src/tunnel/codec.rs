//! Hybrid frame layout and the codec seam of the duplex channel.
//!
//! [`encode_frame`]/[`decode_frame`] implement the raw byte layout;
//! [`FramedCodec`] binds them to the message grammar, and [`JsonCodec`] is
//! the metadata-only alternative for peers that never carry a payload.

use bytes::Bytes;

use crate::error::TunnelError;
use crate::tunnel::messages::WireMessage;

/// Length of the little-endian metadata-length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Sanity cap on the declared metadata length. Control-plane metadata is a
/// few hundred bytes in practice; anything near this is a corrupt or hostile
/// frame.
const MAX_METADATA_LEN: usize = 1_048_576;

/// Combine JSON metadata and a binary payload into a single frame.
#[allow(clippy::cast_possible_truncation)]
pub fn encode_frame(metadata: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + metadata.len() + payload.len());
    frame.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
    frame.extend_from_slice(metadata);
    frame.extend_from_slice(payload);
    frame
}

/// Split a frame into its `(metadata, payload)` halves.
///
/// # Errors
///
/// [`TunnelError::MalformedFrame`] if the frame is shorter than the length
/// prefix, the declared metadata length overruns the frame, or the length
/// exceeds the sanity cap.
pub fn decode_frame(frame: &Bytes) -> Result<(Bytes, Bytes), TunnelError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(TunnelError::MalformedFrame(format!(
            "{} byte frame is shorter than the length prefix",
            frame.len()
        )));
    }
    let metadata_len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    if metadata_len > MAX_METADATA_LEN {
        return Err(TunnelError::MalformedFrame(format!(
            "declared metadata length {metadata_len} exceeds cap"
        )));
    }
    let metadata_end = FRAME_HEADER_LEN + metadata_len;
    if metadata_end > frame.len() {
        return Err(TunnelError::MalformedFrame(format!(
            "metadata length {metadata_len} overruns {} byte frame",
            frame.len()
        )));
    }
    Ok((
        frame.slice(FRAME_HEADER_LEN..metadata_end),
        frame.slice(metadata_end..),
    ))
}

/// Serializes outbound messages to wire frames.
pub trait Encoder<S>: Send + Sync {
    /// # Errors
    ///
    /// Returns [`TunnelError::MalformedFrame`] if the metadata cannot be
    /// serialized.
    fn encode(&self, msg: &S) -> Result<Vec<u8>, TunnelError>;
}

/// Parses wire frames into inbound messages.
pub trait Decoder<R>: Send + Sync {
    /// # Errors
    ///
    /// Returns [`TunnelError::MalformedFrame`] or
    /// [`TunnelError::UnknownMessageType`] for frames that do not parse into
    /// the grammar.
    fn decode(&self, frame: Bytes) -> Result<R, TunnelError>;
}

/// The production codec: JSON metadata prefixed by its length, body chunks
/// appended as the raw payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct FramedCodec;

impl<S: WireMessage> Encoder<S> for FramedCodec {
    fn encode(&self, msg: &S) -> Result<Vec<u8>, TunnelError> {
        let metadata = msg.encode_metadata()?;
        Ok(encode_frame(&metadata, msg.chunk()))
    }
}

impl<R: WireMessage> Decoder<R> for FramedCodec {
    fn decode(&self, frame: Bytes) -> Result<R, TunnelError> {
        let (metadata, payload) = decode_frame(&frame)?;
        let mut msg = R::decode_metadata(&metadata)?;
        msg.set_chunk(payload);
        Ok(msg)
    }
}

/// Metadata-only codec: each frame is the bare JSON document, payloads are
/// always empty. Interoperates with peers that speak plain JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<S: WireMessage> Encoder<S> for JsonCodec {
    fn encode(&self, msg: &S) -> Result<Vec<u8>, TunnelError> {
        msg.encode_metadata()
    }
}

impl<R: WireMessage> Decoder<R> for JsonCodec {
    fn decode(&self, frame: Bytes) -> Result<R, TunnelError> {
        R::decode_metadata(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::messages::AgentMessage;

    #[test]
    fn frame_round_trip() {
        let frame = Bytes::from(encode_frame(br#"{"type":"request-end","id":"a"}"#, b"payload"));
        let (metadata, payload) = decode_frame(&frame).unwrap();
        assert_eq!(&metadata[..], br#"{"type":"request-end","id":"a"}"#);
        assert_eq!(&payload[..], b"payload");
    }

    #[test]
    fn frame_with_empty_payload() {
        let frame = Bytes::from(encode_frame(b"{}", b""));
        let (metadata, payload) = decode_frame(&frame).unwrap();
        assert_eq!(&metadata[..], b"{}");
        assert!(payload.is_empty());
    }

    #[test]
    fn data_message_wire_layout() {
        // The exact bytes an agent produces for a 3-byte chunk on id "x".
        let msg = AgentMessage::Data {
            id: "x".to_string(),
            chunk: Bytes::from_static(&[0x00, 0xFF, 0x10]),
        };
        let frame = Encoder::encode(&FramedCodec, &msg).unwrap();
        assert_eq!(&frame[..4], &[0x18, 0x00, 0x00, 0x00], "length prefix");
        assert_eq!(&frame[4..28], br#"{"type":"data","id":"x"}"#);
        assert_eq!(&frame[28..], &[0x00, 0xFF, 0x10]);

        let decoded: AgentMessage = FramedCodec.decode(Bytes::from(frame)).unwrap();
        match decoded {
            AgentMessage::Data { id, chunk } => {
                assert_eq!(id, "x");
                assert_eq!(&chunk[..], &[0x00, 0xFF, 0x10]);
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn frame_shorter_than_prefix_is_malformed() {
        let err = decode_frame(&Bytes::from_static(&[0x01, 0x00])).unwrap_err();
        assert!(matches!(err, TunnelError::MalformedFrame(_)));
    }

    #[test]
    fn metadata_length_overrun_is_malformed() {
        // Declares 100 bytes of metadata in a 6-byte frame.
        let err = decode_frame(&Bytes::from_static(&[0x64, 0x00, 0x00, 0x00, b'{', b'}']))
            .unwrap_err();
        assert!(matches!(err, TunnelError::MalformedFrame(_)));
    }

    #[test]
    fn absurd_metadata_length_is_rejected() {
        let err = decode_frame(&Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF])).unwrap_err();
        assert!(matches!(err, TunnelError::MalformedFrame(_)));
    }

    #[test]
    fn garbage_metadata_is_malformed() {
        let frame = Bytes::from(encode_frame(b"not json", b""));
        let err = <FramedCodec as Decoder<AgentMessage>>::decode(&FramedCodec, frame).unwrap_err();
        assert!(matches!(err, TunnelError::MalformedFrame(_)));
    }

    #[test]
    fn json_codec_skips_framing() {
        let msg = AgentMessage::Register {
            id: "r1".to_string(),
            api_key: String::new(),
            domain: "acme.test".to_string(),
        };
        let bytes = Encoder::encode(&JsonCodec, &msg).unwrap();
        let decoded: AgentMessage = JsonCodec.decode(Bytes::from(bytes)).unwrap();
        match decoded {
            AgentMessage::Register { domain, .. } => assert_eq!(domain, "acme.test"),
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }
}
