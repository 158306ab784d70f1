//! Wire framing: length-delimited frames carrying a version byte and
//! an MessagePack-encoded `Message`

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::envelope::Message;

/// Current wire format version. Bumped whenever the `Message` layout
/// changes in a way that isn't forward-compatible.
pub const WIRE_VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame too short to contain a version header")]
    MalformedFrame,

    #[error("unsupported wire version {found}, expected {expected}")]
    VersionMismatch { found: u16, expected: u16 },

    #[error("rmp-serde decode failure: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("rmp-serde encode failure: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frames a byte stream into `Message`s. Wraps `LengthDelimitedCodec`
/// (the length prefix) around an inner version byte plus an
/// `rmp-serde`-encoded body, so a version mismatch is caught before
/// the body is ever deserialized.
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::new(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = rmp_serde::to_vec_named(&item)?;
        let mut framed = BytesMut::with_capacity(2 + body.len());
        framed.put_u16(WIRE_VERSION);
        framed.extend_from_slice(&body);
        self.inner
            .encode(framed.freeze(), dst)
            .map_err(CodecError::Io)
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let frame = match self.inner.decode(src).map_err(CodecError::Io)? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        decode_frame(frame).map(Some)
    }
}

fn decode_frame(mut frame: Bytes) -> Result<Message, CodecError> {
    if frame.len() < 2 {
        return Err(CodecError::MalformedFrame);
    }
    let version = frame.get_u16();
    if version != WIRE_VERSION {
        return Err(CodecError::VersionMismatch {
            found: version,
            expected: WIRE_VERSION,
        });
    }
    let message = rmp_serde::from_read_ref(&frame)?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::envelope::{Action, DiscoveryAction};
    use crate::node_id::NodeId;

    #[test]
    fn round_trips_a_message() {
        let mut codec = FrameCodec::new();
        let original = Message::new(
            "10.0.0.1:5000".parse::<NodeId>().unwrap(),
            Action::Discovery(DiscoveryAction::Register),
        )
        .with_round(1)
        .with_args(vec!["hello".into()]);

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().expect("one frame");
        assert_eq!(decoded.source, original.source);
        assert_eq!(decoded.round, original.round);
        assert_eq!(decoded.args, original.args);
    }

    #[test]
    fn rejects_a_future_wire_version() {
        let mut framed = BytesMut::new();
        framed.put_u16(WIRE_VERSION + 1);
        framed.extend_from_slice(b"\x90");
        let err = decode_frame(framed.freeze()).unwrap_err();
        assert!(matches!(err, CodecError::VersionMismatch { .. }));
    }
}
