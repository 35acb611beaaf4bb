//! Wire framing.
//!
//! Each wire frame is length-delimited and starts with a tag byte:
//! `0x01` for a CBOR envelope, `0x02` for a zstd-compressed binary payload.
//! A `binary-reply` envelope is always followed by exactly one binary frame;
//! the encoder writes both into the same buffer and the decoder yields them
//! as a single [`Frame`]. Decompression never produces more than the size
//! announced in the header, and that size is itself capped at
//! [`MAX_FRAME_LEN`].

use std::io::Read;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ruzstd::decoding::StreamingDecoder;
use ruzstd::encoding::{CompressionLevel, compress_to_vec};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};
use tracing::warn;

use crate::error::{BusError, BusResult};
use crate::message::{Envelope, Frame, Method};

const TAG_ENVELOPE: u8 = 0x01;
const TAG_BINARY: u8 = 0x02;

/// Upper bound on a single wire frame.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

pub struct FrameCodec {
    inner: LengthDelimitedCodec,
    pending: Option<Envelope>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
            pending: None,
        }
    }

    fn decode_wire(&mut self, mut raw: BytesMut) -> BusResult<Option<Frame>> {
        if raw.is_empty() {
            return Err(BusError::Decode("empty frame".to_string()));
        }
        let tag = raw.get_u8();
        match tag {
            TAG_ENVELOPE => {
                let envelope = decode_envelope(&raw)?;
                if let Some(stale) = self.pending.take() {
                    warn!(id = %stale.id, "binary-reply header without payload, dropping");
                }
                if matches!(envelope.method, Method::BinaryReply { .. }) {
                    self.pending = Some(envelope);
                    Ok(None)
                } else {
                    Ok(Some(Frame::new(envelope)))
                }
            }
            TAG_BINARY => {
                let envelope = self.pending.take().ok_or_else(|| {
                    BusError::FrameSequence("binary frame without binary-reply header".to_string())
                })?;
                let size = match &envelope.method {
                    Method::BinaryReply { size, .. } => *size,
                    _ => 0,
                };
                if size > MAX_FRAME_LEN as u64 {
                    return Err(BusError::FrameSequence(format!(
                        "binary-reply announces {size} bytes, limit is {MAX_FRAME_LEN}"
                    )));
                }
                let frame = Frame {
                    envelope,
                    payload: Some(decompress(&raw, size)?),
                };
                frame.verify_payload()?;
                Ok(Some(frame))
            }
            other => Err(BusError::Decode(format!("unknown frame tag {other:#04x}"))),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = BusError;

    /// Malformed frames are logged and skipped; only transport errors
    /// surface, since they end the stream.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, BusError> {
        loop {
            let Some(raw) = self.inner.decode(src)? else {
                return Ok(None);
            };
            match self.decode_wire(raw) {
                Ok(Some(frame)) => return Ok(Some(frame)),
                Ok(None) => continue,
                Err(e) => warn!(error = %e, "dropping malformed bus frame"),
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = BusError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), BusError> {
        let is_binary_reply = matches!(frame.envelope.method, Method::BinaryReply { .. });
        if is_binary_reply != frame.payload.is_some() {
            return Err(BusError::FrameSequence(
                "payload must accompany exactly the binary-reply method".to_string(),
            ));
        }

        let mut head = BytesMut::new();
        head.put_u8(TAG_ENVELOPE);
        head.extend_from_slice(&encode_envelope(&frame.envelope)?);
        self.inner.encode(head.freeze(), dst)?;

        if let Some(payload) = frame.payload {
            let compressed = compress_to_vec(payload.as_ref(), CompressionLevel::Fastest);
            let mut body = BytesMut::with_capacity(compressed.len() + 1);
            body.put_u8(TAG_BINARY);
            body.extend_from_slice(&compressed);
            self.inner.encode(body.freeze(), dst)?;
        }
        Ok(())
    }
}

pub fn encode_envelope(envelope: &Envelope) -> BusResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(envelope, &mut buf).map_err(|e| BusError::Encode(e.to_string()))?;
    Ok(buf)
}

pub fn decode_envelope(bytes: &[u8]) -> BusResult<Envelope> {
    ciborium::from_reader(bytes).map_err(|e| BusError::Decode(e.to_string()))
}

/// Reads at most `limit + 1` bytes so an oversized stream is caught by the
/// size check without being inflated.
fn decompress(data: &[u8], limit: u64) -> BusResult<Bytes> {
    let decoder = StreamingDecoder::new(data).map_err(|e| BusError::Compression(e.to_string()))?;
    let mut out = Vec::new();
    decoder.take(limit + 1).read_to_end(&mut out)?;
    Ok(Bytes::from(out))
}
