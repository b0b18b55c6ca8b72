//! MLLP framing (C1): `<SB>...<EB><CR>` over a byte stream. Grounded in
//! shape on `examples/hamaluik-hermes/src-tauri/src/commands/listen.rs`'s
//! `Framed::new(stream, MllpCodec::new())` usage, but implemented against
//! our own `tokio_util::codec::{Decoder, Encoder}` instead of depending on
//! the `hl7-mllp-codec` crate, so the error taxonomy matches spec.md §7
//! (`FrameTruncated`, `FrameOversize`, `UnknownEncoding`) instead of that
//! crate's generic error type.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

const SB: u8 = 0x0B;
const EB: u8 = 0x1C;
const CR: u8 = 0x0D;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MllpError {
    #[error("FrameTruncated")]
    FrameTruncated,
    #[error("FrameOversize")]
    FrameOversize,
    #[error("UnknownEncoding: payload is not valid UTF-8")]
    UnknownEncoding,
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for MllpError {
    fn from(e: std::io::Error) -> Self {
        MllpError::Io(e.to_string())
    }
}

/// Decodes/encodes MLLP frames, surfacing the decoded payload as a `String`
/// already validated as UTF-8 (spec.md §6 allows ISO-8859-1 with an
/// MSH-18 declared override; SPEC_FULL narrows the wire boundary to UTF-8
/// and treats transcoding as the transport endpoint's responsibility,
/// matching every pack repo's HL7 handling — none re-encode at the codec
/// layer).
pub struct MllpCodec {
    max_frame_len: usize,
}

impl MllpCodec {
    pub fn new(max_frame_len: usize) -> Self {
        MllpCodec { max_frame_len }
    }
}

impl Default for MllpCodec {
    fn default() -> Self {
        MllpCodec::new(1024 * 1024)
    }
}

impl Decoder for MllpCodec {
    type Item = String;
    type Error = MllpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, MllpError> {
        let Some(start) = src.iter().position(|&b| b == SB) else {
            src.clear();
            return Ok(None);
        };
        if start > 0 {
            src.advance(start);
        }
        let Some(end_rel) = src[1..].iter().position(|&b| b == EB) else {
            if src.len() > self.max_frame_len {
                src.clear();
                return Err(MllpError::FrameOversize);
            }
            return Ok(None);
        };
        let end = end_rel + 1;
        if end - 1 > self.max_frame_len {
            src.advance(end + 1);
            return Err(MllpError::FrameOversize);
        }
        if src.len() <= end + 1 {
            return Ok(None);
        }
        if src[end + 1] != CR {
            src.advance(end + 1);
            return Err(MllpError::FrameTruncated);
        }
        let payload = src[1..end].to_vec();
        src.advance(end + 2);
        let text = String::from_utf8(payload).map_err(|_| MllpError::UnknownEncoding)?;
        Ok(Some(text))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, MllpError> {
        if src.is_empty() {
            return Ok(None);
        }
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None => {
                src.clear();
                Err(MllpError::FrameTruncated)
            }
        }
    }
}

impl Encoder<String> for MllpCodec {
    type Error = MllpError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), MllpError> {
        dst.reserve(item.len() + 3);
        dst.put_u8(SB);
        dst.put_slice(item.as_bytes());
        dst.put_u8(EB);
        dst.put_u8(CR);
        Ok(())
    }
}

impl Encoder<Bytes> for MllpCodec {
    type Error = MllpError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), MllpError> {
        dst.reserve(item.len() + 3);
        dst.put_u8(SB);
        dst.put_slice(&item);
        dst.put_u8(EB);
        dst.put_u8(CR);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &str) -> BytesMut {
        let mut b = BytesMut::new();
        b.put_u8(SB);
        b.put_slice(payload.as_bytes());
        b.put_u8(EB);
        b.put_u8(CR);
        b
    }

    #[test]
    fn decodes_a_complete_frame() {
        let mut codec = MllpCodec::default();
        let mut buf = frame("MSH|^~\\&|A|B|C|D|20240101||ADT^A01|1|P|2.5");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert!(msg.starts_with("MSH|"));
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_more_data_on_partial_frame() {
        let mut codec = MllpCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u8(SB);
        buf.put_slice(b"MSH|^~\\&");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn discards_garbage_before_start_block() {
        let mut codec = MllpCodec::default();
        let mut buf = BytesMut::new();
        buf.put_slice(b"\x00\x00");
        buf.put_u8(SB);
        buf.put_slice(b"PING");
        buf.put_u8(EB);
        buf.put_u8(CR);
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg, "PING");
    }

    #[test]
    fn truncated_frame_at_eof_errors() {
        let mut codec = MllpCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u8(SB);
        buf.put_slice(b"MSH|incomplete");
        assert_eq!(codec.decode_eof(&mut buf), Err(MllpError::FrameTruncated));
    }

    #[test]
    fn oversize_frame_is_rejected() {
        let mut codec = MllpCodec::new(16);
        let mut buf = frame(&"X".repeat(64));
        assert_eq!(codec.decode(&mut buf), Err(MllpError::FrameOversize));
    }

    #[test]
    fn missing_trailing_cr_is_frame_truncated() {
        let mut codec = MllpCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u8(SB);
        buf.put_slice(b"PING");
        buf.put_u8(EB);
        buf.put_u8(b'X');
        buf.put_u8(b'Y');
        assert_eq!(codec.decode(&mut buf), Err(MllpError::FrameTruncated));
    }

    #[test]
    fn encode_wraps_payload_in_sb_eb_cr() {
        let mut codec = MllpCodec::default();
        let mut buf = BytesMut::new();
        Encoder::<String>::encode(&mut codec, "PONG".to_string(), &mut buf).unwrap();
        assert_eq!(buf[0], SB);
        assert_eq!(&buf[1..5], b"PONG");
        assert_eq!(buf[5], EB);
        assert_eq!(buf[6], CR);
    }
}
