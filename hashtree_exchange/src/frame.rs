//! On-wire block-exchange frames: length-prefixed `u32 length, u8 type,
//! payload`. `length` counts the type byte plus the payload, so a frame's
//! total wire size is `4 + length`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hashtree_core::Hash;

use crate::error::ExchangeError;

const TYPE_REQUEST: u8 = 0;
const TYPE_RESPONSE: u8 = 1;
const TYPE_NOT_FOUND: u8 = 2;
const TYPE_CANCEL: u8 = 3;

/// A single block-exchange frame. `req_id` correlates a `Response` /
/// `NotFound` / `Cancel` back to the `Request` that started it; it is
/// assigned by the requester and is only unique within one peer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Request { req_id: u64, hash: Hash },
    Response { req_id: u64, bytes: Bytes },
    NotFound { req_id: u64 },
    Cancel { req_id: u64 },
}

impl Frame {
    pub fn req_id(&self) -> u64 {
        match self {
            Frame::Request { req_id, .. }
            | Frame::Response { req_id, .. }
            | Frame::NotFound { req_id }
            | Frame::Cancel { req_id } => *req_id,
        }
    }

    /// Size of this frame once encoded, including the length prefix.
    /// Used by the outbound queue to enforce `peer_queue_max_bytes`.
    pub fn wire_len(&self) -> usize {
        match self {
            Frame::Request { .. } => 4 + 1 + 8 + 32,
            Frame::Response { bytes, .. } => 4 + 1 + 8 + bytes.len(),
            Frame::NotFound { .. } | Frame::Cancel { .. } => 4 + 1 + 8,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        match self {
            Frame::Request { req_id, hash } => {
                buf.put_u32((1 + 8 + 32) as u32);
                buf.put_u8(TYPE_REQUEST);
                buf.put_u64(*req_id);
                buf.put_slice(hash.as_ref());
            }
            Frame::Response { req_id, bytes } => {
                buf.put_u32((1 + 8 + bytes.len()) as u32);
                buf.put_u8(TYPE_RESPONSE);
                buf.put_u64(*req_id);
                buf.put_slice(bytes);
            }
            Frame::NotFound { req_id } => {
                buf.put_u32((1 + 8) as u32);
                buf.put_u8(TYPE_NOT_FOUND);
                buf.put_u64(*req_id);
            }
            Frame::Cancel { req_id } => {
                buf.put_u32((1 + 8) as u32);
                buf.put_u8(TYPE_CANCEL);
                buf.put_u64(*req_id);
            }
        }
        buf.freeze()
    }

    /// Decodes exactly one frame from `bytes`, which must hold the whole
    /// length-prefixed frame (the caller owns reassembly across transport
    /// boundaries; `PeerTransport` delivers whole frames).
    pub fn decode(mut bytes: Bytes) -> Result<Self, ExchangeError> {
        if bytes.remaining() < 4 {
            return Err(ExchangeError::Malformed("truncated length prefix".into()));
        }
        let length = bytes.get_u32() as usize;
        if bytes.remaining() != length {
            return Err(ExchangeError::Malformed(format!(
                "length prefix said {length} bytes, frame carried {}",
                bytes.remaining()
            )));
        }
        if bytes.remaining() < 1 {
            return Err(ExchangeError::Malformed("missing frame type".into()));
        }
        let frame_type = bytes.get_u8();
        if bytes.remaining() < 8 {
            return Err(ExchangeError::Malformed("truncated req-id".into()));
        }
        let req_id = bytes.get_u64();

        match frame_type {
            TYPE_REQUEST => {
                if bytes.remaining() != 32 {
                    return Err(ExchangeError::Malformed("request hash must be 32 bytes".into()));
                }
                let mut raw = [0u8; 32];
                bytes.copy_to_slice(&mut raw);
                Ok(Frame::Request {
                    req_id,
                    hash: Hash::from(raw),
                })
            }
            TYPE_RESPONSE => Ok(Frame::Response {
                req_id,
                bytes: bytes.copy_to_bytes(bytes.remaining()),
            }),
            TYPE_NOT_FOUND => {
                if bytes.has_remaining() {
                    return Err(ExchangeError::Malformed("NOT_FOUND carries no payload".into()));
                }
                Ok(Frame::NotFound { req_id })
            }
            TYPE_CANCEL => {
                if bytes.has_remaining() {
                    return Err(ExchangeError::Malformed("CANCEL carries no payload".into()));
                }
                Ok(Frame::Cancel { req_id })
            }
            other => Err(ExchangeError::Malformed(format!("unknown frame type {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let frame = Frame::Request {
            req_id: 7,
            hash: Hash::new(b"block"),
        };
        let encoded = frame.encode();
        assert_eq!(encoded.len(), frame.wire_len());
        assert_eq!(Frame::decode(encoded).unwrap(), frame);
    }

    #[test]
    fn response_round_trips_with_payload() {
        let frame = Frame::Response {
            req_id: 42,
            bytes: Bytes::from_static(b"payload bytes"),
        };
        let encoded = frame.encode();
        assert_eq!(Frame::decode(encoded).unwrap(), frame);
    }

    #[test]
    fn not_found_and_cancel_round_trip() {
        for frame in [Frame::NotFound { req_id: 1 }, Frame::Cancel { req_id: 1 }] {
            let encoded = frame.clone().encode();
            assert_eq!(Frame::decode(encoded).unwrap(), frame);
        }
    }

    #[test]
    fn truncated_frame_is_malformed() {
        let mut encoded = BytesMut::from(&Frame::Request {
            req_id: 1,
            hash: Hash::new(b"x"),
        }
        .encode()[..]);
        encoded.truncate(10);
        assert!(matches!(
            Frame::decode(encoded.freeze()),
            Err(ExchangeError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_type_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u32(9);
        buf.put_u8(0xFF);
        buf.put_u64(1);
        assert!(matches!(
            Frame::decode(buf.freeze()),
            Err(ExchangeError::Malformed(_))
        ));
    }
}
