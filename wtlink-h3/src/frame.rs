//! HTTP/3 frame encoding/decoding and QUIC variable-length integer codec.
//!
//! HTTP/3 frames consist of a varint type, varint length, and payload.
//! QUIC handles stream multiplexing and flow control underneath.

use crate::error::H3Error;
use crate::settings::Settings;

// ── Frame type constants (RFC 9114 Section 7.2) ─────────────────────

pub const FRAME_DATA: u64 = 0x00;
pub const FRAME_HEADERS: u64 = 0x01;
pub const FRAME_SETTINGS: u64 = 0x04;
pub const FRAME_GOAWAY: u64 = 0x07;

/// Signal value that opens a bidirectional WebTransport stream in place of a
/// frame type (draft-ietf-webtrans-http3).
pub const WEBTRANSPORT_STREAM: u64 = 0x41;

/// HTTP/2 frame types that MUST NOT appear in HTTP/3 (RFC 9114 Section 7.2.8).
const RESERVED_H2_TYPES: [u64; 4] = [0x02, 0x06, 0x08, 0x09];

/// Largest payload accepted for DATA, HEADERS, SETTINGS and GOAWAY frames.
pub const MAX_FRAME_PAYLOAD: u64 = 1 << 20;

/// Largest value a QUIC varint can carry.
pub const VARINT_MAX: u64 = (1 << 62) - 1;

// ── QUIC Variable-Length Integer (RFC 9000 Section 16) ──────────────

/// Encode a QUIC variable-length integer into `buf`.
///
/// Values 0..2^6 use 1 byte, 2^6..2^14 use 2, 2^14..2^30 use 4, 2^30..2^62 use 8.
pub fn encode_varint(buf: &mut Vec<u8>, value: u64) {
    debug_assert!(value <= VARINT_MAX, "varint value too large");
    match varint_len(value) {
        1 => buf.push(value as u8),
        2 => buf.extend_from_slice(&(0x4000 | value as u16).to_be_bytes()),
        4 => buf.extend_from_slice(&(0x8000_0000 | value as u32).to_be_bytes()),
        _ => buf.extend_from_slice(&(0xc000_0000_0000_0000 | value).to_be_bytes()),
    }
}

/// Decode a QUIC variable-length integer from the start of `buf`.
///
/// Returns `(value, bytes_consumed)` or `None` if the buffer is too short.
pub fn decode_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let first = *buf.first()?;
    let len = 1usize << (first >> 6);
    let bytes = buf.get(..len)?;
    let value = bytes[1..]
        .iter()
        .fold(u64::from(first & 0x3f), |acc, &b| (acc << 8) | u64::from(b));
    Some((value, len))
}

/// Returns the encoded byte length for a varint value (1, 2, 4, or 8).
pub fn varint_len(value: u64) -> usize {
    if value < (1 << 6) {
        1
    } else if value < (1 << 14) {
        2
    } else if value < (1 << 30) {
        4
    } else {
        8
    }
}

// ── Frame types ─────────────────────────────────────────────────────

/// An HTTP/3 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// DATA frame (type 0x00): carries request or response body.
    Data { payload: Vec<u8> },
    /// HEADERS frame (type 0x01): QPACK-encoded header block.
    Headers { encoded: Vec<u8> },
    /// SETTINGS frame (type 0x04): configuration parameters.
    Settings(Settings),
    /// GOAWAY frame (type 0x07): graceful shutdown with last stream ID.
    GoAway { stream_id: u64 },
    /// A frame type this layer does not act on (RFC 9114 Section 9). Only
    /// the header is decoded; the caller discards the next `len` bytes.
    Unknown { frame_type: u64, len: u64 },
}

// ── Frame encoding ──────────────────────────────────────────────────

/// Encode a frame header (type + length varints) into `buf`.
pub fn encode_frame_header(buf: &mut Vec<u8>, frame_type: u64, payload_len: usize) {
    encode_varint(buf, frame_type);
    encode_varint(buf, payload_len as u64);
}

impl Frame {
    /// Encode this frame into `buf` (header + payload). Unknown frames are
    /// written with `len` zero bytes of payload.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Frame::Data { payload } => {
                encode_frame_header(buf, FRAME_DATA, payload.len());
                buf.extend_from_slice(payload);
            }
            Frame::Headers { encoded } => {
                encode_frame_header(buf, FRAME_HEADERS, encoded.len());
                buf.extend_from_slice(encoded);
            }
            Frame::Settings(settings) => {
                encode_frame_header(buf, FRAME_SETTINGS, settings.encoded_len());
                settings.encode(buf);
            }
            Frame::GoAway { stream_id } => {
                encode_frame_header(buf, FRAME_GOAWAY, varint_len(*stream_id));
                encode_varint(buf, *stream_id);
            }
            Frame::Unknown { frame_type, len } => {
                encode_varint(buf, *frame_type);
                encode_varint(buf, *len);
                buf.resize(buf.len() + *len as usize, 0);
            }
        }
    }
}

// ── Frame decoding ──────────────────────────────────────────────────

/// Decode one frame from the start of `buf`.
///
/// Returns `Ok(Some((frame, bytes_consumed)))` on success,
/// `Ok(None)` if the buffer is incomplete (need more data),
/// or `Err` on protocol error. For [`Frame::Unknown`] only the header is
/// consumed, so its payload never has to be buffered.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, H3Error> {
    let Some((frame_type, type_len)) = decode_varint(buf) else {
        return Ok(None);
    };
    let Some((payload_len, len_len)) = decode_varint(&buf[type_len..]) else {
        return Ok(None);
    };

    if RESERVED_H2_TYPES.contains(&frame_type) {
        return Err(H3Error::FrameUnexpected);
    }

    let header_len = type_len + len_len;
    if !matches!(
        frame_type,
        FRAME_DATA | FRAME_HEADERS | FRAME_SETTINGS | FRAME_GOAWAY
    ) {
        return Ok(Some((
            Frame::Unknown {
                frame_type,
                len: payload_len,
            },
            header_len,
        )));
    }
    if payload_len > MAX_FRAME_PAYLOAD {
        return Err(H3Error::ExcessiveLoad);
    }

    let total_len = usize::try_from(payload_len)
        .ok()
        .and_then(|len| len.checked_add(header_len))
        .ok_or(H3Error::FrameError)?;
    let Some(payload) = buf.get(header_len..total_len) else {
        return Ok(None);
    };

    let frame = match frame_type {
        FRAME_DATA => Frame::Data {
            payload: payload.to_vec(),
        },
        FRAME_HEADERS => Frame::Headers {
            encoded: payload.to_vec(),
        },
        FRAME_SETTINGS => Frame::Settings(Settings::decode(payload)?),
        // FRAME_GOAWAY; other types returned above.
        _ => match decode_varint(payload) {
            Some((stream_id, n)) if n == payload.len() => Frame::GoAway { stream_id },
            _ => return Err(H3Error::FrameError),
        },
    };

    Ok(Some((frame, total_len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        let values = [
            0,
            63,
            64,
            16383,
            16384,
            1073741823,
            1073741824,
            VARINT_MAX,
        ];
        for &v in &values {
            let mut buf = Vec::new();
            encode_varint(&mut buf, v);
            assert_eq!(buf.len(), varint_len(v));
            assert_eq!(decode_varint(&buf), Some((v, buf.len())));
        }
    }

    #[test]
    fn varint_rfc9000_examples() {
        // RFC 9000 Appendix A.1.
        assert_eq!(
            decode_varint(&[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c]),
            Some((151_288_809_941_952_652, 8))
        );
        assert_eq!(
            decode_varint(&[0x9d, 0x7f, 0x3e, 0x7d]),
            Some((494_878_333, 4))
        );
        assert_eq!(decode_varint(&[0x7b, 0xbd]), Some((15_293, 2)));
        assert_eq!(decode_varint(&[0x25]), Some((37, 1)));
        assert_eq!(decode_varint(&[0x40, 0x25]), Some((37, 2)));
    }

    #[test]
    fn truncated_varint() {
        assert_eq!(decode_varint(&[]), None);
        assert_eq!(decode_varint(&[0x40]), None);
        assert_eq!(decode_varint(&[0x80, 0x00, 0x00]), None);
    }

    #[test]
    fn headers_frame_decodes() {
        let frame = Frame::Headers {
            encoded: vec![0x00, 0x00, 0xd1],
        };
        let mut buf = Vec::new();
        frame.encode(&mut buf);
        assert_eq!(buf, [0x01, 0x03, 0x00, 0x00, 0xd1]);
        assert_eq!(decode_frame(&buf).unwrap(), Some((frame, 5)));
    }

    #[test]
    fn settings_frame_decodes() {
        let frame = Frame::Settings(Settings::webtransport());
        let mut buf = Vec::new();
        frame.encode(&mut buf);
        let (decoded, consumed) = decode_frame(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn goaway_frame_decodes() {
        let mut buf = Vec::new();
        Frame::GoAway { stream_id: 4 }.encode(&mut buf);
        assert_eq!(
            decode_frame(&buf).unwrap(),
            Some((Frame::GoAway { stream_id: 4 }, buf.len()))
        );
    }

    #[test]
    fn goaway_with_trailing_bytes_rejected() {
        let buf = [0x07, 0x02, 0x04, 0x00];
        assert!(matches!(decode_frame(&buf), Err(H3Error::FrameError)));
    }

    #[test]
    fn reserved_h2_type_rejected() {
        // Type 0x02 (HTTP/2 PRIORITY) is reserved.
        let buf = [0x02, 0x00];
        assert!(matches!(decode_frame(&buf), Err(H3Error::FrameUnexpected)));
    }

    #[test]
    fn incomplete_frame_returns_none() {
        assert!(decode_frame(&[0x00]).unwrap().is_none());
        // Type + length says 5 bytes payload, but only 2 present.
        assert!(decode_frame(&[0x00, 0x05, b'h', b'e']).unwrap().is_none());
    }

    #[test]
    fn unknown_frame_consumes_header_only() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, 0x21); // grease
        encode_varint(&mut buf, 1 << 30);
        buf.extend_from_slice(b"abc");
        let (frame, consumed) = decode_frame(&buf).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Unknown {
                frame_type: 0x21,
                len: 1 << 30
            }
        );
        assert_eq!(consumed, 5);
    }

    #[test]
    fn oversized_frame_rejected_before_payload() {
        let mut buf = Vec::new();
        encode_frame_header(&mut buf, FRAME_HEADERS, MAX_FRAME_PAYLOAD as usize + 1);
        assert!(matches!(decode_frame(&buf), Err(H3Error::ExcessiveLoad)));

        let mut buf = Vec::new();
        encode_frame_header(&mut buf, FRAME_DATA, MAX_FRAME_PAYLOAD as usize);
        assert!(decode_frame(&buf).unwrap().is_none());
    }
}
