//! Framing for the control channel.
//!
//! Inbound bytes are a stream of concatenated JSON objects. They may be
//! separated by whitespace or newlines, or not at all, and may be split
//! across reads at any byte. Outbound messages are one JSON object per line.

use serde_json::Value;

use super::message::{ControlMessage, DecodeError, WireMessage};

/// Accumulates control-channel bytes and yields decoded messages.
pub struct ControlCodec {
    buf: Vec<u8>,
    max_frame_len: usize,
}

impl ControlCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_len,
        }
    }

    /// Append bytes read from the channel.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete message.
    ///
    /// Returns `None` when more bytes are needed. A malformed message is
    /// returned as an error and decoding resumes at the next `{` or after the
    /// next newline, whichever comes first.
    pub fn next_message(&mut self) -> Option<Result<ControlMessage, DecodeError>> {
        let Some(start) = self.buf.iter().position(|b| !b.is_ascii_whitespace()) else {
            self.buf.clear();
            return None;
        };
        self.buf.drain(..start);

        let (parsed, consumed) = {
            let mut values = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
            let parsed = values.next()?;
            (parsed, values.byte_offset())
        };
        match parsed {
            Ok(value) => {
                self.buf.drain(..consumed);
                Some(decode_value(value))
            }
            Err(e) if e.is_eof() => {
                if self.buf.len() > self.max_frame_len {
                    let len = self.buf.len();
                    self.buf.clear();
                    return Some(Err(DecodeError::FrameTooLong(len)));
                }
                None
            }
            Err(e) => {
                self.resync();
                Some(Err(e.into()))
            }
        }
    }

    /// Serialize `msg` as a single newline-terminated line.
    pub fn encode(msg: &ControlMessage) -> Result<Vec<u8>, serde_json::Error> {
        let mut out = serde_json::to_vec(msg)?;
        out.push(b'\n');
        Ok(out)
    }

    /// Drop bytes up to the start of what may be the next object.
    fn resync(&mut self) {
        let next = self
            .buf
            .iter()
            .skip(1)
            .position(|&b| b == b'{' || b == b'\n')
            .map(|pos| pos + 1);
        match next {
            Some(pos) if self.buf[pos] == b'{' => {
                self.buf.drain(..pos);
            }
            Some(pos) => {
                self.buf.drain(..=pos);
            }
            None => self.buf.clear(),
        }
    }
}

fn decode_value(value: Value) -> Result<ControlMessage, DecodeError> {
    let wire: WireMessage = serde_json::from_value(value)?;
    ControlMessage::try_from(wire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::ConnectionId;

    fn drain(codec: &mut ControlCodec) -> Vec<Result<ControlMessage, DecodeError>> {
        std::iter::from_fn(|| codec.next_message()).collect()
    }

    #[test]
    fn single_bare_object() {
        let mut codec = ControlCodec::new(1024);
        codec.feed(br#"{"Header":1}"#);
        let out = drain(&mut codec);
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].as_ref().unwrap(),
            &ControlMessage::StartWebTransport
        );
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn coalesced_objects() {
        let mut codec = ControlCodec::new(1024);
        codec.feed(br#"{"Header":1}{"Header":3,"ConnectionId":4,"Body":"hi"}"#);
        codec.feed(b"\n{\"Header\":2}\n");
        let out: Vec<_> = drain(&mut codec).into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            out,
            vec![
                ControlMessage::StartWebTransport,
                ControlMessage::Send {
                    connection_id: ConnectionId(4),
                    body: "hi".into(),
                },
                ControlMessage::StopWebTransport,
            ]
        );
    }

    #[test]
    fn split_across_reads() {
        let mut codec = ControlCodec::new(1024);
        let text = br#"{"Header":3,"ConnectionId":0,"Body":"abc"}"#;
        for chunk in text.chunks(5) {
            assert!(codec.next_message().is_none());
            codec.feed(chunk);
        }
        let msg = codec.next_message().unwrap().unwrap();
        assert_eq!(
            msg,
            ControlMessage::Send {
                connection_id: ConnectionId(0),
                body: "abc".into(),
            }
        );
    }

    #[test]
    fn malformed_line_skipped() {
        let mut codec = ControlCodec::new(1024);
        codec.feed(b"{\"Header\":}\n{\"Header\":2}\n");
        let out = drain(&mut codec);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(DecodeError::Json(_))));
        assert_eq!(out[1].as_ref().unwrap(), &ControlMessage::StopWebTransport);
    }

    #[test]
    fn malformed_object_followed_directly_by_valid_one() {
        let mut codec = ControlCodec::new(1024);
        codec.feed(br#"{"Header":}{"Header":1}"#);
        let out = drain(&mut codec);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(DecodeError::Json(_))));
        assert_eq!(out[1].as_ref().unwrap(), &ControlMessage::StartWebTransport);
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn garbage_without_braces_dropped() {
        let mut codec = ControlCodec::new(1024);
        codec.feed(b"nonsense");
        assert!(matches!(codec.next_message(), Some(Err(DecodeError::Json(_)))));
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn invalid_utf8_skipped() {
        let mut codec = ControlCodec::new(1024);
        codec.feed(b"{\"Header\":3,\"ConnectionId\":1,\"Body\":\"\xff\"}\n{\"Header\":1}");
        let out = drain(&mut codec);
        assert!(out[0].is_err());
        assert_eq!(out[1].as_ref().unwrap(), &ControlMessage::StartWebTransport);
    }

    #[test]
    fn unknown_header_consumed() {
        let mut codec = ControlCodec::new(1024);
        codec.feed(br#"{"Header":42}{"Header":1}"#);
        let out = drain(&mut codec);
        assert!(matches!(out[0], Err(DecodeError::UnknownHeader(42))));
        assert_eq!(out[1].as_ref().unwrap(), &ControlMessage::StartWebTransport);
    }

    #[test]
    fn oversized_frame_discarded() {
        let mut codec = ControlCodec::new(16);
        codec.feed(br#"{"Header":3,"ConnectionId":1,"Body":"#);
        assert!(matches!(
            codec.next_message(),
            Some(Err(DecodeError::FrameTooLong(_)))
        ));
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn encode_is_newline_terminated() {
        let bytes = ControlCodec::encode(&ControlMessage::OnConnectionEstablished {
            connection_id: ConnectionId(0),
        })
        .unwrap();
        assert_eq!(bytes, b"{\"Header\":4,\"ConnectionId\":0}\n");
    }
}
