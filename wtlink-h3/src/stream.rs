//! Per-stream state for peer-initiated streams.

/// What a peer-initiated stream turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamKind {
    /// The leading type varint(s) have not fully arrived yet.
    Pending,
    /// The peer's control stream.
    Control,
    /// An HTTP/3 request stream carrying HEADERS and DATA frames.
    Request,
    /// A WebTransport stream bound to the session on `session_id`.
    WebTransport { session_id: u64 },
    /// QPACK encoder/decoder streams and unknown uni stream types; the
    /// bytes are discarded.
    Ignored,
}

/// Tracks classification and not-yet-consumed bytes of a single stream.
pub(crate) struct H3Stream {
    pub kind: StreamKind,
    /// Bytes received but not yet consumed as frames or stream headers.
    pub buf: Vec<u8>,
    /// A HEADERS frame has been seen on this request stream.
    pub headers_received: bool,
    /// The peer's FIN has arrived.
    pub ended: bool,
    /// Payload bytes of an unknown frame still to be discarded.
    pub skip: u64,
}

impl H3Stream {
    pub fn new() -> Self {
        Self {
            kind: StreamKind::Pending,
            buf: Vec::new(),
            headers_received: false,
            ended: false,
            skip: 0,
        }
    }
}
