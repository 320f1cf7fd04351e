use bytes::Bytes;
use quinn_proto::ConnectionError;

/// Opaque identifier for a QUIC connection within a [`QuicEndpoint`](crate::QuicEndpoint).
///
/// Wraps a slab index. Use [`index()`](QuicConnId::index) for per-connection
/// state arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuicConnId(pub(crate) u32);

impl QuicConnId {
    /// Build an id from a slab index. Mostly useful for tests that feed
    /// synthetic events into the layers above.
    pub fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying index, suitable for indexing per-connection arrays.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for QuicConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Application-facing events produced by [`QuicEndpoint`](crate::QuicEndpoint).
///
/// Stream payloads are pulled out of quinn by the endpoint, so every data
/// event carries the bytes that arrived. Poll these via
/// [`QuicEndpoint::poll_event()`](crate::QuicEndpoint::poll_event).
#[derive(Debug, Clone)]
pub enum QuicEvent {
    /// An inbound connection finished its handshake and agreed on an
    /// application protocol (ALPN), if any.
    ProtocolNegotiated {
        conn: QuicConnId,
        alpn: Option<Vec<u8>>,
    },

    /// Bytes arrived on a stream. `end_stream` is set once the peer's FIN has
    /// been read; a FIN may arrive with an empty `data`.
    StreamDataReceived {
        conn: QuicConnId,
        stream_id: u64,
        data: Bytes,
        end_stream: bool,
    },

    /// The peer abandoned a stream with RESET_STREAM.
    StreamReset {
        conn: QuicConnId,
        stream_id: u64,
        error_code: u64,
    },

    /// An unreliable datagram arrived.
    DatagramReceived { conn: QuicConnId, data: Bytes },

    /// A QUIC connection was closed or lost.
    ConnectionClosed {
        conn: QuicConnId,
        reason: ConnectionError,
    },
}

impl QuicEvent {
    /// The connection this event belongs to.
    pub fn conn(&self) -> QuicConnId {
        match self {
            QuicEvent::ProtocolNegotiated { conn, .. }
            | QuicEvent::StreamDataReceived { conn, .. }
            | QuicEvent::StreamReset { conn, .. }
            | QuicEvent::DatagramReceived { conn, .. }
            | QuicEvent::ConnectionClosed { conn, .. } => *conn,
        }
    }
}

/// Returns true if `stream_id` names a unidirectional stream (2, 3, 6, 7, ...).
pub fn is_uni(stream_id: u64) -> bool {
    stream_id & 0b10 == 0b10
}

/// Returns true if `stream_id` was opened by the client (0, 2, 4, 6, ...).
pub fn is_client_initiated(stream_id: u64) -> bool {
    stream_id & 0b01 == 0
}
