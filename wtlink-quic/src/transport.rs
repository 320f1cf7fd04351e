use bytes::Bytes;

use crate::error::Error;

/// The per-connection send primitives the HTTP/3 layer writes through.
///
/// [`ConnectionRef`](crate::endpoint::ConnectionRef) is the production
/// implementation; tests substitute a recording mock.
pub trait Transport {
    /// Write `data` to a stream, finishing it when `fin` is set.
    fn stream_send(&mut self, stream_id: u64, data: &[u8], fin: bool) -> Result<(), Error>;

    /// Open a new locally-initiated unidirectional stream.
    fn open_uni(&mut self) -> Result<u64, Error>;

    /// Open a new locally-initiated bidirectional stream.
    fn open_bi(&mut self) -> Result<u64, Error>;

    /// Queue an unreliable datagram.
    fn send_datagram(&mut self, data: Bytes) -> Result<(), Error>;

    /// Close the whole connection with an application error code.
    fn close(&mut self, code: u64, reason: &[u8]);
}
