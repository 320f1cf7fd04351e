/// Errors produced by the HTTP/3 layer.
///
/// Everything except [`Quic`](H3Error::Quic) is a connection-level protocol
/// error; [`code()`](H3Error::code) gives the HTTP/3 application error code to
/// close the QUIC connection with.
#[derive(Debug, thiserror::Error)]
pub enum H3Error {
    /// QUIC transport error while writing.
    #[error("quic: {0}")]
    Quic(#[from] wtlink_quic::Error),

    /// A frame arrived on a stream where it is not permitted, or a frame type
    /// reserved from HTTP/2 was used.
    #[error("unexpected frame")]
    FrameUnexpected,

    /// The peer's control stream did not start with SETTINGS.
    #[error("missing SETTINGS on control stream")]
    MissingSettings,

    /// Frame decoding error (truncated varint, invalid payload, etc.).
    #[error("frame error")]
    FrameError,

    /// A frame declared a payload larger than this layer will buffer.
    #[error("frame too large")]
    ExcessiveLoad,

    /// A QPACK header block could not be decoded.
    #[error("QPACK decompression failed")]
    QpackDecompressionFailed,

    /// A critical stream (control) was closed or duplicated.
    #[error("critical stream closed")]
    ClosedCriticalStream,

    /// A SETTINGS frame carried an invalid identifier or value.
    #[error("settings error")]
    Settings,

    /// An HTTP datagram could not be parsed.
    #[error("datagram error")]
    Datagram,

    /// A stream was opened that breaks the HTTP/3 stream rules.
    #[error("stream creation error")]
    StreamCreation,

    #[error("internal: {0}")]
    Internal(String),
}

impl H3Error {
    /// The HTTP/3 application error code (RFC 9114 Section 8.1, RFC 9204
    /// Section 6) for this error.
    pub fn code(&self) -> u64 {
        match self {
            H3Error::FrameUnexpected => 0x0105,
            H3Error::ClosedCriticalStream => 0x0104,
            H3Error::MissingSettings => 0x010a,
            H3Error::FrameError => 0x0106,
            H3Error::ExcessiveLoad => 0x0107,
            H3Error::StreamCreation => 0x0103,
            H3Error::Settings => 0x0109,
            H3Error::Datagram => 0x33,
            H3Error::QpackDecompressionFailed => 0x0200,
            H3Error::Quic(_) | H3Error::Internal(_) => 0x0102,
        }
    }
}
