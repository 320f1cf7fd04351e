use quinn_proto::{ClosedStream, FinishError, SendDatagramError, WriteError};

/// Errors returned by wtlink-quic operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid connection")]
    InvalidConnection,

    #[error("peer stream limit reached")]
    StreamLimit,

    #[error("write: {0}")]
    Write(#[from] WriteError),

    #[error("finish: {0}")]
    Finish(#[from] FinishError),

    #[error("stream: {0}")]
    ClosedStream(#[from] ClosedStream),

    #[error("datagram: {0}")]
    Datagram(#[from] SendDatagramError),

    #[error("tls: {0}")]
    Tls(#[from] rustls::Error),

    #[error("tls: no initial cipher suite")]
    NoInitialCipherSuite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_error_converts() {
        let err: Error = FinishError::Stopped(quinn_proto::VarInt::from_u32(3)).into();
        assert!(matches!(err, Error::Finish(FinishError::Stopped(_))));
        assert_eq!(err.to_string(), format!("finish: {}", FinishError::Stopped(quinn_proto::VarInt::from_u32(3))));
    }
}
