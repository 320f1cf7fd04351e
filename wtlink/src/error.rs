use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::ipc::{ConnectionId, IpcError};

/// Errors returned by the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("listener is already running")]
    AlreadyRunning,

    #[error("listener is not running")]
    NotRunning,

    #[error("no session with connection id {0}")]
    UnknownSession(ConnectionId),

    #[error("bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("tls: {0}")]
    Pem(#[from] rustls_pki_types::pem::Error),

    #[error("tls: no certificates in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("tls: {0}")]
    CertGen(#[from] rcgen::Error),

    #[error("quic: {0}")]
    Quic(#[from] wtlink_quic::Error),

    #[error("h3: {0}")]
    H3(#[from] wtlink_h3::H3Error),

    #[error("ipc: {0}")]
    Ipc(#[from] IpcError),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}
