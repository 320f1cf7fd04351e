use std::sync::Arc;
use std::time::Duration;

use quinn_proto::crypto::rustls::QuicServerConfig;
use quinn_proto::{EndpointConfig, IdleTimeout, ServerConfig, TransportConfig, VarInt};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::Error;

/// Configuration for a [`QuicEndpoint`](crate::QuicEndpoint).
pub struct QuicConfig {
    /// Shared endpoint configuration (connection IDs, supported versions, etc.).
    pub endpoint_config: Arc<EndpointConfig>,
    /// Server-side TLS/QUIC config.
    pub server_config: Arc<ServerConfig>,
    /// Maximum queued outgoing packets before dropping. Default: 4096.
    pub send_queue_capacity: usize,
    /// Allow path MTU discovery. Default: true.
    pub allow_mtud: bool,
    /// Deterministic RNG seed for testing. Default: `None` (random).
    pub rng_seed: Option<[u8; 32]>,
}

impl QuicConfig {
    /// Create a server config with the given TLS server configuration.
    pub fn server(server_config: Arc<ServerConfig>) -> Self {
        Self {
            endpoint_config: Arc::new(EndpointConfig::default()),
            server_config,
            send_queue_capacity: 4096,
            allow_mtud: true,
            rng_seed: None,
        }
    }
}

/// Per-connection transport limits advertised to peers.
#[derive(Debug, Clone)]
pub struct TransportLimits {
    /// Concurrent bidirectional streams a peer may open. Default: 100.
    pub max_bidi_streams: u32,
    /// Concurrent unidirectional streams a peer may open. Default: 100.
    pub max_uni_streams: u32,
    /// Idle timeout before a silent connection is dropped. Default: 30s.
    pub idle_timeout: Duration,
    /// Bytes of unread incoming datagrams buffered per connection. Default: 1 MiB.
    pub datagram_receive_buffer: usize,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            max_bidi_streams: 100,
            max_uni_streams: 100,
            idle_timeout: Duration::from_secs(30),
            datagram_receive_buffer: 1 << 20,
        }
    }
}

/// Build a quinn server config from a certificate chain and private key.
///
/// TLS 1.3 only (QUIC requires it), using the ring provider. `alpn` lists the
/// application protocols offered during the handshake, in preference order.
pub fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    alpn: &[&[u8]],
    limits: &TransportLimits,
) -> Result<Arc<ServerConfig>, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut crypto = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    crypto.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();

    let crypto = QuicServerConfig::try_from(crypto).map_err(|_| Error::NoInitialCipherSuite)?;

    let mut transport = TransportConfig::default();
    transport.max_concurrent_bidi_streams(VarInt::from_u32(limits.max_bidi_streams));
    transport.max_concurrent_uni_streams(VarInt::from_u32(limits.max_uni_streams));
    transport.max_idle_timeout(IdleTimeout::try_from(limits.idle_timeout).ok());
    transport.datagram_receive_buffer_size(Some(limits.datagram_receive_buffer));

    let mut config = ServerConfig::with_crypto(Arc::new(crypto));
    config.transport_config(Arc::new(transport));
    Ok(Arc::new(config))
}
