use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use wtlink_quic::TransportLimits;

/// Where the listener's certificate and key come from.
#[derive(Debug, Clone)]
pub enum TlsSource {
    /// PEM files: a certificate chain and a private key.
    PemFiles { cert: PathBuf, key: PathBuf },
    /// Generate a throwaway self-signed certificate for these names.
    SelfSigned { subject_alt_names: Vec<String> },
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// UDP address the QUIC listener binds. Default: `127.0.0.1:4433`.
    pub listen: SocketAddr,
    /// TCP address of the host's control channel. Default: `127.0.0.1:7000`.
    pub ipc_addr: SocketAddr,
    pub tls: TlsSource,
    /// Bytes requested per read on the control channel. Default: 1024.
    pub ipc_read_size: usize,
    /// Buffered control-channel bytes that may be pending without forming a
    /// message before they are discarded. Default: 64 KiB.
    pub max_ipc_frame_len: usize,
    /// Upper bound on how long the listener blocks on the socket before
    /// servicing timers and commands. Default: 10ms.
    pub tick: Duration,
    /// Stream limits and idle timeout advertised to clients.
    pub limits: TransportLimits,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 4433)),
            ipc_addr: SocketAddr::from(([127, 0, 0, 1], 7000)),
            tls: TlsSource::SelfSigned {
                subject_alt_names: vec!["localhost".to_string()],
            },
            ipc_read_size: 1024,
            max_ipc_frame_len: 64 * 1024,
            tick: Duration::from_millis(10),
            limits: TransportLimits::default(),
        }
    }
}
