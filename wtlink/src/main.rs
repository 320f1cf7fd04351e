use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wtlink::{Gateway, GatewayConfig, IpcBridge, ListenerState, TlsSource};

#[derive(Parser)]
#[command(name = "wtlink")]
#[command(about = "WebTransport gateway for a game host process")]
struct Args {
    /// UDP address for the QUIC listener
    #[arg(long, default_value = "127.0.0.1:4433")]
    listen: SocketAddr,

    /// TCP address of the host's control channel
    #[arg(long, default_value = "127.0.0.1:7000")]
    ipc: SocketAddr,

    /// TLS certificate chain (PEM)
    #[arg(long, requires = "tls_key", required_unless_present = "self_signed")]
    tls_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Generate a self-signed certificate for localhost
    #[arg(long, conflicts_with = "tls_cert")]
    self_signed: bool,

    /// Bytes requested per read on the control channel
    #[arg(long, default_value_t = 1024)]
    ipc_read_size: usize,

    /// Start the listener without waiting for the host's start message
    #[arg(long)]
    autostart: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "wtlink=debug" } else { "wtlink=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let tls = match (args.tls_cert, args.tls_key) {
        (Some(cert), Some(key)) => TlsSource::PemFiles { cert, key },
        _ => TlsSource::SelfSigned {
            subject_alt_names: vec!["localhost".to_string()],
        },
    };
    let config = GatewayConfig {
        listen: args.listen,
        ipc_addr: args.ipc,
        tls,
        ipc_read_size: args.ipc_read_size,
        ..GatewayConfig::default()
    };

    let bridge = IpcBridge::connect(config.ipc_addr, config.ipc_read_size, config.max_ipc_frame_len)
        .with_context(|| format!("failed to connect to host at {}", config.ipc_addr))?;
    let gateway = Arc::new(
        Gateway::new(config, Arc::new(bridge.sender())).context("failed to configure gateway")?,
    );

    if args.autostart {
        let addr = gateway.start().context("failed to start listener")?;
        info!("listening on {addr}");
    }

    let handle = {
        let gateway = gateway.clone();
        bridge
            .spawn(move |msg| gateway.dispatch(msg))
            .context("failed to spawn control channel thread")?
    };
    let result = handle
        .join()
        .map_err(|_| anyhow!("control channel thread panicked"))?;

    if gateway.state() == ListenerState::Running {
        gateway.stop().context("failed to stop listener")?;
    }
    result.context("control channel failed")?;
    info!("gateway exiting");
    Ok(())
}
