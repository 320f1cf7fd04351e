//! The QUIC listener: a UDP socket driving a [`QuicEndpoint`] on its own thread.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, TryRecvError};
use wtlink_quic::{QuicConfig, QuicConnId, QuicEndpoint, QuicEvent, ServerConfig};

use crate::error::Error;
use crate::ipc::HostNotifier;
use crate::protocol::ConnectionProtocol;
use crate::registry::SessionRegistry;

const MIN_WAIT: Duration = Duration::from_millis(1);

/// Requests from other threads, applied between socket reads.
#[derive(Debug)]
pub enum ListenerCommand {
    SendDatagram {
        conn: QuicConnId,
        session_id: u64,
        payload: Bytes,
    },
    /// Close every connection and exit the loop.
    Shutdown,
}

pub struct Listener {
    socket: UdpSocket,
    local_addr: SocketAddr,
    quic: QuicEndpoint,
    protocols: HashMap<QuicConnId, ConnectionProtocol>,
    registry: SessionRegistry,
    notifier: Arc<dyn HostNotifier>,
    commands: Receiver<ListenerCommand>,
    tick: Duration,
}

impl Listener {
    pub fn bind(
        addr: SocketAddr,
        server_config: Arc<ServerConfig>,
        tick: Duration,
        registry: SessionRegistry,
        notifier: Arc<dyn HostNotifier>,
        commands: Receiver<ListenerCommand>,
    ) -> Result<Self, Error> {
        let socket = UdpSocket::bind(addr).map_err(|source| Error::Bind { addr, source })?;
        let local_addr = socket.local_addr()?;
        let quic = QuicEndpoint::new(QuicConfig::server(server_config), local_addr);
        Ok(Self {
            socket,
            local_addr,
            quic,
            protocols: HashMap::new(),
            registry,
            notifier,
            commands,
            tick: tick.max(MIN_WAIT),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until [`ListenerCommand::Shutdown`] arrives or every command
    /// sender is gone.
    pub fn run(mut self) {
        tracing::info!(addr = %self.local_addr, "QUIC listener running");
        let mut buf = vec![0u8; 65536];
        loop {
            self.receive(&mut buf);
            self.quic.drive_timers(Instant::now());
            self.process_events();

            loop {
                match self.commands.try_recv() {
                    Ok(ListenerCommand::SendDatagram {
                        conn,
                        session_id,
                        payload,
                    }) => self.send_datagram(conn, session_id, &payload),
                    Ok(ListenerCommand::Shutdown) | Err(TryRecvError::Disconnected) => {
                        self.shutdown();
                        return;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            self.flush();
        }
    }

    /// Wait for one datagram, no longer than the next QUIC timer or a tick.
    fn receive(&mut self, buf: &mut [u8]) {
        let wait = self
            .quic
            .poll_timeout()
            .map_or(self.tick, |deadline| {
                deadline.saturating_duration_since(Instant::now()).min(self.tick)
            })
            .max(MIN_WAIT);
        if let Err(e) = self.socket.set_read_timeout(Some(wait)) {
            tracing::warn!(error = %e, "failed to set socket timeout");
        }

        match self.socket.recv_from(buf) {
            Ok((n, peer)) => self.quic.handle_datagram(Instant::now(), &buf[..n], peer),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => tracing::debug!(error = %e, "recv failed"),
        }
    }

    fn process_events(&mut self) {
        while let Some(event) = self.quic.poll_event() {
            let conn = event.conn();
            let protocol = self.protocols.entry(conn).or_insert_with(|| {
                tracing::debug!(%conn, "new connection");
                ConnectionProtocol::new(conn, self.registry.clone(), self.notifier.clone())
            });
            protocol.handle_event(&mut self.quic.connection(conn), &event);

            if matches!(event, QuicEvent::ConnectionClosed { .. }) {
                self.protocols.remove(&conn);
                self.registry.remove_connection(conn);
            }
        }
    }

    fn send_datagram(&mut self, conn: QuicConnId, session_id: u64, payload: &[u8]) {
        let Some(protocol) = self.protocols.get_mut(&conn) else {
            tracing::warn!(%conn, session = session_id, "send to a closed connection");
            return;
        };
        if let Err(e) = protocol.send_datagram(&mut self.quic.connection(conn), session_id, payload) {
            tracing::warn!(%conn, session = session_id, error = %e, "send failed");
        }
    }

    fn flush(&mut self) {
        self.quic.flush(Instant::now());
        while let Some((dest, data)) = self.quic.poll_send() {
            if let Err(e) = self.socket.send_to(&data, dest) {
                tracing::debug!(%dest, error = %e, "send_to failed");
            }
        }
    }

    fn shutdown(&mut self) {
        tracing::info!(connections = self.quic.connection_count(), "QUIC listener stopping");
        self.quic.close_all(0, b"shutdown");
        self.flush();
        self.protocols.clear();
        self.registry.clear();
    }
}
