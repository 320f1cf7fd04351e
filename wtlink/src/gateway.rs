//! Ties the listener lifecycle to control messages from the host.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam_channel::Sender;
use wtlink_quic::ServerConfig;

use crate::config::GatewayConfig;
use crate::error::Error;
use crate::ipc::{ConnectionId, ControlMessage, HostNotifier};
use crate::listener::{Listener, ListenerCommand};
use crate::protocol::ALPN_H3;
use crate::registry::SessionRegistry;
use crate::tls::TlsMaterial;

/// Lifecycle of the QUIC listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct Running {
    commands: Sender<ListenerCommand>,
    handle: JoinHandle<()>,
    local_addr: SocketAddr,
}

struct Inner {
    state: ListenerState,
    running: Option<Running>,
}

/// Owns the listener thread and the session registry. Shared between the
/// control-channel thread and the caller through `Arc`.
pub struct Gateway {
    config: GatewayConfig,
    server_config: Arc<ServerConfig>,
    registry: SessionRegistry,
    notifier: Arc<dyn HostNotifier>,
    inner: Mutex<Inner>,
}

impl Gateway {
    /// Load TLS material and build the QUIC server configuration.
    pub fn new(config: GatewayConfig, notifier: Arc<dyn HostNotifier>) -> Result<Self, Error> {
        let tls = TlsMaterial::load(&config.tls)?;
        let server_config = wtlink_quic::server_config(tls.certs, tls.key, &[ALPN_H3], &config.limits)?;
        Ok(Self {
            config,
            server_config,
            registry: SessionRegistry::new(),
            notifier,
            inner: Mutex::new(Inner {
                state: ListenerState::Stopped,
                running: None,
            }),
        })
    }

    /// Bind the UDP socket and start the listener thread.
    pub fn start(&self) -> Result<SocketAddr, Error> {
        let mut inner = self.lock();
        if inner.state != ListenerState::Stopped {
            return Err(Error::AlreadyRunning);
        }
        inner.state = ListenerState::Starting;

        match self.spawn_listener() {
            Ok(running) => {
                let local_addr = running.local_addr;
                inner.running = Some(running);
                inner.state = ListenerState::Running;
                tracing::info!(addr = %local_addr, "listener started");
                Ok(local_addr)
            }
            Err(e) => {
                inner.state = ListenerState::Stopped;
                Err(e)
            }
        }
    }

    fn spawn_listener(&self) -> Result<Running, Error> {
        let (commands, receiver) = crossbeam_channel::unbounded();
        let listener = Listener::bind(
            self.config.listen,
            self.server_config.clone(),
            self.config.tick,
            self.registry.clone(),
            self.notifier.clone(),
            receiver,
        )?;
        let local_addr = listener.local_addr();
        let handle = thread::Builder::new()
            .name("wtlink-quic".into())
            .spawn(move || listener.run())?;
        Ok(Running {
            commands,
            handle,
            local_addr,
        })
    }

    /// Close every connection and wait for the listener thread to exit.
    pub fn stop(&self) -> Result<(), Error> {
        let running = {
            let mut inner = self.lock();
            if inner.state != ListenerState::Running {
                return Err(Error::NotRunning);
            }
            inner.state = ListenerState::Stopping;
            inner.running.take()
        };

        if let Some(running) = running {
            // A send error means the thread already exited.
            let _ = running.commands.send(ListenerCommand::Shutdown);
            if running.handle.join().is_err() {
                tracing::error!("listener thread panicked");
            }
        }

        self.lock().state = ListenerState::Stopped;
        tracing::info!("listener stopped");
        Ok(())
    }

    /// Act on a message from the host. Failures are logged.
    pub fn dispatch(&self, msg: ControlMessage) {
        match msg {
            ControlMessage::StartWebTransport => {
                if let Err(e) = self.start() {
                    tracing::warn!(error = %e, "start request ignored");
                }
            }
            ControlMessage::StopWebTransport => {
                tracing::info!("stop requested by host");
                if let Err(e) = self.stop() {
                    tracing::warn!(error = %e, "stop request ignored");
                }
            }
            ControlMessage::Send {
                connection_id,
                body,
            } => {
                if let Err(e) = self.send_to_session(connection_id, &body) {
                    tracing::warn!(session = %connection_id, error = %e, "send dropped");
                }
            }
            ControlMessage::OnConnectionEstablished { connection_id } => {
                tracing::warn!(session = %connection_id, "unexpected message from host");
            }
        }
    }

    /// Send the character count of `body` as a datagram to session `id`.
    pub fn send_to_session(&self, id: ConnectionId, body: &str) -> Result<(), Error> {
        let entry = self.registry.lookup(id).ok_or(Error::UnknownSession(id))?;
        let payload = body.chars().count().to_string();

        let inner = self.lock();
        let running = inner.running.as_ref().ok_or(Error::NotRunning)?;
        running
            .commands
            .send(ListenerCommand::SendDatagram {
                conn: entry.conn,
                session_id: id.0,
                payload: Bytes::from(payload),
            })
            .map_err(|_| Error::NotRunning)
    }

    pub fn state(&self) -> ListenerState {
        self.lock().state
    }

    /// Address the listener is bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().running.as_ref().map(|r| r.local_addr)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if self.state() == ListenerState::Running {
            let _ = self.stop();
        }
    }
}
