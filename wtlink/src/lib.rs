//! wtlink: a WebTransport gateway for a game host.
//!
//! The gateway accepts QUIC connections, speaks HTTP/3, completes the
//! WebTransport CONNECT handshake and answers session traffic. A local TCP
//! control channel connects it to the host process, which starts and stops
//! the listener and relays payloads to sessions.
//!
//! ```text
//!   host process ──TCP/JSON── IpcBridge ──dispatch──▶ Gateway
//!                                 ▲                      │ ListenerCommand
//!                    HostNotifier │                      ▼
//!                          ConnectionProtocol ◀── Listener (UDP + QuicEndpoint)
//!                                 │
//!                          SessionHandler
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod ipc;
pub mod listener;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod tls;

#[cfg(test)]
mod test_util;

pub use config::{GatewayConfig, TlsSource};
pub use error::Error;
pub use gateway::{Gateway, ListenerState};
pub use ipc::{ConnectionId, ControlMessage, HostNotifier, IpcBridge, IpcSender};
pub use protocol::{ConnectionProtocol, ProtocolState};
pub use registry::SessionRegistry;
pub use session::SessionHandler;
