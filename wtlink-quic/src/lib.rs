//! wtlink-quic: a server-side QUIC endpoint over quinn-proto.
//!
//! This crate wraps [quinn-proto](https://docs.rs/quinn-proto)'s sans-IO QUIC
//! state machine and exposes an event-based [`QuicEndpoint`] API. Stream bytes
//! are read out of quinn as they arrive and surfaced as [`QuicEvent`]s, so the
//! layers above never touch quinn's stream handles.
//!
//! # Example
//!
//! ```rust,ignore
//! use wtlink_quic::{QuicConfig, QuicEndpoint, QuicEvent, Transport};
//!
//! // Feed incoming datagrams:
//! quic.handle_datagram(Instant::now(), data, peer);
//! while let Some(event) = quic.poll_event() {
//!     if let QuicEvent::StreamDataReceived { conn, stream_id, data, end_stream } = event {
//!         quic.connection(conn).stream_send(stream_id, &data, end_stream)?;
//!     }
//! }
//! quic.flush(Instant::now());
//! // Drain outgoing packets:
//! while let Some((dest, data)) = quic.poll_send() {
//!     udp.send_to(&data, dest)?;
//! }
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod transport;

pub use config::{QuicConfig, TransportLimits, server_config};
pub use endpoint::{ConnectionRef, QuicEndpoint};
pub use error::Error;
pub use event::{QuicConnId, QuicEvent, is_client_initiated, is_uni};
pub use transport::Transport;

// Re-export commonly used quinn-proto types for convenience.
pub use quinn_proto::{ConnectionError, ServerConfig};
