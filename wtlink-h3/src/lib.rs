//! HTTP/3 and WebTransport layer for wtlink-quic.
//!
//! This crate provides a sans-IO HTTP/3 connection that sits on top of
//! [`wtlink_quic::QuicEndpoint`]. It handles:
//!
//! - HTTP/3 frame encoding/decoding (DATA, HEADERS, SETTINGS, GOAWAY)
//! - QPACK header compression (static table and Huffman literals)
//! - Control stream management (SETTINGS exchange)
//! - WebTransport stream and datagram framing (draft-ietf-webtrans-http3)
//!
//! # Architecture
//!
//! ```text
//!   UDP datagrams
//!        │
//!   ┌────▼────────┐
//!   │ wtlink-quic │  QUIC transport (quinn-proto wrapper)
//!   │QuicEndpoint │  QuicEvent: StreamDataReceived, DatagramReceived, ...
//!   └────┬────────┘
//!        │ handle_event() / Transport
//!   ┌────▼────────┐
//!   │  wtlink-h3  │  HTTP/3 framing + QPACK + WebTransport
//!   │ H3Connection│  H3Event: HeadersReceived, WebTransportStreamDataReceived, ...
//!   └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use wtlink_h3::{H3Connection, H3Event, HeaderField, Settings};
//!
//! let mut h3 = H3Connection::new(Settings::webtransport());
//! h3.initialize(&mut quic.connection(conn))?;
//!
//! // After quic.poll_event():
//! h3.handle_event(&event);
//! while let Some(h3_event) = h3.poll_event() {
//!     if let H3Event::HeadersReceived { stream_id, .. } = h3_event {
//!         let response = [HeaderField::new(":status", "200")];
//!         h3.send_headers(&mut quic.connection(conn), stream_id, &response, false)?;
//!     }
//! }
//! ```

pub mod connection;
pub mod error;
pub mod frame;
mod huffman;
pub mod qpack;
pub mod settings;
mod stream;

pub use connection::{H3Connection, H3Event};
pub use error::H3Error;
pub use frame::Frame;
pub use qpack::HeaderField;
pub use settings::Settings;
