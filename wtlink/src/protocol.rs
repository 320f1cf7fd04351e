//! Per-connection HTTP/3 dispatch and the WebTransport handshake.

use std::collections::HashMap;
use std::sync::Arc;

use wtlink_h3::{H3Connection, H3Error, H3Event, HeaderField, Settings};
use wtlink_quic::{QuicConnId, QuicEvent, Transport};

use crate::error::Error;
use crate::ipc::{ConnectionId, ControlMessage, HostNotifier};
use crate::registry::SessionRegistry;
use crate::session::SessionHandler;

/// ALPN identifier for HTTP/3.
pub const ALPN_H3: &[u8] = b"h3";

/// H3_GENERAL_PROTOCOL_ERROR (RFC 9114 Section 8.1).
const H3_GENERAL_PROTOCOL_ERROR: u64 = 0x0101;

const WEBTRANSPORT_DRAFT_HEADER: &str = "sec-webtransport-http3-draft";
const WEBTRANSPORT_DRAFT: &str = "draft02";

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// Handshake not finished, or ALPN not yet known.
    NoH3,
    /// HTTP/3 is up and no session has been established.
    H3Ready,
    /// A WebTransport session is running.
    SessionActive,
    /// The session or the connection has ended.
    Closed,
}

/// Drives one QUIC connection: HTTP/3 setup, the CONNECT handshake and the
/// single session it may carry.
pub struct ConnectionProtocol {
    conn: QuicConnId,
    state: ProtocolState,
    h3: Option<H3Connection>,
    session: Option<SessionHandler>,
    registry: SessionRegistry,
    notifier: Arc<dyn HostNotifier>,
}

impl ConnectionProtocol {
    pub fn new(conn: QuicConnId, registry: SessionRegistry, notifier: Arc<dyn HostNotifier>) -> Self {
        Self {
            conn,
            state: ProtocolState::NoH3,
            h3: None,
            session: None,
            registry,
            notifier,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// The CONNECT stream of the running session.
    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(SessionHandler::session_id)
    }

    /// Process one QUIC event for this connection.
    pub fn handle_event(&mut self, transport: &mut impl Transport, event: &QuicEvent) {
        match event {
            QuicEvent::ProtocolNegotiated { alpn, .. } => {
                self.protocol_negotiated(transport, alpn.as_deref());
                return;
            }
            QuicEvent::StreamReset {
                stream_id,
                error_code,
                ..
            } => {
                if let Some(session) = self.session.as_mut() {
                    session.stream_closed(*stream_id);
                }
                if self.session_id() == Some(*stream_id) {
                    tracing::debug!(conn = %self.conn, error_code, "CONNECT stream reset");
                    self.end_session();
                }
            }
            _ => {}
        }

        if let Some(mut h3) = self.h3.take() {
            h3.handle_event(event);
            while let Some(h3_event) = h3.poll_event() {
                if let Err(e) = self.dispatch(&mut h3, transport, h3_event) {
                    tracing::warn!(conn = %self.conn, error = %e, "closing connection");
                    transport.close(e.code(), e.to_string().as_bytes());
                    self.end_session();
                    self.state = ProtocolState::Closed;
                    break;
                }
            }
            self.h3 = Some(h3);
        }

        if let QuicEvent::ConnectionClosed { reason, .. } = event {
            tracing::debug!(conn = %self.conn, %reason, "connection closed");
            self.end_session();
            self.state = ProtocolState::Closed;
        }
    }

    /// Send a datagram to the session on `session_id`.
    pub fn send_datagram(
        &mut self,
        transport: &mut impl Transport,
        session_id: u64,
        payload: &[u8],
    ) -> Result<(), Error> {
        let current = self.session_id();
        match (self.h3.as_mut(), current) {
            (Some(h3), Some(id)) if id == session_id => {
                h3.send_datagram(transport, session_id, payload)?;
                Ok(())
            }
            _ => Err(Error::UnknownSession(ConnectionId(session_id))),
        }
    }

    fn protocol_negotiated(&mut self, transport: &mut impl Transport, alpn: Option<&[u8]>) {
        if self.state != ProtocolState::NoH3 {
            return;
        }
        if alpn != Some(ALPN_H3) {
            tracing::warn!(
                conn = %self.conn,
                alpn = ?alpn.map(String::from_utf8_lossy),
                "unsupported application protocol"
            );
            transport.close(H3_GENERAL_PROTOCOL_ERROR, b"unsupported application protocol");
            self.state = ProtocolState::Closed;
            return;
        }

        let mut h3 = H3Connection::new(Settings::webtransport());
        if let Err(e) = h3.initialize(transport) {
            tracing::warn!(conn = %self.conn, error = %e, "HTTP/3 setup failed");
            transport.close(e.code(), b"HTTP/3 setup failed");
            self.state = ProtocolState::Closed;
            return;
        }
        tracing::debug!(conn = %self.conn, "HTTP/3 ready");
        self.h3 = Some(h3);
        self.session = None;
        self.state = ProtocolState::H3Ready;
    }

    fn dispatch(
        &mut self,
        h3: &mut H3Connection,
        transport: &mut impl Transport,
        event: H3Event,
    ) -> Result<(), H3Error> {
        let event = match event {
            H3Event::Error(e) => return Err(e),
            other => other,
        };

        match &event {
            H3Event::HeadersReceived {
                stream_id, headers, ..
            } => {
                let res = self.headers_received(h3, transport, *stream_id, headers);
                self.local_failure(res)?;
            }
            H3Event::GoAway { stream_id } => {
                tracing::debug!(conn = %self.conn, stream_id, "peer sent GOAWAY");
            }
            _ => {}
        }

        if let Some(session) = self.session.as_mut() {
            let res = session.handle_event(h3, transport, &event);
            self.local_failure(res)?;
        }

        if let H3Event::HeadersReceived {
            stream_id,
            stream_ended: true,
            ..
        }
        | H3Event::DataReceived {
            stream_id,
            stream_ended: true,
            ..
        } = &event
            && self.session_id() == Some(*stream_id)
        {
            tracing::debug!(conn = %self.conn, stream_id, "CONNECT stream ended");
            self.end_session();
        }
        Ok(())
    }

    /// QUIC write failures belong to the exchange that hit them; only
    /// HTTP/3 protocol errors are passed on to close the connection.
    fn local_failure(&self, res: Result<(), H3Error>) -> Result<(), H3Error> {
        match res {
            Err(H3Error::Quic(e)) => {
                tracing::warn!(conn = %self.conn, error = %e, "write failed");
                Ok(())
            }
            other => other,
        }
    }

    fn headers_received(
        &mut self,
        h3: &mut H3Connection,
        transport: &mut impl Transport,
        stream_id: u64,
        headers: &[HeaderField],
    ) -> Result<(), H3Error> {
        // Repeated names: the last occurrence wins.
        let fields: HashMap<&[u8], &[u8]> = headers
            .iter()
            .map(|f| (f.name.as_slice(), f.value.as_slice()))
            .collect();
        let get = |name: &str| fields.get(name.as_bytes()).copied();

        let is_webtransport_connect =
            get(":method") == Some(b"CONNECT".as_slice())
                && get(":protocol") == Some(b"webtransport".as_slice());
        if !is_webtransport_connect {
            tracing::debug!(conn = %self.conn, stream_id, "not a WebTransport CONNECT");
            return respond(h3, transport, stream_id, "400");
        }

        let (Some(_authority), Some(path)) = (get(":authority"), get(":path")) else {
            tracing::debug!(conn = %self.conn, stream_id, "CONNECT without :authority or :path");
            return respond(h3, transport, stream_id, "400");
        };

        if self.state != ProtocolState::H3Ready {
            tracing::warn!(conn = %self.conn, stream_id, state = ?self.state, "CONNECT rejected");
            return respond(h3, transport, stream_id, "400");
        }

        if path != b"/" {
            tracing::debug!(
                conn = %self.conn,
                stream_id,
                path = %String::from_utf8_lossy(path),
                "no such path"
            );
            return respond(h3, transport, stream_id, "404");
        }

        let response = [
            HeaderField::new(":status", "200"),
            HeaderField::new(WEBTRANSPORT_DRAFT_HEADER, WEBTRANSPORT_DRAFT),
        ];
        h3.send_headers(transport, stream_id, &response, false)?;

        let id = ConnectionId(stream_id);
        self.session = Some(SessionHandler::new(stream_id));
        self.state = ProtocolState::SessionActive;
        if let Some(old) = self.registry.register(id, self.conn) {
            tracing::warn!(
                session = %id,
                old = %old,
                new = %self.conn,
                "session id already in use, host messages now reach the new connection"
            );
        }
        tracing::info!(conn = %self.conn, session = %id, "session established");

        let msg = ControlMessage::OnConnectionEstablished { connection_id: id };
        if let Err(e) = self.notifier.notify(&msg) {
            tracing::warn!(session = %id, error = %e, "failed to notify host");
        }
        Ok(())
    }

    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            let id = ConnectionId(session.session_id());
            self.registry.remove(id, self.conn);
            tracing::info!(conn = %self.conn, session = %id, "session closed");
            self.state = ProtocolState::Closed;
        }
    }
}

/// Answer a request with a bare status and finish the stream.
fn respond(
    h3: &mut H3Connection,
    transport: &mut impl Transport,
    stream_id: u64,
    status: &str,
) -> Result<(), H3Error> {
    h3.send_headers(transport, stream_id, &[HeaderField::new(":status", status)], true)
}
