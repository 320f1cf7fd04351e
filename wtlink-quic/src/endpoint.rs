use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use quinn_proto::crypto::rustls::HandshakeData;
use quinn_proto::{
    ConnectionError, ConnectionHandle, DatagramEvent, Dir, Event, ReadError, Side, StreamEvent,
    StreamId, VarInt, WriteError,
};
use slab::Slab;

use crate::config::QuicConfig;
use crate::error::Error;
use crate::event::{QuicConnId, QuicEvent};
use crate::transport::Transport;

/// A sans-IO QUIC endpoint.
///
/// Wraps [`quinn_proto::Endpoint`] and exposes an event-queue API.
/// This crate has no runtime dependency. Callers are responsible for
/// sending outgoing packets (via [`poll_send`](Self::poll_send)) and
/// feeding incoming datagrams.
///
/// # Usage
///
/// 1. Feed incoming UDP datagrams via [`handle_datagram`](Self::handle_datagram).
/// 2. Drive connection timers via [`drive_timers`](Self::drive_timers).
/// 3. Poll application events via [`poll_event`](Self::poll_event).
/// 4. Write through [`connection`](Self::connection), then [`flush`](Self::flush).
/// 5. Drain outgoing packets via [`poll_send`](Self::poll_send).
pub struct QuicEndpoint {
    endpoint: quinn_proto::Endpoint,
    connections: Slab<QuicConnection>,
    /// Maps `ConnectionHandle.0` → slab key.  Grows as needed.
    handle_map: Vec<Option<u32>>,
    /// Application-facing event queue.
    events: VecDeque<QuicEvent>,
    /// Outgoing UDP packets waiting to be sent.
    send_queue: VecDeque<OutgoingPacket>,
    /// Scratch buffer for `poll_transmit`.
    transmit_buf: Vec<u8>,
    /// Scratch buffer for `endpoint.handle()` responses.
    response_buf: Vec<u8>,
    local_addr: SocketAddr,
    send_queue_capacity: usize,
}

struct QuicConnection {
    handle: ConnectionHandle,
    conn: quinn_proto::Connection,
    established: bool,
    /// Set once a `ConnectionClosed` event has been queued for this connection.
    close_reported: bool,
    /// Bytes that did not fit in a stream's flow-control window yet.
    pending: HashMap<StreamId, PendingSend>,
}

#[derive(Default)]
struct PendingSend {
    data: Vec<u8>,
    fin: bool,
}

struct OutgoingPacket {
    destination: SocketAddr,
    data: Vec<u8>,
}

impl QuicEndpoint {
    /// Create a new QUIC endpoint.
    ///
    /// `local_addr` is the address of the UDP socket this endpoint is bound to.
    pub fn new(config: QuicConfig, local_addr: SocketAddr) -> Self {
        let endpoint = quinn_proto::Endpoint::new(
            config.endpoint_config,
            Some(config.server_config),
            config.allow_mtud,
            config.rng_seed,
        );

        Self {
            endpoint,
            connections: Slab::new(),
            handle_map: Vec::new(),
            events: VecDeque::new(),
            send_queue: VecDeque::new(),
            transmit_buf: Vec::with_capacity(1500),
            response_buf: Vec::with_capacity(1500),
            local_addr,
            send_queue_capacity: config.send_queue_capacity,
        }
    }

    /// Feed an incoming UDP datagram to the QUIC state machine.
    pub fn handle_datagram(&mut self, now: Instant, data: &[u8], peer: SocketAddr) {
        let data = BytesMut::from(data);
        self.response_buf.clear();
        let event = self.endpoint.handle(
            now,
            peer,
            Some(self.local_addr.ip()),
            None, // ECN not yet supported
            data,
            &mut self.response_buf,
        );

        match event {
            Some(DatagramEvent::ConnectionEvent(ch, event)) => {
                if let Some(&Some(key)) = self.handle_map.get(ch.0) {
                    let key = key as usize;
                    self.connections[key].conn.handle_event(event);
                    self.poll_connection(key, now);
                }
            }
            Some(DatagramEvent::NewConnection(incoming)) => {
                self.response_buf.clear();
                match self
                    .endpoint
                    .accept(incoming, now, &mut self.response_buf, None)
                {
                    Ok((ch, conn)) => {
                        tracing::debug!(%peer, "accepted QUIC connection");
                        let key = self.insert_connection(ch, conn);
                        self.drain_transmits(key, now);
                        self.poll_connection(key, now);
                    }
                    Err(err) => {
                        tracing::debug!(%peer, cause = %err.cause, "rejected QUIC connection");
                        if let Some(transmit) = err.response {
                            let data = self.response_buf[..transmit.size].to_vec();
                            self.queue_packet(transmit.destination, data);
                        }
                    }
                }
            }
            Some(DatagramEvent::Response(transmit)) => {
                // Stateless response (e.g. version negotiation, retry).
                let data = self.response_buf[..transmit.size].to_vec();
                self.queue_packet(transmit.destination, data);
            }
            None => {}
        }
    }

    /// Fire expired per-connection timeouts.
    pub fn drive_timers(&mut self, now: Instant) {
        // Collect keys to avoid borrow conflict with poll_connection.
        let keys: Vec<usize> = self.connections.iter().map(|(k, _)| k).collect();

        for key in keys {
            if !self.connections.contains(key) {
                continue;
            }
            if let Some(timeout) = self.connections[key].conn.poll_timeout()
                && timeout <= now
            {
                self.connections[key].conn.handle_timeout(now);
                self.poll_connection(key, now);
            }
        }
    }

    /// The earliest instant at which [`drive_timers`](Self::drive_timers) has
    /// work to do, if any connection has a timer armed.
    pub fn poll_timeout(&mut self) -> Option<Instant> {
        self.connections
            .iter_mut()
            .filter_map(|(_, c)| c.conn.poll_timeout())
            .min()
    }

    /// Poll the next application event.
    ///
    /// Returns `None` when no more events are queued.
    pub fn poll_event(&mut self) -> Option<QuicEvent> {
        self.events.pop_front()
    }

    /// Move everything the application wrote since the last call into the
    /// send queue, and surface any events those writes produced.
    pub fn flush(&mut self, now: Instant) {
        let keys: Vec<usize> = self.connections.iter().map(|(k, _)| k).collect();
        for key in keys {
            if self.connections.contains(key) {
                self.poll_connection(key, now);
            }
        }
    }

    /// Poll the next outgoing UDP packet.
    ///
    /// Returns `(destination, data)` or `None` when the send queue is empty.
    /// The caller is responsible for sending the packet via their UDP socket.
    pub fn poll_send(&mut self) -> Option<(SocketAddr, Vec<u8>)> {
        self.send_queue
            .pop_front()
            .map(|pkt| (pkt.destination, pkt.data))
    }

    /// Borrow a single connection through the [`Transport`] send primitives.
    pub fn connection(&mut self, conn: QuicConnId) -> ConnectionRef<'_> {
        ConnectionRef {
            endpoint: self,
            conn,
        }
    }

    /// Write data to a QUIC stream, optionally finishing it.
    ///
    /// Whatever does not fit in the current flow-control window is buffered
    /// and written when the peer grants more credit; the FIN follows the last
    /// buffered byte.
    pub fn stream_send(
        &mut self,
        conn: QuicConnId,
        stream_id: u64,
        data: &[u8],
        fin: bool,
    ) -> Result<(), Error> {
        let stream = stream_from_id(stream_id);
        let c = self.get_conn_mut(conn)?;

        if let Some(pending) = c.pending.get_mut(&stream) {
            pending.data.extend_from_slice(data);
            pending.fin |= fin;
            return Ok(());
        }

        let mut pending = PendingSend {
            data: data.to_vec(),
            fin,
        };
        if !write_pending(&mut c.conn, stream, &mut pending)? {
            tracing::trace!(stream_id, buffered = pending.data.len(), "stream blocked");
            c.pending.insert(stream, pending);
        }
        Ok(())
    }

    /// Open a server-initiated unidirectional stream.
    pub fn open_uni(&mut self, conn: QuicConnId) -> Result<u64, Error> {
        self.open_stream(conn, Dir::Uni)
    }

    /// Open a server-initiated bidirectional stream.
    pub fn open_bi(&mut self, conn: QuicConnId) -> Result<u64, Error> {
        self.open_stream(conn, Dir::Bi)
    }

    fn open_stream(&mut self, conn: QuicConnId, dir: Dir) -> Result<u64, Error> {
        let c = self.get_conn_mut(conn)?;
        c.conn
            .streams()
            .open(dir)
            .map(u64::from)
            .ok_or(Error::StreamLimit)
    }

    /// Queue an unreliable datagram. The oldest queued datagram is dropped
    /// when the send buffer is full.
    pub fn send_datagram(&mut self, conn: QuicConnId, data: Bytes) -> Result<(), Error> {
        let c = self.get_conn_mut(conn)?;
        c.conn.datagrams().send(data, true)?;
        Ok(())
    }

    /// Close a QUIC connection with the given error code and reason.
    pub fn close(&mut self, conn: QuicConnId, code: u64, reason: &[u8]) {
        if let Ok(c) = self.get_conn_mut(conn) {
            c.conn.close(
                Instant::now(),
                VarInt::from_u64(code).unwrap_or(VarInt::MAX),
                Bytes::copy_from_slice(reason),
            );
        }
    }

    /// Close every connection, e.g. on shutdown.
    pub fn close_all(&mut self, code: u64, reason: &[u8]) {
        let keys: Vec<usize> = self.connections.iter().map(|(k, _)| k).collect();
        for key in keys {
            self.close(QuicConnId(key as u32), code, reason);
        }
    }

    /// Number of active QUIC connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of pending outgoing packets.
    pub fn send_queue_len(&self) -> usize {
        self.send_queue.len()
    }

    /// Peer address for a connection, if it exists.
    pub fn remote_addr(&self, conn: QuicConnId) -> Option<SocketAddr> {
        self.connections
            .get(conn.0 as usize)
            .map(|c| c.conn.remote_address())
    }

    // ── Internal helpers ─────────────────────────────────────────────

    fn insert_connection(&mut self, ch: ConnectionHandle, conn: quinn_proto::Connection) -> usize {
        let key = self.connections.insert(QuicConnection {
            handle: ch,
            conn,
            established: false,
            close_reported: false,
            pending: HashMap::new(),
        });

        // Grow handle_map if needed.
        let idx = ch.0;
        if idx >= self.handle_map.len() {
            self.handle_map.resize(idx + 1, None);
        }
        self.handle_map[idx] = Some(key as u32);

        key
    }

    fn get_conn_mut(&mut self, conn: QuicConnId) -> Result<&mut QuicConnection, Error> {
        self.connections
            .get_mut(conn.0 as usize)
            .ok_or(Error::InvalidConnection)
    }

    /// Drain all pending transmits from a connection into the send queue.
    fn drain_transmits(&mut self, key: usize, now: Instant) {
        loop {
            self.transmit_buf.clear();
            let transmit = self.connections[key]
                .conn
                .poll_transmit(now, 1, &mut self.transmit_buf);

            match transmit {
                Some(t) => {
                    let data = self.transmit_buf[..t.size].to_vec();
                    self.queue_packet(t.destination, data);
                }
                None => break,
            }
        }
    }

    /// Drain endpoint events and application events from a connection.
    fn poll_connection(&mut self, key: usize, now: Instant) {
        // 1. Drain endpoint events (e.g. connection ID updates).
        while let Some(event) = self.connections[key].conn.poll_endpoint_events() {
            if let Some(conn_event) = self
                .endpoint
                .handle_event(self.connections[key].handle, event)
            {
                self.connections[key].conn.handle_event(conn_event);
            }
        }

        // 2. Drain transmits generated by endpoint event handling.
        self.drain_transmits(key, now);

        // 3. Drain application events.
        let conn_id = QuicConnId(key as u32);
        while let Some(event) = self.connections[key].conn.poll() {
            match event {
                Event::Connected => {
                    let c = &mut self.connections[key];
                    c.established = true;
                    let alpn = negotiated_alpn(&c.conn);
                    self.events.push_back(QuicEvent::ProtocolNegotiated {
                        conn: conn_id,
                        alpn,
                    });
                }
                Event::ConnectionLost { reason } => {
                    self.report_closed(key, reason);
                    self.remove_connection(key);
                    return; // Connection is gone, stop polling.
                }
                Event::Stream(stream_event) => match stream_event {
                    StreamEvent::Opened { dir } => {
                        // Accept all new streams from the peer. Data may have
                        // arrived in the packet that opened the stream.
                        while let Some(stream) = self.connections[key].conn.streams().accept(dir) {
                            self.read_stream(key, stream);
                        }
                    }
                    StreamEvent::Readable { id } => self.read_stream(key, id),
                    StreamEvent::Writable { id } => self.flush_pending(key, id),
                    StreamEvent::Stopped { id, error_code } => {
                        tracing::debug!(
                            conn = %conn_id,
                            stream_id = u64::from(id),
                            error_code = error_code.into_inner(),
                            "peer stopped stream"
                        );
                        self.connections[key].pending.remove(&id);
                    }
                    StreamEvent::Finished { .. } | StreamEvent::Available { .. } => {
                        // Not surfaced to application.
                    }
                },
                Event::DatagramReceived => {
                    while let Some(data) = self.connections[key].conn.datagrams().recv() {
                        self.events
                            .push_back(QuicEvent::DatagramReceived { conn: conn_id, data });
                    }
                }
                Event::HandshakeDataReady | Event::DatagramsUnblocked => {
                    // Not surfaced.
                }
            }
        }

        // 4. Final drain of transmits generated by event processing.
        self.drain_transmits(key, now);

        // 5. If the connection is drained, remove it.
        if self.connections.contains(key) && self.connections[key].conn.is_drained() {
            self.report_closed(key, ConnectionError::LocallyClosed);
            self.remove_connection(key);
        }
    }

    /// Pull everything readable from a stream and queue it as one event.
    fn read_stream(&mut self, key: usize, stream: StreamId) {
        let conn_id = QuicConnId(key as u32);
        let stream_id = u64::from(stream);

        let mut recv = self.connections[key].conn.recv_stream(stream);
        let mut chunks = match recv.read(true) {
            Ok(chunks) => chunks,
            Err(err) => {
                tracing::trace!(conn = %conn_id, stream_id, %err, "stream not readable");
                return;
            }
        };

        let mut data = BytesMut::new();
        let mut end_stream = false;
        let mut reset = None;
        loop {
            match chunks.next(usize::MAX) {
                Ok(Some(chunk)) => data.extend_from_slice(&chunk.bytes),
                Ok(None) => {
                    end_stream = true;
                    break;
                }
                Err(ReadError::Reset(code)) => {
                    reset = Some(code.into_inner());
                    break;
                }
                Err(_) => break,
            }
        }
        let _ = chunks.finalize();

        if !data.is_empty() || end_stream {
            self.events.push_back(QuicEvent::StreamDataReceived {
                conn: conn_id,
                stream_id,
                data: data.freeze(),
                end_stream,
            });
        }
        if let Some(error_code) = reset {
            self.events.push_back(QuicEvent::StreamReset {
                conn: conn_id,
                stream_id,
                error_code,
            });
        }
    }

    fn flush_pending(&mut self, key: usize, stream: StreamId) {
        let c = &mut self.connections[key];
        let Some(pending) = c.pending.get_mut(&stream) else {
            return;
        };
        match write_pending(&mut c.conn, stream, pending) {
            Ok(true) => {
                c.pending.remove(&stream);
            }
            Ok(false) => {}
            Err(err) => {
                tracing::debug!(stream_id = u64::from(stream), %err, "dropping buffered stream data");
                c.pending.remove(&stream);
            }
        }
    }

    fn report_closed(&mut self, key: usize, reason: ConnectionError) {
        let c = &mut self.connections[key];
        if c.close_reported {
            return;
        }
        c.close_reported = true;
        tracing::debug!(conn = key, established = c.established, %reason, "QUIC connection closed");
        self.events.push_back(QuicEvent::ConnectionClosed {
            conn: QuicConnId(key as u32),
            reason,
        });
    }

    fn remove_connection(&mut self, key: usize) {
        let qc = self.connections.remove(key);
        let idx = qc.handle.0;
        if idx < self.handle_map.len() {
            self.handle_map[idx] = None;
        }
    }

    fn queue_packet(&mut self, destination: SocketAddr, data: Vec<u8>) {
        if self.send_queue.len() < self.send_queue_capacity {
            self.send_queue
                .push_back(OutgoingPacket { destination, data });
        }
        // Excess packets are dropped; QUIC retransmits them.
    }
}

/// A borrowed connection, exposing the send primitives used by the layers above.
pub struct ConnectionRef<'a> {
    endpoint: &'a mut QuicEndpoint,
    conn: QuicConnId,
}

impl ConnectionRef<'_> {
    pub fn id(&self) -> QuicConnId {
        self.conn
    }
}

impl Transport for ConnectionRef<'_> {
    fn stream_send(&mut self, stream_id: u64, data: &[u8], fin: bool) -> Result<(), Error> {
        self.endpoint.stream_send(self.conn, stream_id, data, fin)
    }

    fn open_uni(&mut self) -> Result<u64, Error> {
        self.endpoint.open_uni(self.conn)
    }

    fn open_bi(&mut self) -> Result<u64, Error> {
        self.endpoint.open_bi(self.conn)
    }

    fn send_datagram(&mut self, data: Bytes) -> Result<(), Error> {
        self.endpoint.send_datagram(self.conn, data)
    }

    fn close(&mut self, code: u64, reason: &[u8]) {
        self.endpoint.close(self.conn, code, reason);
    }
}

/// Write as much of `pending` as flow control allows. Returns `true` once
/// everything, including the FIN, has been handed to quinn.
fn write_pending(
    conn: &mut quinn_proto::Connection,
    stream: StreamId,
    pending: &mut PendingSend,
) -> Result<bool, Error> {
    let mut send = conn.send_stream(stream);
    while !pending.data.is_empty() {
        match send.write(&pending.data) {
            Ok(0) | Err(WriteError::Blocked) => return Ok(false),
            Ok(n) => {
                pending.data.drain(..n);
            }
            Err(err) => return Err(err.into()),
        }
    }
    if pending.fin {
        send.finish()?;
    }
    Ok(true)
}

fn stream_from_id(id: u64) -> StreamId {
    let initiator = if id & 0b01 == 0 {
        Side::Client
    } else {
        Side::Server
    };
    let dir = if id & 0b10 == 0 { Dir::Bi } else { Dir::Uni };
    StreamId::new(initiator, dir, id >> 2)
}

fn negotiated_alpn(conn: &quinn_proto::Connection) -> Option<Vec<u8>> {
    conn.crypto_session()
        .handshake_data()?
        .downcast::<HandshakeData>()
        .ok()?
        .protocol
}
