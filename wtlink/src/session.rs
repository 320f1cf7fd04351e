//! Per-session stream and datagram handling.
//!
//! Every reply carries a byte count rather than the payload itself: a
//! datagram of N bytes is answered with the decimal string of N, and so is a
//! stream that delivered N bytes before its FIN.

use std::collections::HashMap;

use wtlink_h3::{H3Connection, H3Error, H3Event};
use wtlink_quic::{Transport, is_uni};

/// State of one established WebTransport session.
pub struct SessionHandler {
    session_id: u64,
    /// Bytes received so far on each open stream.
    counters: HashMap<u64, usize>,
}

impl SessionHandler {
    pub fn new(session_id: u64) -> Self {
        Self {
            session_id,
            counters: HashMap::new(),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Number of streams with bytes counted but no FIN yet.
    pub fn open_streams(&self) -> usize {
        self.counters.len()
    }

    /// React to an HTTP/3 event. Events for other sessions are ignored.
    pub fn handle_event(
        &mut self,
        h3: &mut H3Connection,
        transport: &mut impl Transport,
        event: &H3Event,
    ) -> Result<(), H3Error> {
        match event {
            H3Event::DatagramReceived { stream_id, data } if *stream_id == self.session_id => {
                tracing::debug!(session = self.session_id, len = data.len(), "datagram received");
                let reply = data.len().to_string();
                h3.send_datagram(transport, self.session_id, reply.as_bytes())
            }
            H3Event::WebTransportStreamDataReceived {
                stream_id,
                session_id,
                data,
                stream_ended,
            } if *session_id == self.session_id => {
                self.stream_data(h3, transport, *stream_id, data.len(), *stream_ended)
            }
            _ => Ok(()),
        }
    }

    fn stream_data(
        &mut self,
        h3: &mut H3Connection,
        transport: &mut impl Transport,
        stream_id: u64,
        len: usize,
        ended: bool,
    ) -> Result<(), H3Error> {
        let total = self.counters.entry(stream_id).or_insert(0);
        *total += len;
        if !ended {
            return Ok(());
        }

        let reply = total.to_string();
        self.stream_closed(stream_id);
        tracing::debug!(session = self.session_id, stream_id, bytes = %reply, "stream ended");

        if is_uni(stream_id) {
            let reply_stream = h3.create_webtransport_stream(transport, self.session_id, true)?;
            h3.send_stream_data(transport, reply_stream, reply.as_bytes(), true)
        } else {
            h3.send_stream_data(transport, stream_id, reply.as_bytes(), true)
        }
    }

    /// Forget the counter of `stream_id`. Unknown streams are ignored.
    pub fn stream_closed(&mut self, stream_id: u64) {
        if self.counters.remove(&stream_id).is_some() {
            tracing::trace!(session = self.session_id, stream_id, "stream counter removed");
        }
    }
}
