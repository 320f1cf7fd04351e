//! HTTP/3 connection state machine with the WebTransport extension.
//!
//! `H3Connection` consumes events from a `QuicEndpoint`, classifies
//! peer-initiated streams and produces HTTP-level events. Writes go through
//! any [`Transport`], so the state machine never owns the QUIC connection.
//! Server-side only.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use wtlink_quic::{QuicEvent, Transport, is_uni};

use crate::error::H3Error;
use crate::frame::{self, Frame, WEBTRANSPORT_STREAM, decode_varint, encode_varint};
use crate::qpack::{self, HeaderField};
use crate::settings::Settings;
use crate::stream::{H3Stream, StreamKind};

/// HTTP/3 uni-stream type identifiers (RFC 9114 Section 6.2).
const STREAM_TYPE_CONTROL: u64 = 0x00;
const STREAM_TYPE_QPACK_ENCODER: u64 = 0x02;
const STREAM_TYPE_QPACK_DECODER: u64 = 0x03;
/// Unidirectional WebTransport stream (draft-ietf-webtrans-http3).
const STREAM_TYPE_WEBTRANSPORT: u64 = 0x54;

/// Events produced by the HTTP/3 connection for the application.
#[derive(Debug)]
pub enum H3Event {
    /// A HEADERS frame arrived on a request stream.
    HeadersReceived {
        stream_id: u64,
        headers: Vec<HeaderField>,
        stream_ended: bool,
    },
    /// A DATA frame arrived on a request stream, or the stream ended
    /// (`data` empty, `stream_ended` set).
    DataReceived {
        stream_id: u64,
        data: Vec<u8>,
        stream_ended: bool,
    },
    /// An HTTP datagram arrived. `stream_id` is the stream of the session
    /// it belongs to.
    DatagramReceived { stream_id: u64, data: Bytes },
    /// Bytes arrived on a WebTransport stream of the session `session_id`.
    WebTransportStreamDataReceived {
        stream_id: u64,
        session_id: u64,
        data: Vec<u8>,
        stream_ended: bool,
    },
    /// Peer sent GOAWAY frame.
    GoAway { stream_id: u64 },
    /// Connection-level error. The connection should be closed with
    /// [`H3Error::code`].
    Error(H3Error),
}

/// Internal connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum H3State {
    /// Waiting for peer's control stream + SETTINGS.
    Initializing,
    /// SETTINGS received.
    Ready,
    /// GOAWAY received.
    Closing,
    /// Connection closed or failed; further events are ignored.
    Closed,
}

/// Server-side HTTP/3 connection.
///
/// Feed QUIC events with [`handle_event()`](Self::handle_event), then drain
/// HTTP-level events with [`poll_event()`](Self::poll_event).
pub struct H3Connection {
    state: H3State,
    local_settings: Settings,
    remote_settings: Option<Settings>,

    /// Streams that carry incoming bytes, keyed by QUIC stream ID.
    streams: HashMap<u64, H3Stream>,

    /// Peer's control stream (unidirectional).
    peer_control_stream: Option<u64>,
    /// Our control stream, opened by `initialize`.
    local_control_stream: Option<u64>,

    /// Application-visible event queue.
    events: VecDeque<H3Event>,
}

impl H3Connection {
    /// Create a new server-side HTTP/3 connection.
    pub fn new(settings: Settings) -> Self {
        Self {
            state: H3State::Initializing,
            local_settings: settings,
            remote_settings: None,
            streams: HashMap::new(),
            peer_control_stream: None,
            local_control_stream: None,
            events: VecDeque::new(),
        }
    }

    /// Open our control stream and send SETTINGS.
    ///
    /// The control stream is never finished: closing it is a connection
    /// error (RFC 9114 Section 6.2.1).
    pub fn initialize(&mut self, transport: &mut impl Transport) -> Result<(), H3Error> {
        if self.local_control_stream.is_some() {
            return Ok(());
        }
        let stream_id = transport.open_uni()?;

        let mut buf = Vec::new();
        encode_varint(&mut buf, STREAM_TYPE_CONTROL);
        Frame::Settings(self.local_settings.clone()).encode(&mut buf);
        transport.stream_send(stream_id, &buf, false)?;

        self.local_control_stream = Some(stream_id);
        Ok(())
    }

    /// Process a QUIC event and update HTTP/3 state.
    pub fn handle_event(&mut self, event: &QuicEvent) {
        if self.state == H3State::Closed {
            return;
        }
        match event {
            QuicEvent::StreamDataReceived {
                stream_id,
                data,
                end_stream,
                ..
            } => self.receive_stream_data(*stream_id, data, *end_stream),
            QuicEvent::StreamReset { stream_id, .. } => {
                self.streams.remove(stream_id);
                if self.peer_control_stream == Some(*stream_id) {
                    self.fail(H3Error::ClosedCriticalStream);
                }
            }
            QuicEvent::DatagramReceived { data, .. } => self.receive_datagram(data),
            QuicEvent::ConnectionClosed { .. } => {
                self.state = H3State::Closed;
                self.streams.clear();
            }
            QuicEvent::ProtocolNegotiated { .. } => {}
        }
    }

    /// Poll the next HTTP/3 event, if any.
    pub fn poll_event(&mut self) -> Option<H3Event> {
        self.events.pop_front()
    }

    /// The peer's SETTINGS, once its control stream delivered them.
    pub fn remote_settings(&self) -> Option<&Settings> {
        self.remote_settings.as_ref()
    }

    /// Send a HEADERS frame on a request stream.
    pub fn send_headers(
        &mut self,
        transport: &mut impl Transport,
        stream_id: u64,
        headers: &[HeaderField],
        end_stream: bool,
    ) -> Result<(), H3Error> {
        let mut encoded = Vec::new();
        qpack::encode(headers, &mut encoded);

        let mut buf = Vec::with_capacity(encoded.len() + 4);
        Frame::Headers { encoded }.encode(&mut buf);
        transport.stream_send(stream_id, &buf, end_stream)?;
        Ok(())
    }

    /// Send a DATA frame on a request stream.
    pub fn send_data(
        &mut self,
        transport: &mut impl Transport,
        stream_id: u64,
        data: &[u8],
        end_stream: bool,
    ) -> Result<(), H3Error> {
        let mut buf = Vec::with_capacity(data.len() + 9);
        frame::encode_frame_header(&mut buf, frame::FRAME_DATA, data.len());
        buf.extend_from_slice(data);
        transport.stream_send(stream_id, &buf, end_stream)?;
        Ok(())
    }

    /// Write raw bytes on a WebTransport stream.
    pub fn send_stream_data(
        &mut self,
        transport: &mut impl Transport,
        stream_id: u64,
        data: &[u8],
        end_stream: bool,
    ) -> Result<(), H3Error> {
        transport.stream_send(stream_id, data, end_stream)?;
        Ok(())
    }

    /// Open a server-initiated WebTransport stream for `session_id` and
    /// write its stream header. Returns the new stream ID.
    pub fn create_webtransport_stream(
        &mut self,
        transport: &mut impl Transport,
        session_id: u64,
        unidirectional: bool,
    ) -> Result<u64, H3Error> {
        let mut header = Vec::with_capacity(16);
        let stream_id = if unidirectional {
            encode_varint(&mut header, STREAM_TYPE_WEBTRANSPORT);
            transport.open_uni()?
        } else {
            encode_varint(&mut header, WEBTRANSPORT_STREAM);
            let stream_id = transport.open_bi()?;
            // Whatever the peer writes back belongs to the session as well.
            let mut stream = H3Stream::new();
            stream.kind = StreamKind::WebTransport { session_id };
            self.streams.insert(stream_id, stream);
            stream_id
        };
        encode_varint(&mut header, session_id);
        transport.stream_send(stream_id, &header, false)?;
        Ok(stream_id)
    }

    /// Send an HTTP datagram for the session on `session_id`.
    pub fn send_datagram(
        &mut self,
        transport: &mut impl Transport,
        session_id: u64,
        data: &[u8],
    ) -> Result<(), H3Error> {
        let mut buf = Vec::with_capacity(data.len() + 8);
        encode_varint(&mut buf, session_id / 4);
        buf.extend_from_slice(data);
        transport.send_datagram(Bytes::from(buf))?;
        Ok(())
    }

    /// Send a GOAWAY frame on the control stream (graceful shutdown).
    pub fn send_goaway(
        &mut self,
        transport: &mut impl Transport,
        last_stream_id: u64,
    ) -> Result<(), H3Error> {
        let control = self
            .local_control_stream
            .ok_or(H3Error::Internal("no control stream".into()))?;

        let mut buf = Vec::new();
        Frame::GoAway {
            stream_id: last_stream_id,
        }
        .encode(&mut buf);
        transport.stream_send(control, &buf, false)?;
        Ok(())
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn fail(&mut self, err: H3Error) {
        tracing::debug!(%err, "HTTP/3 connection error");
        self.events.push_back(H3Event::Error(err));
        self.state = H3State::Closed;
    }

    fn receive_datagram(&mut self, data: &Bytes) {
        match decode_varint(data) {
            Some((quarter_stream_id, n)) => self.events.push_back(H3Event::DatagramReceived {
                stream_id: quarter_stream_id * 4,
                data: data.slice(n..),
            }),
            None => self.fail(H3Error::Datagram),
        }
    }

    fn receive_stream_data(&mut self, stream_id: u64, data: &[u8], fin: bool) {
        // Take the stream out of the map so it can be borrowed alongside self.
        let mut stream = self.streams.remove(&stream_id).unwrap_or_else(H3Stream::new);
        if stream.ended {
            return;
        }
        stream.buf.extend_from_slice(data);
        stream.ended |= fin;

        if self.process_stream(stream_id, &mut stream) && self.state != H3State::Closed {
            self.streams.insert(stream_id, stream);
        }
    }

    /// Consume what can be consumed from `stream`. Returns whether the stream
    /// state should be kept.
    fn process_stream(&mut self, stream_id: u64, stream: &mut H3Stream) -> bool {
        loop {
            match stream.kind {
                StreamKind::Pending => {
                    let Some((kind, consumed)) = classify(stream_id, &stream.buf) else {
                        // Type still incomplete; a stream that ends here is dropped.
                        return !stream.ended;
                    };
                    stream.buf.drain(..consumed);
                    if kind == StreamKind::Control {
                        if self.peer_control_stream.is_some() {
                            self.fail(H3Error::StreamCreation);
                            return false;
                        }
                        self.peer_control_stream = Some(stream_id);
                    }
                    tracing::trace!(stream_id, ?kind, "classified stream");
                    stream.kind = kind;
                }
                StreamKind::Control => return self.process_control(stream),
                StreamKind::Request => {
                    self.process_request(stream_id, stream);
                    return !stream.ended;
                }
                StreamKind::WebTransport { session_id } => {
                    if !stream.buf.is_empty() || stream.ended {
                        self.events
                            .push_back(H3Event::WebTransportStreamDataReceived {
                                stream_id,
                                session_id,
                                data: std::mem::take(&mut stream.buf),
                                stream_ended: stream.ended,
                            });
                    }
                    return !stream.ended;
                }
                StreamKind::Ignored => {
                    stream.buf.clear();
                    return !stream.ended;
                }
            }
        }
    }

    fn process_control(&mut self, stream: &mut H3Stream) -> bool {
        let mut offset = 0;
        loop {
            offset = skip_payload(stream, offset);
            if stream.skip > 0 {
                break;
            }
            match frame::decode_frame(&stream.buf[offset..]) {
                Ok(Some((frame, consumed))) => {
                    offset += consumed;
                    if self.remote_settings.is_none() && !matches!(frame, Frame::Settings(_)) {
                        self.fail(H3Error::MissingSettings);
                        return false;
                    }
                    match frame {
                        Frame::Settings(settings) => {
                            if self.remote_settings.is_some() {
                                self.fail(H3Error::FrameUnexpected);
                                return false;
                            }
                            tracing::trace!(?settings, "peer SETTINGS");
                            self.remote_settings = Some(settings);
                            if self.state == H3State::Initializing {
                                self.state = H3State::Ready;
                            }
                        }
                        Frame::GoAway { stream_id } => {
                            self.state = H3State::Closing;
                            self.events.push_back(H3Event::GoAway { stream_id });
                        }
                        Frame::Data { .. } | Frame::Headers { .. } => {
                            self.fail(H3Error::FrameUnexpected);
                            return false;
                        }
                        Frame::Unknown { len, .. } => stream.skip = len,
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.fail(e);
                    return false;
                }
            }
        }
        stream.buf.drain(..offset);

        if stream.ended {
            self.fail(H3Error::ClosedCriticalStream);
            return false;
        }
        true
    }

    fn process_request(&mut self, stream_id: u64, stream: &mut H3Stream) {
        let mut offset = 0;
        let mut end_signalled = false;

        loop {
            offset = skip_payload(stream, offset);
            if stream.skip > 0 {
                break;
            }
            let frame = match frame::decode_frame(&stream.buf[offset..]) {
                Ok(Some((frame, consumed))) => {
                    offset += consumed;
                    frame
                }
                Ok(None) => break,
                Err(e) => {
                    self.fail(e);
                    return;
                }
            };
            let at_end = stream.ended && offset == stream.buf.len();

            match frame {
                Frame::Headers { encoded } => match qpack::decode(&encoded) {
                    Ok(headers) => {
                        stream.headers_received = true;
                        end_signalled |= at_end;
                        self.events.push_back(H3Event::HeadersReceived {
                            stream_id,
                            headers,
                            stream_ended: at_end,
                        });
                    }
                    Err(e) => {
                        self.fail(e);
                        return;
                    }
                },
                Frame::Data { payload } => {
                    if !stream.headers_received {
                        self.fail(H3Error::FrameUnexpected);
                        return;
                    }
                    end_signalled |= at_end;
                    self.events.push_back(H3Event::DataReceived {
                        stream_id,
                        data: payload,
                        stream_ended: at_end,
                    });
                }
                Frame::Settings(_) | Frame::GoAway { .. } => {
                    self.fail(H3Error::FrameUnexpected);
                    return;
                }
                Frame::Unknown { len, .. } => stream.skip = len,
            }
        }
        stream.buf.drain(..offset);

        if stream.ended && !end_signalled {
            if !stream.buf.is_empty() || stream.skip > 0 {
                // FIN in the middle of a frame.
                self.fail(H3Error::FrameError);
                return;
            }
            self.events.push_back(H3Event::DataReceived {
                stream_id,
                data: Vec::new(),
                stream_ended: true,
            });
        }
    }
}

/// Discard up to `stream.skip` bytes of unknown frame payload starting at
/// `offset`. Returns the offset past what was discarded.
fn skip_payload(stream: &mut H3Stream, offset: usize) -> usize {
    let available = stream.buf.len() - offset;
    let n = usize::try_from(stream.skip).map_or(available, |skip| skip.min(available));
    stream.skip -= n as u64;
    offset + n
}

/// Work out what a peer-initiated stream is from its first bytes. Returns the
/// kind and how many bytes of stream header to strip, or `None` when more
/// bytes are needed.
fn classify(stream_id: u64, buf: &[u8]) -> Option<(StreamKind, usize)> {
    let (first, n) = decode_varint(buf)?;
    if is_uni(stream_id) {
        let kind = match first {
            STREAM_TYPE_CONTROL => StreamKind::Control,
            STREAM_TYPE_WEBTRANSPORT => {
                let (session_id, m) = decode_varint(&buf[n..])?;
                return Some((StreamKind::WebTransport { session_id }, n + m));
            }
            STREAM_TYPE_QPACK_ENCODER | STREAM_TYPE_QPACK_DECODER => StreamKind::Ignored,
            // Unknown uni stream types MUST be ignored (RFC 9114 Section 6.2).
            _ => StreamKind::Ignored,
        };
        Some((kind, n))
    } else if first == WEBTRANSPORT_STREAM {
        let (session_id, m) = decode_varint(&buf[n..])?;
        Some((StreamKind::WebTransport { session_id }, n + m))
    } else {
        // An ordinary request stream; the varint was a frame type.
        Some((StreamKind::Request, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wtlink_quic::QuicConnId;

    #[derive(Default)]
    struct MockTransport {
        sent: Vec<(u64, Vec<u8>, bool)>,
        datagrams: Vec<Bytes>,
        opened: u64,
    }

    impl Transport for MockTransport {
        fn stream_send(
            &mut self,
            stream_id: u64,
            data: &[u8],
            fin: bool,
        ) -> Result<(), wtlink_quic::Error> {
            self.sent.push((stream_id, data.to_vec(), fin));
            Ok(())
        }

        fn open_uni(&mut self) -> Result<u64, wtlink_quic::Error> {
            self.opened += 1;
            Ok((self.opened - 1) * 4 + 3)
        }

        fn open_bi(&mut self) -> Result<u64, wtlink_quic::Error> {
            self.opened += 1;
            Ok((self.opened - 1) * 4 + 1)
        }

        fn send_datagram(&mut self, data: Bytes) -> Result<(), wtlink_quic::Error> {
            self.datagrams.push(data);
            Ok(())
        }

        fn close(&mut self, _code: u64, _reason: &[u8]) {}
    }

    fn data(stream_id: u64, bytes: &[u8], end_stream: bool) -> QuicEvent {
        QuicEvent::StreamDataReceived {
            conn: QuicConnId::from_index(0),
            stream_id,
            data: Bytes::copy_from_slice(bytes),
            end_stream,
        }
    }

    fn drain(h3: &mut H3Connection) -> Vec<H3Event> {
        std::iter::from_fn(|| h3.poll_event()).collect()
    }

    fn control_stream_bytes(settings: &Settings) -> Vec<u8> {
        let mut buf = vec![STREAM_TYPE_CONTROL as u8];
        Frame::Settings(settings.clone()).encode(&mut buf);
        buf
    }

    fn connect_request() -> Vec<u8> {
        let headers = [
            HeaderField::new(":method", "CONNECT"),
            HeaderField::new(":protocol", "webtransport"),
            HeaderField::new(":scheme", "https"),
            HeaderField::new(":authority", "localhost"),
            HeaderField::new(":path", "/"),
        ];
        let mut encoded = Vec::new();
        qpack::encode(&headers, &mut encoded);
        let mut buf = Vec::new();
        Frame::Headers { encoded }.encode(&mut buf);
        buf
    }

    #[test]
    fn initialize_sends_settings_on_control_stream() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let mut transport = MockTransport::default();
        h3.initialize(&mut transport).unwrap();
        h3.initialize(&mut transport).unwrap();

        assert_eq!(transport.sent.len(), 1);
        let (stream_id, bytes, fin) = &transport.sent[0];
        assert_eq!(*stream_id, 3);
        assert!(!fin);
        assert_eq!(bytes[0], 0x00);
        let (frame, _) = frame::decode_frame(&bytes[1..]).unwrap().unwrap();
        assert_eq!(frame, Frame::Settings(Settings::webtransport()));
    }

    #[test]
    fn peer_settings_accepted() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        h3.handle_event(&data(2, &control_stream_bytes(&Settings::webtransport()), false));
        assert!(drain(&mut h3).is_empty());
        assert!(h3.remote_settings().unwrap().enable_webtransport);
    }

    #[test]
    fn headers_split_across_every_byte() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let request = connect_request();
        for byte in &request {
            h3.handle_event(&data(0, std::slice::from_ref(byte), false));
        }

        let events = drain(&mut h3);
        assert_eq!(events.len(), 1);
        match &events[0] {
            H3Event::HeadersReceived {
                stream_id,
                headers,
                stream_ended,
            } => {
                assert_eq!(*stream_id, 0);
                assert!(!stream_ended);
                assert_eq!(headers[1], HeaderField::new(":protocol", "webtransport"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn headers_with_fin_end_the_stream() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        h3.handle_event(&data(4, &connect_request(), true));
        let events = drain(&mut h3);
        assert!(matches!(
            events.as_slice(),
            [H3Event::HeadersReceived {
                stream_id: 4,
                stream_ended: true,
                ..
            }]
        ));
    }

    #[test]
    fn lone_fin_on_request_stream() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        h3.handle_event(&data(0, &connect_request(), false));
        h3.handle_event(&data(0, &[], true));
        let events = drain(&mut h3);
        assert_eq!(events.len(), 2);
        match &events[1] {
            H3Event::DataReceived {
                stream_id: 0,
                data,
                stream_ended: true,
            } => assert!(data.is_empty()),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn data_frames_follow_headers() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let mut bytes = connect_request();
        Frame::Data {
            payload: b"body".to_vec(),
        }
        .encode(&mut bytes);
        h3.handle_event(&data(0, &bytes, true));

        let events = drain(&mut h3);
        assert!(matches!(
            &events[1],
            H3Event::DataReceived { data, stream_ended: true, .. } if data == b"body"
        ));
    }

    #[test]
    fn data_before_headers_is_an_error() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let mut bytes = Vec::new();
        Frame::Data {
            payload: b"x".to_vec(),
        }
        .encode(&mut bytes);
        h3.handle_event(&data(0, &bytes, false));
        assert!(matches!(
            drain(&mut h3).as_slice(),
            [H3Event::Error(H3Error::FrameUnexpected)]
        ));
    }

    #[test]
    fn truncated_frame_at_fin_is_an_error() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let request = connect_request();
        h3.handle_event(&data(0, &request[..request.len() - 1], true));
        assert!(matches!(
            drain(&mut h3).as_slice(),
            [H3Event::Error(H3Error::FrameError)]
        ));
    }

    #[test]
    fn unknown_frame_payload_is_not_buffered() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let mut control = control_stream_bytes(&Settings::webtransport());
        encode_varint(&mut control, 0x21);
        encode_varint(&mut control, 1 << 30);
        h3.handle_event(&data(2, &control, false));

        let chunk = vec![0xaa; 64 * 1024];
        for _ in 0..64 {
            h3.handle_event(&data(2, &chunk, false));
            assert!(h3.streams[&2].buf.is_empty());
        }
        assert!(drain(&mut h3).is_empty());
        assert_eq!(h3.streams[&2].skip, (1 << 30) - 64 * 64 * 1024);
    }

    #[test]
    fn frames_after_unknown_frame_are_decoded() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let mut request = Vec::new();
        encode_varint(&mut request, 0x21);
        encode_varint(&mut request, 5);
        request.extend_from_slice(b"ab");
        h3.handle_event(&data(0, &request, false));

        let mut rest = b"cde".to_vec();
        rest.extend_from_slice(&connect_request());
        h3.handle_event(&data(0, &rest, true));
        assert!(matches!(
            drain(&mut h3).as_slice(),
            [H3Event::HeadersReceived {
                stream_id: 0,
                stream_ended: true,
                ..
            }]
        ));
    }

    #[test]
    fn fin_inside_unknown_frame_is_an_error() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let mut request = connect_request();
        encode_varint(&mut request, 0x21);
        encode_varint(&mut request, 10);
        request.extend_from_slice(b"abc");
        h3.handle_event(&data(0, &request, true));
        assert!(matches!(
            drain(&mut h3).as_slice(),
            [
                H3Event::HeadersReceived {
                    stream_ended: false,
                    ..
                },
                H3Event::Error(H3Error::FrameError)
            ]
        ));
    }

    #[test]
    fn oversized_headers_frame_is_an_error() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let mut request = Vec::new();
        frame::encode_frame_header(&mut request, frame::FRAME_HEADERS, 2 << 20);
        h3.handle_event(&data(0, &request, false));
        assert!(matches!(
            drain(&mut h3).as_slice(),
            [H3Event::Error(H3Error::ExcessiveLoad)]
        ));
    }

    #[test]
    fn control_stream_must_start_with_settings() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let mut bytes = vec![STREAM_TYPE_CONTROL as u8];
        Frame::GoAway { stream_id: 0 }.encode(&mut bytes);
        h3.handle_event(&data(2, &bytes, false));
        let events = drain(&mut h3);
        match events.as_slice() {
            [H3Event::Error(err)] => assert_eq!(err.code(), 0x10a),
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn duplicate_settings_rejected() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let mut bytes = control_stream_bytes(&Settings::default());
        Frame::Settings(Settings::default()).encode(&mut bytes);
        h3.handle_event(&data(2, &bytes, false));
        assert!(matches!(
            drain(&mut h3).as_slice(),
            [H3Event::Error(H3Error::FrameUnexpected)]
        ));
    }

    #[test]
    fn data_on_control_stream_rejected() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let mut bytes = control_stream_bytes(&Settings::default());
        Frame::Data { payload: vec![] }.encode(&mut bytes);
        h3.handle_event(&data(2, &bytes, false));
        assert!(matches!(
            drain(&mut h3).as_slice(),
            [H3Event::Error(H3Error::FrameUnexpected)]
        ));
    }

    #[test]
    fn closing_control_stream_is_critical() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        h3.handle_event(&data(2, &control_stream_bytes(&Settings::default()), false));
        h3.handle_event(&data(2, &[], true));
        assert!(matches!(
            drain(&mut h3).as_slice(),
            [H3Event::Error(H3Error::ClosedCriticalStream)]
        ));

        // Once failed, later events are ignored.
        h3.handle_event(&data(0, &connect_request(), false));
        assert!(drain(&mut h3).is_empty());
    }

    #[test]
    fn resetting_control_stream_is_critical() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        h3.handle_event(&data(2, &control_stream_bytes(&Settings::default()), false));
        h3.handle_event(&QuicEvent::StreamReset {
            conn: QuicConnId::from_index(0),
            stream_id: 2,
            error_code: 0,
        });
        assert!(matches!(
            drain(&mut h3).as_slice(),
            [H3Event::Error(H3Error::ClosedCriticalStream)]
        ));
    }

    #[test]
    fn second_control_stream_rejected() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        h3.handle_event(&data(2, &control_stream_bytes(&Settings::default()), false));
        h3.handle_event(&data(6, &control_stream_bytes(&Settings::default()), false));
        match drain(&mut h3).as_slice() {
            [H3Event::Error(err)] => assert_eq!(err.code(), 0x103),
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn qpack_and_unknown_uni_streams_ignored() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        h3.handle_event(&data(6, &[STREAM_TYPE_QPACK_ENCODER as u8, 1, 2, 3], false));
        h3.handle_event(&data(10, &[STREAM_TYPE_QPACK_DECODER as u8], false));
        h3.handle_event(&data(14, &[0x21, 0xff, 0xff], true));
        assert!(drain(&mut h3).is_empty());
    }

    #[test]
    fn unidirectional_webtransport_stream() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        // Type 0x54 is a two-byte varint; split the header in the middle.
        h3.handle_event(&data(2, &[0x40], false));
        h3.handle_event(&data(2, &[0x54, 0x00, b'a', b'b'], false));
        h3.handle_event(&data(2, b"c", true));

        let events = drain(&mut h3);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            H3Event::WebTransportStreamDataReceived {
                stream_id: 2,
                session_id: 0,
                data,
                stream_ended: false,
            } if data == b"ab"
        ));
        assert!(matches!(
            &events[1],
            H3Event::WebTransportStreamDataReceived {
                data,
                stream_ended: true,
                ..
            } if data == b"c"
        ));
    }

    #[test]
    fn bidirectional_webtransport_stream() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        h3.handle_event(&data(8, &[0x40, 0x41, 0x04, b'h', b'i'], true));
        assert!(matches!(
            drain(&mut h3).as_slice(),
            [H3Event::WebTransportStreamDataReceived {
                stream_id: 8,
                session_id: 4,
                data,
                stream_ended: true,
            }] if data == b"hi"
        ));
    }

    #[test]
    fn webtransport_fin_without_payload() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        h3.handle_event(&data(2, &[0x40, 0x54, 0x00], false));
        assert!(drain(&mut h3).is_empty());
        h3.handle_event(&data(2, &[], true));
        assert!(matches!(
            drain(&mut h3).as_slice(),
            [H3Event::WebTransportStreamDataReceived { data, stream_ended: true, .. }] if data.is_empty()
        ));
    }

    #[test]
    fn datagram_carries_quarter_stream_id() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        h3.handle_event(&QuicEvent::DatagramReceived {
            conn: QuicConnId::from_index(0),
            data: Bytes::from_static(&[0x01, b'h', b'i']),
        });
        assert!(matches!(
            drain(&mut h3).as_slice(),
            [H3Event::DatagramReceived { stream_id: 4, data }] if data.as_ref() == b"hi"
        ));
    }

    #[test]
    fn empty_datagram_is_an_error() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        h3.handle_event(&QuicEvent::DatagramReceived {
            conn: QuicConnId::from_index(0),
            data: Bytes::new(),
        });
        match drain(&mut h3).as_slice() {
            [H3Event::Error(err)] => assert_eq!(err.code(), 0x33),
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn reset_discards_partial_stream() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let request = connect_request();
        h3.handle_event(&data(0, &request[..3], false));
        h3.handle_event(&QuicEvent::StreamReset {
            conn: QuicConnId::from_index(0),
            stream_id: 0,
            error_code: 0x10c,
        });
        h3.handle_event(&data(0, &request, false));
        assert!(matches!(
            drain(&mut h3).as_slice(),
            [H3Event::HeadersReceived { stream_id: 0, .. }]
        ));
    }

    #[test]
    fn webtransport_streams_are_created_with_header() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let mut transport = MockTransport::default();

        let uni = h3
            .create_webtransport_stream(&mut transport, 0, true)
            .unwrap();
        assert_eq!(uni, 3);
        assert_eq!(transport.sent[0], (3, vec![0x40, 0x54, 0x00], false));

        let bidi = h3
            .create_webtransport_stream(&mut transport, 4, false)
            .unwrap();
        assert_eq!(bidi, 5);
        assert_eq!(transport.sent[1], (5, vec![0x40, 0x41, 0x04], false));

        // The peer's reply on our bidi stream is session data, not a request.
        h3.handle_event(&data(5, b"ok", true));
        assert!(matches!(
            drain(&mut h3).as_slice(),
            [H3Event::WebTransportStreamDataReceived { stream_id: 5, session_id: 4, .. }]
        ));
    }

    #[test]
    fn responses_are_framed() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let mut transport = MockTransport::default();

        h3.send_headers(
            &mut transport,
            0,
            &[HeaderField::new(":status", "404")],
            true,
        )
        .unwrap();
        h3.send_data(&mut transport, 0, b"abc", false).unwrap();
        h3.send_stream_data(&mut transport, 2, b"raw", true).unwrap();

        // HEADERS(RIC 0, base 0, static index 27).
        assert_eq!(transport.sent[0], (0, vec![0x01, 0x03, 0x00, 0x00, 0xdb], true));
        assert_eq!(transport.sent[1], (0, vec![0x00, 0x03, b'a', b'b', b'c'], false));
        assert_eq!(transport.sent[2], (2, b"raw".to_vec(), true));
    }

    #[test]
    fn datagrams_are_prefixed_with_quarter_stream_id() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let mut transport = MockTransport::default();
        h3.send_datagram(&mut transport, 8, b"5").unwrap();
        assert_eq!(transport.datagrams, vec![Bytes::from_static(&[0x02, b'5'])]);
    }

    #[test]
    fn goaway_needs_control_stream() {
        let mut h3 = H3Connection::new(Settings::webtransport());
        let mut transport = MockTransport::default();
        assert!(h3.send_goaway(&mut transport, 0).is_err());
        h3.initialize(&mut transport).unwrap();
        h3.send_goaway(&mut transport, 4).unwrap();
        assert_eq!(transport.sent[1], (3, vec![0x07, 0x01, 0x04], false));
    }
}
