use std::sync::Mutex;

use bytes::Bytes;
use wtlink_h3::{Frame, HeaderField, Settings, qpack};
use wtlink_quic::{QuicConnId, QuicEvent, Transport};

use crate::ipc::{ControlMessage, HostNotifier, IpcError};

/// Records everything written through it. Server uni stream IDs are
/// 3, 7, 11 and so on.
#[derive(Default)]
pub(crate) struct MockTransport {
    pub sent: Vec<(u64, Vec<u8>, bool)>,
    pub datagrams: Vec<Bytes>,
    pub closed: Option<(u64, Vec<u8>)>,
    /// Fail stream opens and datagram sends with `StreamLimit`.
    pub fail_writes: bool,
    opened_uni: u64,
    opened_bi: u64,
}

impl MockTransport {
    /// Everything written to `stream_id`, concatenated, and whether it was finished.
    pub fn stream(&self, stream_id: u64) -> (Vec<u8>, bool) {
        let mut out = Vec::new();
        let mut fin = false;
        for (id, data, f) in &self.sent {
            if *id == stream_id {
                out.extend_from_slice(data);
                fin |= *f;
            }
        }
        (out, fin)
    }
}

impl Transport for MockTransport {
    fn stream_send(&mut self, stream_id: u64, data: &[u8], fin: bool) -> Result<(), wtlink_quic::Error> {
        self.sent.push((stream_id, data.to_vec(), fin));
        Ok(())
    }

    fn open_uni(&mut self) -> Result<u64, wtlink_quic::Error> {
        if self.fail_writes {
            return Err(wtlink_quic::Error::StreamLimit);
        }
        self.opened_uni += 1;
        Ok((self.opened_uni - 1) * 4 + 3)
    }

    fn open_bi(&mut self) -> Result<u64, wtlink_quic::Error> {
        self.opened_bi += 1;
        Ok((self.opened_bi - 1) * 4 + 1)
    }

    fn send_datagram(&mut self, data: Bytes) -> Result<(), wtlink_quic::Error> {
        if self.fail_writes {
            return Err(wtlink_quic::Error::StreamLimit);
        }
        self.datagrams.push(data);
        Ok(())
    }

    fn close(&mut self, code: u64, reason: &[u8]) {
        self.closed = Some((code, reason.to_vec()));
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub messages: Mutex<Vec<ControlMessage>>,
}

impl RecordingNotifier {
    pub fn take(&self) -> Vec<ControlMessage> {
        std::mem::take(&mut *self.messages.lock().unwrap())
    }
}

impl HostNotifier for RecordingNotifier {
    fn notify(&self, msg: &ControlMessage) -> Result<(), IpcError> {
        self.messages.lock().unwrap().push(msg.clone());
        Ok(())
    }
}

pub(crate) fn conn() -> QuicConnId {
    QuicConnId::from_index(0)
}

pub(crate) fn stream_data(stream_id: u64, bytes: &[u8], end_stream: bool) -> QuicEvent {
    QuicEvent::StreamDataReceived {
        conn: conn(),
        stream_id,
        data: Bytes::copy_from_slice(bytes),
        end_stream,
    }
}

/// A client control stream carrying WebTransport SETTINGS.
pub(crate) fn client_control_stream() -> Vec<u8> {
    let mut buf = vec![0x00];
    Frame::Settings(Settings::webtransport()).encode(&mut buf);
    buf
}

/// A HEADERS frame carrying `headers`.
pub(crate) fn request(headers: &[(&str, &str)]) -> Vec<u8> {
    let fields: Vec<_> = headers
        .iter()
        .map(|(name, value)| HeaderField::new(*name, *value))
        .collect();
    let mut encoded = Vec::new();
    qpack::encode(&fields, &mut encoded);
    let mut buf = Vec::new();
    Frame::Headers { encoded }.encode(&mut buf);
    buf
}

pub(crate) fn connect_request(path: &str) -> Vec<u8> {
    request(&[
        (":method", "CONNECT"),
        (":protocol", "webtransport"),
        (":scheme", "https"),
        (":authority", "localhost"),
        (":path", path),
    ])
}

/// Decode the HEADERS frame at the start of `bytes`.
pub(crate) fn response_headers(bytes: &[u8]) -> Vec<(String, String)> {
    let (frame, _) = wtlink_h3::frame::decode_frame(bytes).unwrap().unwrap();
    let Frame::Headers { encoded } = frame else {
        panic!("expected HEADERS, got {frame:?}");
    };
    qpack::decode(&encoded)
        .unwrap()
        .into_iter()
        .map(|f| {
            (
                String::from_utf8(f.name).unwrap(),
                String::from_utf8(f.value).unwrap(),
            )
        })
        .collect()
}
