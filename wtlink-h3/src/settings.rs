use crate::error::H3Error;
use crate::frame::{decode_varint, encode_varint, varint_len};

const SETTINGS_QPACK_MAX_TABLE_CAPACITY: u64 = 0x01;
const SETTINGS_MAX_FIELD_SECTION_SIZE: u64 = 0x06;
const SETTINGS_QPACK_BLOCKED_STREAMS: u64 = 0x07;
const SETTINGS_ENABLE_CONNECT_PROTOCOL: u64 = 0x08;
/// RFC 9297.
const SETTINGS_H3_DATAGRAM: u64 = 0x33;
/// draft-ietf-masque-h3-datagram-04, still sent by deployed browsers.
const SETTINGS_H3_DATAGRAM_DRAFT04: u64 = 0xff_d277;
const SETTINGS_ENABLE_WEBTRANSPORT: u64 = 0x2b60_3742;

/// HTTP/3 SETTINGS parameters (RFC 9114 Section 7.2.4.1) plus the
/// extensions WebTransport over HTTP/3 negotiates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// SETTINGS_QPACK_MAX_TABLE_CAPACITY. 0 disables the dynamic table.
    pub qpack_max_table_capacity: u64,
    /// SETTINGS_MAX_FIELD_SECTION_SIZE. `None` means unlimited.
    pub max_field_section_size: Option<u64>,
    /// SETTINGS_QPACK_BLOCKED_STREAMS.
    pub qpack_blocked_streams: u64,
    /// SETTINGS_ENABLE_CONNECT_PROTOCOL (RFC 9220), needed for `:protocol`.
    pub enable_connect_protocol: bool,
    /// SETTINGS_H3_DATAGRAM, sent under both the final and the draft id.
    pub h3_datagram: bool,
    /// SETTINGS_ENABLE_WEBTRANSPORT.
    pub enable_webtransport: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            qpack_max_table_capacity: 0,
            max_field_section_size: None,
            qpack_blocked_streams: 0,
            enable_connect_protocol: false,
            h3_datagram: false,
            enable_webtransport: false,
        }
    }
}

impl Settings {
    /// Settings a WebTransport server advertises: extended CONNECT,
    /// HTTP datagrams and WebTransport enabled, no QPACK dynamic table.
    pub fn webtransport() -> Self {
        Self {
            enable_connect_protocol: true,
            h3_datagram: true,
            enable_webtransport: true,
            ..Self::default()
        }
    }

    fn pairs(&self) -> Vec<(u64, u64)> {
        let mut pairs = vec![
            (
                SETTINGS_QPACK_MAX_TABLE_CAPACITY,
                self.qpack_max_table_capacity,
            ),
            (SETTINGS_QPACK_BLOCKED_STREAMS, self.qpack_blocked_streams),
        ];
        if let Some(size) = self.max_field_section_size {
            pairs.push((SETTINGS_MAX_FIELD_SECTION_SIZE, size));
        }
        if self.enable_connect_protocol {
            pairs.push((SETTINGS_ENABLE_CONNECT_PROTOCOL, 1));
        }
        if self.h3_datagram {
            pairs.push((SETTINGS_H3_DATAGRAM, 1));
            pairs.push((SETTINGS_H3_DATAGRAM_DRAFT04, 1));
        }
        if self.enable_webtransport {
            pairs.push((SETTINGS_ENABLE_WEBTRANSPORT, 1));
        }
        pairs
    }

    /// Encode settings as a sequence of (identifier, value) varint pairs.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        for (id, value) in self.pairs() {
            encode_varint(buf, id);
            encode_varint(buf, value);
        }
    }

    /// Byte length when encoded.
    pub fn encoded_len(&self) -> usize {
        self.pairs()
            .into_iter()
            .map(|(id, value)| varint_len(id) + varint_len(value))
            .sum()
    }

    /// Decode the payload of a SETTINGS frame.
    ///
    /// Identifiers reserved from HTTP/2 are rejected; unknown identifiers are
    /// ignored (RFC 9114 Section 7.2.4).
    pub fn decode(mut buf: &[u8]) -> Result<Self, H3Error> {
        let mut settings = Settings::default();
        while !buf.is_empty() {
            let (id, n) = decode_varint(buf).ok_or(H3Error::FrameError)?;
            buf = &buf[n..];
            let (value, n) = decode_varint(buf).ok_or(H3Error::FrameError)?;
            buf = &buf[n..];
            match id {
                SETTINGS_QPACK_MAX_TABLE_CAPACITY => settings.qpack_max_table_capacity = value,
                SETTINGS_MAX_FIELD_SECTION_SIZE => settings.max_field_section_size = Some(value),
                SETTINGS_QPACK_BLOCKED_STREAMS => settings.qpack_blocked_streams = value,
                SETTINGS_ENABLE_CONNECT_PROTOCOL => settings.enable_connect_protocol = value == 1,
                SETTINGS_H3_DATAGRAM | SETTINGS_H3_DATAGRAM_DRAFT04 => {
                    settings.h3_datagram = value == 1
                }
                SETTINGS_ENABLE_WEBTRANSPORT => settings.enable_webtransport = value == 1,
                0x02..=0x05 => return Err(H3Error::Settings),
                _ => {}
            }
        }
        Ok(settings)
    }
}
