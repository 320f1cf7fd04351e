//! QPACK field compression, static table only (RFC 9204).
//!
//! The local SETTINGS advertise a dynamic table capacity of 0, so peers may
//! only reference the 99-entry static table and send literals. No encoder or
//! decoder stream instructions are ever needed.

use crate::error::H3Error;
use crate::huffman;

/// A single header name-value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

// ── Prefix integers (RFC 9204 Section 4.1.1) ────────────────────────
//
// Not QUIC varints: the low `prefix_bits` of the first byte hold the value,
// or all ones followed by 7-bit continuation groups when it does not fit.

fn encode_prefix_int(buf: &mut Vec<u8>, value: u64, prefix_bits: u8, pattern: u8) {
    let max = (1u64 << prefix_bits) - 1;
    if value < max {
        buf.push(pattern | value as u8);
        return;
    }
    buf.push(pattern | max as u8);
    let mut rest = value - max;
    while rest >= 0x80 {
        buf.push(0x80 | (rest & 0x7f) as u8);
        rest >>= 7;
    }
    buf.push(rest as u8);
}

fn decode_prefix_int(buf: &[u8], prefix_bits: u8) -> Option<(u64, usize)> {
    let max = (1u64 << prefix_bits) - 1;
    let value = u64::from(*buf.first()?) & max;
    if value < max {
        return Some((value, 1));
    }
    let mut value = max;
    for (i, &b) in buf[1..].iter().enumerate() {
        // Ten continuation bytes already exceed 64 bits.
        if i >= 9 {
            return None;
        }
        value = value.checked_add(u64::from(b & 0x7f) << (7 * i))?;
        if b & 0x80 == 0 {
            return Some((value, i + 2));
        }
    }
    None
}

// ── Static table (RFC 9204 Appendix A) ──────────────────────────────

#[rustfmt::skip]
static STATIC_TABLE: [(&[u8], &[u8]); 99] = [
    (b":authority", b""), // 0
    (b":path", b"/"),
    (b"age", b"0"),
    (b"content-disposition", b""),
    (b"content-length", b"0"),
    (b"cookie", b""),
    (b"date", b""),
    (b"etag", b""),
    (b"if-modified-since", b""),
    (b"if-none-match", b""),
    (b"last-modified", b""), // 10
    (b"link", b""),
    (b"location", b""),
    (b"referer", b""),
    (b"set-cookie", b""),
    (b":method", b"CONNECT"),
    (b":method", b"DELETE"),
    (b":method", b"GET"),
    (b":method", b"HEAD"),
    (b":method", b"OPTIONS"),
    (b":method", b"POST"), // 20
    (b":method", b"PUT"),
    (b":scheme", b"http"),
    (b":scheme", b"https"),
    (b":status", b"103"),
    (b":status", b"200"),
    (b":status", b"304"),
    (b":status", b"404"),
    (b":status", b"503"),
    (b"accept", b"*/*"),
    (b"accept", b"application/dns-message"), // 30
    (b"accept-encoding", b"gzip, deflate, br"),
    (b"accept-ranges", b"bytes"),
    (b"access-control-allow-headers", b"cache-control"),
    (b"access-control-allow-headers", b"content-type"),
    (b"access-control-allow-origin", b"*"),
    (b"cache-control", b"max-age=0"),
    (b"cache-control", b"max-age=2592000"),
    (b"cache-control", b"max-age=604800"),
    (b"cache-control", b"no-cache"),
    (b"cache-control", b"no-store"), // 40
    (b"cache-control", b"public, max-age=31536000"),
    (b"content-encoding", b"br"),
    (b"content-encoding", b"gzip"),
    (b"content-type", b"application/dns-message"),
    (b"content-type", b"application/javascript"),
    (b"content-type", b"application/json"),
    (b"content-type", b"application/x-www-form-urlencoded"),
    (b"content-type", b"image/gif"),
    (b"content-type", b"image/jpeg"),
    (b"content-type", b"image/png"), // 50
    (b"content-type", b"text/css"),
    (b"content-type", b"text/html; charset=utf-8"),
    (b"content-type", b"text/plain"),
    (b"content-type", b"text/plain;charset=utf-8"),
    (b"range", b"bytes=0-"),
    (b"strict-transport-security", b"max-age=31536000"),
    (b"strict-transport-security", b"max-age=31536000; includesubdomains"),
    (b"strict-transport-security", b"max-age=31536000; includesubdomains; preload"),
    (b"vary", b"accept-encoding"),
    (b"vary", b"origin"), // 60
    (b"x-content-type-options", b"nosniff"),
    (b"x-xss-protection", b"1; mode=block"),
    (b":status", b"100"),
    (b":status", b"204"),
    (b":status", b"206"),
    (b":status", b"302"),
    (b":status", b"400"),
    (b":status", b"403"),
    (b":status", b"421"),
    (b":status", b"425"), // 70
    (b":status", b"500"),
    (b"accept-language", b""),
    (b"access-control-allow-credentials", b"FALSE"),
    (b"access-control-allow-credentials", b"TRUE"),
    (b"access-control-allow-headers", b"*"),
    (b"access-control-allow-methods", b"get"),
    (b"access-control-allow-methods", b"get, post, options"),
    (b"access-control-allow-methods", b"options"),
    (b"access-control-expose-headers", b"content-length"),
    (b"access-control-request-headers", b"content-type"), // 80
    (b"access-control-request-method", b"get"),
    (b"access-control-request-method", b"post"),
    (b"alt-svc", b"clear"),
    (b"authorization", b""),
    (b"content-security-policy", b"script-src 'none'; object-src 'none'; base-uri 'none'"),
    (b"early-data", b"1"),
    (b"expect-ct", b""),
    (b"forwarded", b""),
    (b"if-range", b""),
    (b"origin", b""), // 90
    (b"purpose", b"prefetch"),
    (b"server", b""),
    (b"timing-allow-origin", b"*"),
    (b"upgrade-insecure-requests", b"1"),
    (b"user-agent", b""),
    (b"x-forwarded-for", b""),
    (b"x-frame-options", b"deny"),
    (b"x-frame-options", b"sameorigin"),
];

fn find_static(name: &[u8], value: &[u8]) -> (Option<usize>, Option<usize>) {
    let mut name_match = None;
    for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
        if *n == name {
            if *v == value {
                return (Some(i), Some(i));
            }
            name_match.get_or_insert(i);
        }
    }
    (None, name_match)
}

// ── Encoder ─────────────────────────────────────────────────────────

/// Write a string literal whose length prefix has `prefix_bits` bits. The
/// Huffman flag is the bit just above the prefix; Huffman is used only when
/// it is strictly shorter.
fn encode_string(buf: &mut Vec<u8>, data: &[u8], prefix_bits: u8, pattern: u8) {
    let huffman_len = huffman::encoded_len(data);
    if huffman_len < data.len() {
        encode_prefix_int(buf, huffman_len as u64, prefix_bits, pattern | 1 << prefix_bits);
        huffman::encode(data, buf);
    } else {
        encode_prefix_int(buf, data.len() as u64, prefix_bits, pattern);
        buf.extend_from_slice(data);
    }
}

/// Encode a header list as a QPACK field section that references only the
/// static table.
pub fn encode(headers: &[HeaderField], buf: &mut Vec<u8>) {
    // Required Insert Count = 0, Sign = 0, Delta Base = 0.
    buf.extend_from_slice(&[0x00, 0x00]);

    for header in headers {
        match find_static(&header.name, &header.value) {
            (Some(index), _) => {
                // Indexed field line, static (Section 4.5.2): 11xxxxxx.
                encode_prefix_int(buf, index as u64, 6, 0xc0);
            }
            (None, Some(name_index)) => {
                // Literal with static name reference (Section 4.5.4): 0101xxxx.
                encode_prefix_int(buf, name_index as u64, 4, 0x50);
                encode_string(buf, &header.value, 7, 0x00);
            }
            (None, None) => {
                // Literal with literal name (Section 4.5.6): 0010Hxxx.
                encode_string(buf, &header.name, 3, 0x20);
                encode_string(buf, &header.value, 7, 0x00);
            }
        }
    }
}

// ── Decoder ─────────────────────────────────────────────────────────

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn int(&mut self, prefix_bits: u8) -> Result<u64, H3Error> {
        let (value, n) = decode_prefix_int(&self.buf[self.pos..], prefix_bits)
            .ok_or(H3Error::QpackDecompressionFailed)?;
        self.pos += n;
        Ok(value)
    }

    fn string(&mut self, prefix_bits: u8) -> Result<Vec<u8>, H3Error> {
        let huffman_coded = self
            .peek()
            .is_some_and(|first| first & (1 << prefix_bits) != 0);
        let len = usize::try_from(self.int(prefix_bits)?)
            .map_err(|_| H3Error::QpackDecompressionFailed)?;
        let end = self
            .pos
            .checked_add(len)
            .ok_or(H3Error::QpackDecompressionFailed)?;
        let raw = self
            .buf
            .get(self.pos..end)
            .ok_or(H3Error::QpackDecompressionFailed)?;
        self.pos = end;
        if huffman_coded {
            huffman::decode(raw)
        } else {
            Ok(raw.to_vec())
        }
    }

    fn static_entry(&mut self, prefix_bits: u8) -> Result<&'static (&'static [u8], &'static [u8]), H3Error> {
        let index = self.int(prefix_bits)?;
        usize::try_from(index)
            .ok()
            .and_then(|i| STATIC_TABLE.get(i))
            .ok_or(H3Error::QpackDecompressionFailed)
    }
}

/// Decode a QPACK field section.
///
/// Any reference to the dynamic table fails, since the local decoder
/// advertised a capacity of 0.
pub fn decode(buf: &[u8]) -> Result<Vec<HeaderField>, H3Error> {
    let mut r = Reader::new(buf);

    if r.int(8)? != 0 {
        return Err(H3Error::QpackDecompressionFailed);
    }
    // Delta Base is meaningless without dynamic references.
    r.int(7)?;

    let mut headers = Vec::new();
    while let Some(first) = r.peek() {
        let field = if first & 0x80 != 0 {
            // Indexed field line: 1Txxxxxx.
            if first & 0x40 == 0 {
                return Err(H3Error::QpackDecompressionFailed);
            }
            let (name, value) = r.static_entry(6)?;
            HeaderField::new(*name, *value)
        } else if first & 0x40 != 0 {
            // Literal with name reference: 01NTxxxx.
            if first & 0x10 == 0 {
                return Err(H3Error::QpackDecompressionFailed);
            }
            let (name, _) = r.static_entry(4)?;
            HeaderField::new(*name, r.string(7)?)
        } else if first & 0x20 != 0 {
            // Literal with literal name: 001NHxxx.
            let name = r.string(3)?;
            HeaderField::new(name, r.string(7)?)
        } else {
            // Post-base forms (0001xxxx, 0000xxxx) always use the dynamic table.
            return Err(H3Error::QpackDecompressionFailed);
        };
        headers.push(field);
    }

    Ok(headers)
}
