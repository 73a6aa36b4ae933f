//! Media datagram format.
//!
//! ```text
//! "<seq>#<send_unix_time>#<width>x<height>#<fps>#" <compressed image bytes>
//! ```
//!
//! No length prefix: the header ends at the fourth `#`, everything after it
//! is payload. `END_RECEPTION` on its own is the local stop sentinel.

use bytes::{BufMut, Bytes, BytesMut};
use vidlink_core::{MediaError, Resolution};

pub const FIELD_SEPARATOR: u8 = b'#';
const HEADER_FIELDS: usize = 4;

/// Sentinel datagram that makes the local ingest loop exit.
pub const END_RECEPTION: &[u8] = b"END_RECEPTION";

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaHeader {
    pub seq: u64,
    /// Sender wall clock, Unix seconds.
    pub sent_at: f64,
    pub resolution: Resolution,
    pub fps: u32,
}

impl MediaHeader {
    pub fn encode(&self, payload: &[u8]) -> Bytes {
        let header = format!("{}#{}#{}#{}#", self.seq, self.sent_at, self.resolution, self.fps);
        let mut out = BytesMut::with_capacity(header.len() + payload.len());
        out.put_slice(header.as_bytes());
        out.put_slice(payload);
        out.freeze()
    }

    /// Split a datagram into header and payload.
    pub fn parse(datagram: &[u8]) -> Result<(Self, &[u8]), MediaError> {
        let malformed = |reason: String| MediaError::MalformedHeader { reason };

        let mut fields: [&[u8]; HEADER_FIELDS] = [&[]; HEADER_FIELDS];
        let mut rest = datagram;
        for field in fields.iter_mut() {
            let end = rest
                .iter()
                .position(|b| *b == FIELD_SEPARATOR)
                .ok_or_else(|| malformed(format!("expected {HEADER_FIELDS} '#'-terminated fields")))?;
            *field = &rest[..end];
            rest = &rest[end + 1..];
        }

        fn text(raw: &[u8]) -> Result<&str, MediaError> {
            std::str::from_utf8(raw)
                .map_err(|_| MediaError::MalformedHeader { reason: "header is not ASCII".to_owned() })
        }
        let seq_s = text(fields[0])?;
        let ts_s = text(fields[1])?;
        let res_s = text(fields[2])?;
        let fps_s = text(fields[3])?;

        let header = Self {
            seq: seq_s.parse().map_err(|_| malformed(format!("bad sequence number {seq_s:?}")))?,
            sent_at: ts_s.parse().map_err(|_| malformed(format!("bad timestamp {ts_s:?}")))?,
            resolution: res_s.parse().map_err(malformed)?,
            fps: fps_s.parse().map_err(|_| malformed(format!("bad fps {fps_s:?}")))?,
        };
        Ok((header, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_text_layout() {
        let header = MediaHeader { seq: 42, sent_at: 1589000000.5, resolution: Resolution::QVGA, fps: 20 };
        let datagram = header.encode(b"JPEG");
        assert_eq!(&datagram[..], b"42#1589000000.5#320x240#20#JPEG");
    }

    #[test]
    fn payload_may_contain_separator() {
        let header = MediaHeader { seq: 7, sent_at: 10.25, resolution: Resolution::VGA, fps: 30 };
        let datagram = header.encode(b"a#b##c");
        let (parsed, payload) = MediaHeader::parse(&datagram).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(payload, b"a#b##c");
    }

    #[test]
    fn rejects_broken_headers() {
        for bad in [&b"1#2#640x480"[..], b"x#2#640x480#30#", b"1#now#640x480#30#", b"1#2#640*480#30#", END_RECEPTION] {
            assert!(matches!(MediaHeader::parse(bad), Err(MediaError::MalformedHeader { .. })));
        }
    }

    #[test]
    fn non_utf8_header_field_is_malformed() {
        let datagram = b"1#\xff\xfe#640x480#30#payload";
        match MediaHeader::parse(datagram) {
            Err(MediaError::MalformedHeader { reason }) => assert!(reason.contains("ASCII")),
            other => panic!("expected MalformedHeader, got {other:?}"),
        }
    }
}
