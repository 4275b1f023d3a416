use super::{ContentType, Version, MAX_RECORD_LEN, RECORD_HEADER_LEN};

/// One complete record pulled off the reassembled stream. `content_type`
/// is `None` for a type byte this crate does not model; such records are
/// still framed correctly and the dispatch layer decides what to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub content_type: Option<ContentType>,
    pub version: Version,
    pub body: Vec<u8>,
}

/// Outcome of one extraction attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Extract {
    /// A whole record was removed from the head of the buffer.
    Record(Record),
    /// Not enough bytes for a header or for the declared body yet.
    NeedMore,
    /// The header failed validation; the offending bytes are returned for
    /// logging and the buffer stays halted until [`RecordBuffer::reset`].
    Invalid(Vec<u8>),
}

/// Per-direction accumulation buffer for the record framer.
///
/// Bytes arrive in stream order from the reassembler; whole records are
/// split off the head. After a malformed header nothing further is
/// extracted: the stream offset is lost, so resynchronizing would only
/// produce garbage records.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    buf: Vec<u8>,
    halted: bool,
}

impl RecordBuffer {
    pub fn new() -> Self {
        RecordBuffer::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.halted = false;
    }

    /// Try to split one record off the head.
    ///
    /// Header layout: content type (1), version (2), body length (2),
    /// body length capped at 16384. Only version and length are
    /// validated; an unmodeled content type still frames as a record.
    pub fn try_extract(&mut self) -> Extract {
        if self.halted || self.buf.len() < RECORD_HEADER_LEN {
            return Extract::NeedMore;
        }

        let content_type = ContentType::from_u8(self.buf[0]);
        let raw_version = u16::from_be_bytes([self.buf[1], self.buf[2]]);
        let length = u16::from_be_bytes([self.buf[3], self.buf[4]]) as usize;

        let Some(version) = Version::from_u16(raw_version) else {
            self.halted = true;
            return Extract::Invalid(self.buf[..RECORD_HEADER_LEN].to_vec());
        };
        if length > MAX_RECORD_LEN {
            self.halted = true;
            return Extract::Invalid(self.buf[..RECORD_HEADER_LEN].to_vec());
        }

        let total = RECORD_HEADER_LEN + length;
        if self.buf.len() < total {
            return Extract::NeedMore;
        }

        let body = self.buf[RECORD_HEADER_LEN..total].to_vec();
        self.buf.drain(..total);

        Extract::Record(Record {
            content_type,
            version,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_record(content_type: u8, version: u16, body: &[u8]) -> Vec<u8> {
        let mut out = vec![content_type];
        out.extend_from_slice(&version.to_be_bytes());
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn extract_all(buf: &mut RecordBuffer) -> Vec<Record> {
        let mut records = Vec::new();
        while let Extract::Record(r) = buf.try_extract() {
            records.push(r);
        }
        records
    }

    #[test]
    fn extracts_whole_records_from_the_head() {
        let mut buf = RecordBuffer::new();
        buf.extend(&raw_record(22, 0x0303, &[0x01, 0x02]));
        buf.extend(&raw_record(20, 0x0303, &[0x01]));

        let records = extract_all(&mut buf);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content_type, Some(ContentType::Handshake));
        assert_eq!(records[0].version, Version::Tls12);
        assert_eq!(records[0].body, vec![0x01, 0x02]);
        assert_eq!(records[1].content_type, Some(ContentType::ChangeCipherSpec));
        assert_eq!(buf.try_extract(), Extract::NeedMore);
    }

    #[test]
    fn waits_for_a_complete_body() {
        let mut buf = RecordBuffer::new();
        let record = raw_record(23, 0x0303, &[0u8; 10]);

        // feed byte by byte; nothing comes out until the last one
        for &byte in &record[..record.len() - 1] {
            buf.extend(&[byte]);
            assert_eq!(buf.try_extract(), Extract::NeedMore);
        }
        buf.extend(&[record[record.len() - 1]]);
        assert!(matches!(buf.try_extract(), Extract::Record(_)));
    }

    #[test]
    fn replaying_the_stream_yields_the_same_records_twice() {
        let stream: Vec<u8> = [
            raw_record(22, 0x0303, b"hello"),
            raw_record(21, 0x0302, &[2, 40]),
            raw_record(23, 0x0303, &[0u8; 100]),
        ]
        .concat();

        let mut buf = RecordBuffer::new();
        buf.extend(&stream);
        buf.extend(&stream);

        let records = extract_all(&mut buf);
        assert_eq!(records.len(), 6);
        assert_eq!(records[..3], records[3..]);
    }

    #[test]
    fn bad_version_halts_until_reset() {
        let mut buf = RecordBuffer::new();
        buf.extend(&raw_record(22, 0x1234, b"x"));
        buf.extend(&raw_record(22, 0x0303, b"y"));

        match buf.try_extract() {
            Extract::Invalid(header) => assert_eq!(header, vec![22, 0x12, 0x34, 0x00, 0x01]),
            other => panic!("expected Invalid, got {other:?}"),
        }
        assert!(buf.is_halted());
        // valid bytes behind the bad header stay stuck
        assert_eq!(buf.try_extract(), Extract::NeedMore);

        buf.reset();
        buf.extend(&raw_record(22, 0x0303, b"y"));
        assert!(matches!(buf.try_extract(), Extract::Record(_)));
    }

    #[test]
    fn oversized_length_is_invalid() {
        let mut buf = RecordBuffer::new();
        let mut header = vec![22, 0x03, 0x03];
        header.extend_from_slice(&(MAX_RECORD_LEN as u16 + 1).to_be_bytes());
        buf.extend(&header);

        assert!(matches!(buf.try_extract(), Extract::Invalid(_)));
    }

    #[test]
    fn unknown_content_type_still_frames() {
        let mut buf = RecordBuffer::new();
        buf.extend(&raw_record(99, 0x0303, b"z"));
        buf.extend(&raw_record(22, 0x0303, b"next"));

        // the unmodeled record comes out whole and parsing continues
        match buf.try_extract() {
            Extract::Record(r) => {
                assert_eq!(r.content_type, None);
                assert_eq!(r.body, b"z".to_vec());
            }
            other => panic!("expected Record, got {other:?}"),
        }
        assert!(!buf.is_halted());
        match buf.try_extract() {
            Extract::Record(r) => assert_eq!(r.content_type, Some(ContentType::Handshake)),
            other => panic!("expected Record, got {other:?}"),
        }
    }

    #[test]
    fn max_length_body_is_accepted() {
        let mut buf = RecordBuffer::new();
        buf.extend(&raw_record(23, 0x0304, &vec![0u8; MAX_RECORD_LEN]));
        match buf.try_extract() {
            Extract::Record(r) => assert_eq!(r.body.len(), MAX_RECORD_LEN),
            other => panic!("expected Record, got {other:?}"),
        }
    }
}
