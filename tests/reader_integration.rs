//! Record reader tests: arbitrary read chunking must never change the
//! decoded record sequence, and partial bytes must survive would-block.

use std::io::{self, Read};

use fcgid::reader::{ReadStatus, RecordReader};
use fcgid::record::{ProtocolError, Record, RecordHeader, RecordType};

/// Yields at most `chunk` bytes per read; would-block once drained.
struct ChunkedSource {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl Read for ChunkedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.data.len() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.chunk).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Yields one byte per read with a would-block between every byte, so
/// every `fill` call sees at most one new byte.
struct StutteringSource {
    data: Vec<u8>,
    pos: usize,
    ready: bool,
}

impl Read for StutteringSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.ready || self.pos == self.data.len() {
            self.ready = true;
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.ready = false;
        buf[0] = self.data[self.pos];
        self.pos += 1;
        Ok(1)
    }
}

/// One read error, after which the source is unusable.
struct FailingSource;

impl Read for FailingSource {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::ErrorKind::ConnectionReset.into())
    }
}

fn wire_record(rtype: RecordType, request_id: u16, content: &[u8], padding: u8) -> Vec<u8> {
    let mut header = RecordHeader::for_content(rtype, request_id, content.len() as u16);
    header.padding_len = padding;
    let mut wire = header.encode().to_vec();
    wire.extend_from_slice(content);
    wire.extend(std::iter::repeat_n(0u8, padding as usize));
    wire
}

fn sample_records() -> (Vec<u8>, Vec<(RecordType, u16, Vec<u8>)>) {
    let expected = vec![
        (
            RecordType::BeginRequest,
            1,
            vec![0, 1, 0, 0, 0, 0, 0, 0],
        ),
        (RecordType::Params, 1, b"\x0e\x03REQUEST_METHODGET".to_vec()),
        (RecordType::Params, 1, Vec::new()),
        (RecordType::Stdin, 1, b"hello".to_vec()),
        (RecordType::Stdin, 1, Vec::new()),
    ];
    let mut wire = Vec::new();
    for (i, (rtype, request_id, content)) in expected.iter().enumerate() {
        // Exercise padding on some records; it must be discarded.
        let padding = if i % 2 == 0 { 3 } else { 0 };
        wire.extend_from_slice(&wire_record(*rtype, *request_id, content, padding));
    }
    (wire, expected)
}

fn assert_matches_expected(records: &[Record], expected: &[(RecordType, u16, Vec<u8>)]) {
    assert_eq!(records.len(), expected.len());
    for (record, (rtype, request_id, content)) in records.iter().zip(expected) {
        assert_eq!(record.header.rtype, *rtype);
        assert_eq!(record.header.request_id, *request_id);
        assert_eq!(&record.content, content);
    }
}

#[test]
fn any_chunking_yields_the_same_records() {
    let (wire, expected) = sample_records();

    for chunk in [1, 2, 3, 5, 7, 8, 13, 64, 4096] {
        let mut source = ChunkedSource {
            data: wire.clone(),
            pos: 0,
            chunk,
        };
        let mut reader = RecordReader::new();
        let mut records = Vec::new();
        let status = reader.fill(&mut source, &mut records);
        assert!(matches!(status, ReadStatus::Open), "chunk size {chunk}");
        assert_matches_expected(&records, &expected);
    }
}

#[test]
fn partial_bytes_survive_would_block() {
    let (wire, expected) = sample_records();
    let total = wire.len();
    let mut source = StutteringSource {
        data: wire,
        pos: 0,
        ready: true,
    };
    let mut reader = RecordReader::new();
    let mut records = Vec::new();

    // Each fill makes at most one byte of progress; the state machine
    // must resume exactly where it paused every time.
    for _ in 0..=2 * total {
        match reader.fill(&mut source, &mut records) {
            ReadStatus::Open => {}
            other => panic!("unexpected status {other:?}"),
        }
    }
    assert_matches_expected(&records, &expected);
}

#[test]
fn one_fill_drains_every_buffered_record() {
    let one = wire_record(RecordType::Stdout, 9, b"payload", 0);
    let mut wire = Vec::new();
    for _ in 0..50 {
        wire.extend_from_slice(&one);
    }
    let mut source = ChunkedSource {
        data: wire,
        pos: 0,
        chunk: 4096,
    };

    let mut reader = RecordReader::new();
    let mut records = Vec::new();
    let status = reader.fill(&mut source, &mut records);
    assert!(matches!(status, ReadStatus::Open));
    assert_eq!(records.len(), 50);
}

#[test]
fn padding_is_read_but_discarded() {
    let wire = wire_record(RecordType::Stdin, 3, b"abc", 200);
    let mut source = ChunkedSource {
        data: wire,
        pos: 0,
        chunk: 4096,
    };

    let mut reader = RecordReader::new();
    let mut records = Vec::new();
    reader.fill(&mut source, &mut records);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content, b"abc");
    assert_eq!(records[0].header.padding_len, 200);
}

#[test]
fn eof_reports_closed_after_final_record() {
    let wire = wire_record(RecordType::Stdin, 1, b"tail", 0);
    let mut source = io::Cursor::new(wire);

    let mut reader = RecordReader::new();
    let mut records = Vec::new();
    let status = reader.fill(&mut source, &mut records);
    assert!(matches!(status, ReadStatus::Closed));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content, b"tail");
}

#[test]
fn read_error_reports_closed() {
    let mut reader = RecordReader::new();
    let mut records = Vec::new();
    let status = reader.fill(&mut FailingSource, &mut records);
    assert!(matches!(status, ReadStatus::Closed));
    assert!(records.is_empty());
}

#[test]
fn unknown_record_type_is_a_violation() {
    let mut wire = wire_record(RecordType::Stdin, 1, b"x", 0);
    wire[1] = 200;
    let mut source = ChunkedSource {
        data: wire,
        pos: 0,
        chunk: 4096,
    };

    let mut reader = RecordReader::new();
    let mut records = Vec::new();
    match reader.fill(&mut source, &mut records) {
        ReadStatus::Violation(ProtocolError::UnknownRecordType(200)) => {}
        other => panic!("unexpected status {other:?}"),
    }
    assert!(records.is_empty());
}
