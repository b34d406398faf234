//! Incremental record reassembly for one connection.
//!
//! A `RecordReader` turns partial non-blocking reads into complete wire
//! records. It alternates between two states: accumulating the 8-byte
//! header, then accumulating the header's `content + padding` bytes.
//! `WouldBlock` pauses the machine without losing buffered bytes; one
//! `fill` call decodes every record the kernel already buffered before
//! yielding, so no readiness event is wasted.

use std::io::{self, Read};

use crate::constants::{HEADER_LEN, RECORD_BUF_LEN};
use crate::record::{ProtocolError, Record, RecordHeader};

/// What a `fill` invocation learned about the connection.
#[derive(Debug)]
pub enum ReadStatus {
    /// Out of readable bytes for now; resume on the next readiness event.
    Open,
    /// EOF or a read error other than would-block.
    Closed,
    /// The byte stream is not valid protocol input.
    Violation(ProtocolError),
}

#[derive(Clone, Copy)]
enum ReadState {
    AwaitingHeader,
    AwaitingBody { header: RecordHeader },
}

pub struct RecordReader {
    buf: Box<[u8; RECORD_BUF_LEN]>,
    /// Bytes accumulated so far in the current state.
    offset: usize,
    state: ReadState,
}

impl RecordReader {
    pub fn new() -> RecordReader {
        RecordReader {
            buf: Box::new([0u8; RECORD_BUF_LEN]),
            offset: 0,
            state: ReadState::AwaitingHeader,
        }
    }

    /// Read from `io` until it would block, appending every completed
    /// record to `out`. Padding bytes are consumed and discarded.
    pub fn fill(&mut self, io: &mut impl Read, out: &mut Vec<Record>) -> ReadStatus {
        loop {
            let wanted = match self.state {
                ReadState::AwaitingHeader => HEADER_LEN,
                ReadState::AwaitingBody { header } => header.body_len(),
            };

            if self.offset < wanted {
                match io.read(&mut self.buf[self.offset..wanted]) {
                    Ok(0) => return ReadStatus::Closed,
                    Ok(n) => self.offset += n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadStatus::Open,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => return ReadStatus::Closed,
                }
                if self.offset < wanted {
                    continue;
                }
            }

            match self.state {
                ReadState::AwaitingHeader => {
                    let mut header_bytes = [0u8; HEADER_LEN];
                    header_bytes.copy_from_slice(&self.buf[..HEADER_LEN]);
                    let header = match RecordHeader::decode(&header_bytes) {
                        Ok(header) => header,
                        Err(violation) => return ReadStatus::Violation(violation),
                    };
                    self.offset = 0;
                    if header.body_len() == 0 {
                        out.push(Record {
                            header,
                            content: Vec::new(),
                        });
                    } else {
                        self.state = ReadState::AwaitingBody { header };
                    }
                }
                ReadState::AwaitingBody { header } => {
                    let content = self.buf[..header.content_len as usize].to_vec();
                    out.push(Record { header, content });
                    self.offset = 0;
                    self.state = ReadState::AwaitingHeader;
                }
            }
        }
    }
}

impl Default for RecordReader {
    fn default() -> Self {
        RecordReader::new()
    }
}
