#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use fcgid::constants::HEADER_LEN;
use fcgid::record::{BeginRequestBody, EndRequestBody, Record, RecordHeader, RecordType};

/// Blocking FastCGI client for driving a live server in tests.
pub struct FcgiClient {
    stream: TcpStream,
}

impl FcgiClient {
    pub fn connect(addr: SocketAddr) -> FcgiClient {
        let stream = TcpStream::connect(addr).expect("failed to connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        FcgiClient { stream }
    }

    pub fn send_record(&mut self, rtype: RecordType, request_id: u16, content: &[u8]) {
        self.send_bytes(&record_bytes(rtype, request_id, content));
    }

    pub fn send_bytes(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("failed to write");
    }

    pub fn begin_request(&mut self, request_id: u16, role: u16, flags: u8) {
        let body = BeginRequestBody { role, flags };
        self.send_record(RecordType::BeginRequest, request_id, &body.encode());
    }

    /// Read one record; `None` when the server closed the connection.
    pub fn read_record(&mut self) -> Option<Record> {
        let mut header_bytes = [0u8; HEADER_LEN];
        match self.stream.read_exact(&mut header_bytes) {
            Ok(()) => {}
            Err(e)
                if e.kind() == io::ErrorKind::UnexpectedEof
                    || e.kind() == io::ErrorKind::ConnectionReset =>
            {
                return None;
            }
            Err(e) => panic!("failed to read record header: {e}"),
        }
        let header = RecordHeader::decode(&header_bytes).expect("bad record header");
        let mut body = vec![0u8; header.body_len()];
        self.stream
            .read_exact(&mut body)
            .expect("failed to read record body");
        body.truncate(header.content_len as usize);
        Some(Record {
            header,
            content: body,
        })
    }

    /// Collect the stdout stream and the end-request for `request_id`.
    pub fn read_response(&mut self, request_id: u16) -> (Vec<u8>, EndRequestBody) {
        let mut output = Vec::new();
        loop {
            let record = self.read_record().expect("connection closed mid-response");
            assert_eq!(record.header.request_id, request_id);
            match record.header.rtype {
                RecordType::Stdout => output.extend_from_slice(&record.content),
                RecordType::EndRequest => {
                    let end =
                        EndRequestBody::decode(&record.content).expect("bad end-request body");
                    return (output, end);
                }
                other => panic!("unexpected {other:?} record in response"),
            }
        }
    }
}

/// Wire bytes of one record with no padding.
pub fn record_bytes(rtype: RecordType, request_id: u16, content: &[u8]) -> Vec<u8> {
    let header = RecordHeader::for_content(rtype, request_id, content.len() as u16);
    let mut wire = header.encode().to_vec();
    wire.extend_from_slice(content);
    wire
}

/// Encode one name-value pair the way the parameter stream expects.
pub fn nv_pair(name: &str, value: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    nv_length(&mut buf, name.len());
    nv_length(&mut buf, value.len());
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(value.as_bytes());
    buf
}

fn nv_length(buf: &mut Vec<u8>, length: usize) {
    if length < 128 {
        buf.push(length as u8);
    } else {
        buf.extend_from_slice(&((length as u32) | 0x8000_0000).to_be_bytes());
    }
}

/// A connected localhost socket pair, for tests that need a real
/// descriptor without a running server.
pub fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind");
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).expect("failed to connect");
    let (server, _) = listener.accept().expect("failed to accept");
    (client, server)
}
