use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Instant;

use clap::{Parser, Subcommand};

use fcgid::constants::HEADER_LEN;
use fcgid::record::{
    BeginRequestBody, EndRequestBody, KEEP_CONN, REQUEST_COMPLETE, ROLE_RESPONDER, Record,
    RecordHeader, RecordType,
};

#[derive(Parser)]
#[command(about = "Test client for the fcgid server")]
struct Args {
    /// Server port
    #[arg(short, long, default_value_t = 9000)]
    port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Send one request and print the response (default)
    Smoke,
    /// Send many sequential requests over one kept-alive connection
    Burst {
        /// Number of requests
        #[arg(short, long, default_value_t = 100)]
        requests: usize,
    },
}

fn write_record(stream: &mut TcpStream, rtype: RecordType, request_id: u16, content: &[u8]) {
    let header = RecordHeader::for_content(rtype, request_id, content.len() as u16);
    stream
        .write_all(&header.encode())
        .expect("failed to write record header");
    stream
        .write_all(content)
        .expect("failed to write record content");
}

fn read_record(stream: &mut TcpStream) -> Record {
    let mut header_bytes = [0u8; HEADER_LEN];
    stream
        .read_exact(&mut header_bytes)
        .expect("failed to read record header");
    let header = RecordHeader::decode(&header_bytes).expect("bad record header");
    let mut body = vec![0u8; header.body_len()];
    stream
        .read_exact(&mut body)
        .expect("failed to read record body");
    body.truncate(header.content_len as usize);
    Record {
        header,
        content: body,
    }
}

fn nv_length(buf: &mut Vec<u8>, length: usize) {
    if length < 128 {
        buf.push(length as u8);
    } else {
        buf.extend_from_slice(&((length as u32) | 0x8000_0000).to_be_bytes());
    }
}

fn nv_pair(buf: &mut Vec<u8>, name: &str, value: &str) {
    nv_length(buf, name.len());
    nv_length(buf, value.len());
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(value.as_bytes());
}

fn send_request(stream: &mut TcpStream, request_id: u16, body: &[u8], keep_conn: bool) {
    let begin = BeginRequestBody {
        role: ROLE_RESPONDER,
        flags: if keep_conn { KEEP_CONN } else { 0 },
    };
    write_record(stream, RecordType::BeginRequest, request_id, &begin.encode());

    let mut params = Vec::new();
    nv_pair(&mut params, "REQUEST_METHOD", "GET");
    nv_pair(&mut params, "REQUEST_URI", "/");
    write_record(stream, RecordType::Params, request_id, &params);
    write_record(stream, RecordType::Params, request_id, &[]);

    if !body.is_empty() {
        write_record(stream, RecordType::Stdin, request_id, body);
    }
    write_record(stream, RecordType::Stdin, request_id, &[]);
}

/// Collect the stdout stream until end-request; returns the response
/// bytes.
fn read_response(stream: &mut TcpStream, request_id: u16) -> Vec<u8> {
    let mut output = Vec::new();
    loop {
        let record = read_record(stream);
        assert_eq!(
            record.header.request_id, request_id,
            "response for the wrong request"
        );
        match record.header.rtype {
            RecordType::Stdout => output.extend_from_slice(&record.content),
            RecordType::EndRequest => {
                let end = EndRequestBody::decode(&record.content).expect("bad end-request body");
                assert_eq!(end.protocol_status, REQUEST_COMPLETE, "request not completed");
                return output;
            }
            other => panic!("unexpected {other:?} record in response"),
        }
    }
}

fn main() {
    let args = Args::parse();
    let addr = format!("127.0.0.1:{}", args.port);

    match args.command.unwrap_or(Command::Smoke) {
        Command::Smoke => smoke_test(&addr),
        Command::Burst { requests } => burst_test(&addr, requests),
    }
}

fn smoke_test(addr: &str) {
    eprintln!("smoke test: connecting to {}", addr);
    let mut stream = TcpStream::connect(addr).expect("failed to connect");

    send_request(&mut stream, 1, b"hello from the smoke client", false);
    let response = read_response(&mut stream, 1);
    assert!(!response.is_empty(), "empty response");
    eprintln!("  response: {}", String::from_utf8_lossy(&response));

    // The server closes after end-request when KEEP_CONN is not set.
    let mut rest = [0u8; 1];
    let n = stream.read(&mut rest).expect("failed to read after close");
    assert_eq!(n, 0, "expected the server to close the connection");

    eprintln!("smoke test: PASSED");
}

fn burst_test(addr: &str, requests: usize) {
    eprintln!("burst test: {} requests over one connection to {}", requests, addr);
    let mut stream = TcpStream::connect(addr).expect("failed to connect");
    stream.set_nodelay(true).unwrap();

    let start = Instant::now();
    for i in 0..requests {
        send_request(&mut stream, 1, format!("request {i}").as_bytes(), true);
        let response = read_response(&mut stream, 1);
        assert!(!response.is_empty(), "request {i}: empty response");
    }
    let elapsed = start.elapsed();

    eprintln!(
        "burst test: PASSED ({} requests in {:.2}s = {:.0} req/s)",
        requests,
        elapsed.as_secs_f64(),
        requests as f64 / elapsed.as_secs_f64()
    );
}
