//! FastCGI wire records: header and body encode/decode.
//!
//! All multi-byte fields are network byte order. Decoding works over byte
//! slices with explicit field extraction; record buffers are never
//! reinterpreted as structs.

use thiserror::Error;

use crate::constants::{FCGI_VERSION, HEADER_LEN};

/// The eleven record types of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
    GetValues = 9,
    GetValuesResult = 10,
    UnknownType = 11,
}

impl RecordType {
    pub fn from_wire(value: u8) -> Option<RecordType> {
        match value {
            1 => Some(RecordType::BeginRequest),
            2 => Some(RecordType::AbortRequest),
            3 => Some(RecordType::EndRequest),
            4 => Some(RecordType::Params),
            5 => Some(RecordType::Stdin),
            6 => Some(RecordType::Stdout),
            7 => Some(RecordType::Stderr),
            8 => Some(RecordType::Data),
            9 => Some(RecordType::GetValues),
            10 => Some(RecordType::GetValuesResult),
            11 => Some(RecordType::UnknownType),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// A malformed or out-of-order piece of protocol input. Violations are
/// connection-scoped: the offending connection is dropped, the process
/// keeps running.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown record type {0}")]
    UnknownRecordType(u8),
    #[error("begin-request body is {0} bytes, expected {expected}", expected = BeginRequestBody::WIRE_LEN)]
    BadBeginRequestLength(usize),
    #[error("unsupported role {0}, only RESPONDER is accepted")]
    UnsupportedRole(u16),
    #[error("stream record without a begin-request")]
    MissingBeginRequest,
    #[error("begin-request for a request that is already in progress")]
    DuplicateBeginRequest,
    #[error("{0:?} stream is missing its zero-length terminator")]
    UnterminatedStream(RecordType),
    #[error("unexpected {got:?} record while reading a {want:?} stream")]
    UnexpectedRecord { want: RecordType, got: RecordType },
    #[error("record type {0:?} is not supported")]
    UnsupportedRecordType(RecordType),
    #[error("name-value stream is truncated")]
    TruncatedNameValue,
}

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: u8,
    pub rtype: RecordType,
    pub request_id: u16,
    pub content_len: u16,
    pub padding_len: u8,
    pub reserved: u8,
}

impl RecordHeader {
    /// Header for an outgoing record carrying `content_len` content bytes
    /// and no padding.
    pub fn for_content(rtype: RecordType, request_id: u16, content_len: u16) -> RecordHeader {
        RecordHeader {
            version: FCGI_VERSION,
            rtype,
            request_id,
            content_len,
            padding_len: 0,
            reserved: 0,
        }
    }

    /// Decode a header from its wire bytes. The version byte is stored but
    /// not validated; an unknown type byte is a protocol violation.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<RecordHeader, ProtocolError> {
        let rtype = RecordType::from_wire(buf[1]).ok_or(ProtocolError::UnknownRecordType(buf[1]))?;
        Ok(RecordHeader {
            version: buf[0],
            rtype,
            request_id: u16::from_be_bytes([buf[2], buf[3]]),
            content_len: u16::from_be_bytes([buf[4], buf[5]]),
            padding_len: buf[6],
            reserved: buf[7],
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let request_id = self.request_id.to_be_bytes();
        let content_len = self.content_len.to_be_bytes();
        [
            self.version,
            self.rtype.to_wire(),
            request_id[0],
            request_id[1],
            content_len[0],
            content_len[1],
            self.padding_len,
            self.reserved,
        ]
    }

    /// Bytes following the header on the wire.
    pub fn body_len(&self) -> usize {
        self.content_len as usize + self.padding_len as usize
    }
}

/// One framed protocol unit: a header plus its content bytes. Padding is
/// consumed off the wire but never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: RecordHeader,
    pub content: Vec<u8>,
}

/// The RESPONDER role, the only one this server accepts.
pub const ROLE_RESPONDER: u16 = 1;

/// Begin-request flag: keep the connection open after the response.
pub const KEEP_CONN: u8 = 1;

/// End-request protocol status: the request completed normally.
pub const REQUEST_COMPLETE: u8 = 0;

/// Body of a BEGIN_REQUEST record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginRequestBody {
    pub role: u16,
    pub flags: u8,
}

impl BeginRequestBody {
    /// Content bytes of a begin-request body: role (u16), flags (u8),
    /// five reserved bytes.
    pub const WIRE_LEN: usize = 8;

    pub fn decode(content: &[u8]) -> Result<BeginRequestBody, ProtocolError> {
        if content.len() != Self::WIRE_LEN {
            return Err(ProtocolError::BadBeginRequestLength(content.len()));
        }
        Ok(BeginRequestBody {
            role: u16::from_be_bytes([content[0], content[1]]),
            flags: content[2],
        })
    }

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let role = self.role.to_be_bytes();
        [role[0], role[1], self.flags, 0, 0, 0, 0, 0]
    }

    pub fn keep_conn(&self) -> bool {
        self.flags & KEEP_CONN != 0
    }
}

/// Body of an END_REQUEST record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequestBody {
    pub app_status: u32,
    pub protocol_status: u8,
}

impl EndRequestBody {
    /// Content bytes: app status (u32), protocol status (u8), three
    /// reserved bytes.
    pub const WIRE_LEN: usize = 8;

    pub fn decode(content: &[u8]) -> Option<EndRequestBody> {
        if content.len() != Self::WIRE_LEN {
            return None;
        }
        Some(EndRequestBody {
            app_status: u32::from_be_bytes([content[0], content[1], content[2], content[3]]),
            protocol_status: content[4],
        })
    }

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let app_status = self.app_status.to_be_bytes();
        [
            app_status[0],
            app_status[1],
            app_status[2],
            app_status[3],
            self.protocol_status,
            0,
            0,
            0,
        ]
    }
}
