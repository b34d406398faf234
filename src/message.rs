//! Payload types carried on the message queues.
//!
//! Each queue direction has its own type: the multiplexer produces
//! `InboundMessage` for the protocol engine, the engine produces
//! `OutboundMessage` for the writer loop.

use std::io;
use std::net::TcpStream;
use std::os::fd::AsFd;
use std::sync::Arc;

use crate::record::{Record, RecordHeader};

/// Connection identifier: the multiplexer's slab key for the connection.
pub type ConnId = usize;

/// Write-side handle for a connection, shared by every message that may
/// answer on it. Holds a duplicated file descriptor so the writer thread
/// can send responses while the multiplexer retains exclusive ownership
/// of the read side; the duplicate closes when the last message drops.
#[derive(Debug, Clone)]
pub struct ReplyHandle {
    stream: Arc<TcpStream>,
}

impl ReplyHandle {
    /// Duplicate the connection's descriptor into a standalone write
    /// handle. The duplicate shares the non-blocking file status.
    pub fn duplicate(source: &impl AsFd) -> io::Result<ReplyHandle> {
        let fd = source.as_fd().try_clone_to_owned()?;
        Ok(ReplyHandle {
            stream: Arc::new(TcpStream::from(fd)),
        })
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

/// Multiplexer → protocol engine.
#[derive(Debug)]
pub enum InboundMessage {
    /// One complete record read off a connection.
    Record {
        conn: ConnId,
        reply: ReplyHandle,
        record: Record,
    },
    /// The connection was evicted; the engine discards any request in
    /// progress on it.
    Disconnected { conn: ConnId },
}

/// Protocol engine → writer loop. The writer sends `header` then
/// `content`, fully, in that order.
#[derive(Debug)]
pub struct OutboundMessage {
    pub conn: ConnId,
    pub reply: ReplyHandle,
    pub header: RecordHeader,
    pub content: Vec<u8>,
    /// After this write the connection is scheduled for close.
    pub last_on_connection: bool,
}
