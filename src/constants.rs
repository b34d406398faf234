//! Protocol and sizing constants.
//!
//! Wire-format values come straight from the FastCGI specification; the
//! sizing knobs are server policy and are not part of the protocol.

use std::time::Duration;

/// FastCGI protocol version carried in every record header.
pub const FCGI_VERSION: u8 = 1;

/// Record header size on the wire, in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest record content length (the header field is u16).
pub const MAX_CONTENT_LEN: usize = 65535;

/// Largest record padding length (the header field is u8).
pub const MAX_PADDING_LEN: usize = 255;

/// Largest possible record on the wire: header + content + padding.
pub const MAX_RECORD_LEN: usize = HEADER_LEN + MAX_CONTENT_LEN + MAX_PADDING_LEN;

/// Per-connection read buffer size. Must hold the body of the largest
/// record; rounded up to a whole number of KiB.
pub const RECORD_BUF_LEN: usize = 65 * 1024;

/// Capacity of the incoming and outgoing message queues. Producers block
/// when a queue is full; this bound is the only flow control between the
/// I/O side and the protocol engine.
pub const QUEUE_CAPACITY: usize = 1024;

/// Listen backlog for the accepting socket.
pub const LISTEN_BACKLOG: i32 = 10;

/// Readiness events drained per multiplexer iteration.
pub const EVENTS_CAPACITY: usize = 1024;

/// Upper bound on one readiness wait, so the shutdown token is observed
/// at least once a second even on an idle server.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Timed consume interval for the protocol engine's queue wait.
pub const ENGINE_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Timed consume interval for the writer loop's queue wait.
pub const WRITER_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// How long the writer parks waiting for a blocked socket to become
/// writable before re-checking shutdown.
pub const WRITABLE_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

// Compile-time sanity checks
const _: () = assert!(
    RECORD_BUF_LEN >= MAX_RECORD_LEN,
    "read buffer must hold the largest possible record"
);
const _: () = assert!(QUEUE_CAPACITY > 0, "queues must be able to hold messages");
