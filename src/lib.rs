//! Library crate for fcgid: record codec, record reader, connection
//! multiplexer, message queues, writer loop and the FastCGI protocol
//! engine.
//!
//! The **binary** (`main.rs`) wires a demo handler; applications embed
//! `server::Server` with their own [`fcgi::Handler`] instead. The
//! protocol pieces (`record`, `reader`, `fcgi`, `queue`) are testable
//! without sockets, which is what the integration tests rely on.

pub mod constants;
pub mod fcgi;
pub mod listener;
pub mod message;
pub mod metrics;
pub mod mux;
pub mod queue;
pub mod reader;
pub mod record;
pub mod server;
pub mod shutdown;
pub mod writer;
