//! Listening socket setup.

use std::io;
use std::net::SocketAddr;

use mio::net::TcpListener;
use socket2::{Domain, Protocol, Socket, Type};

use crate::constants::LISTEN_BACKLOG;

/// Create the accepting socket: `SO_REUSEADDR`, bound, listening,
/// non-blocking. A failure here is unrecoverable and surfaces to the
/// caller; everything past startup is connection-scoped.
pub fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(TcpListener::from_std(socket.into()))
}
