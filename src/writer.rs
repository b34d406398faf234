//! Writer loop: drains the outgoing queue on its own thread.
//!
//! Each message is written fully, header then content. The sockets are
//! non-blocking, so a full send buffer surfaces as `WouldBlock`; the
//! writer then parks on a private poll with the connection's descriptor
//! registered for writability and resumes when the kernel drains. A
//! message flagged last-on-connection pushes the connection id onto the
//! pending-close channel and wakes the multiplexer, which owns the
//! actual teardown.

use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::sync::Arc;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::warn;

use crate::constants::{WRITABLE_WAIT_TIMEOUT, WRITER_POLL_TIMEOUT};
use crate::message::{ConnId, OutboundMessage, ReplyHandle};
use crate::metrics;
use crate::queue::{Consumed, Consumer};
use crate::shutdown::ShutdownToken;

const WRITABLE: Token = Token(0);

pub struct WriterLoop {
    outgoing: Consumer<OutboundMessage>,
    closes: crossbeam_channel::Sender<ConnId>,
    waker: Arc<Waker>,
    shutdown: ShutdownToken,
}

impl WriterLoop {
    pub fn new(
        outgoing: Consumer<OutboundMessage>,
        closes: crossbeam_channel::Sender<ConnId>,
        waker: Arc<Waker>,
        shutdown: ShutdownToken,
    ) -> WriterLoop {
        WriterLoop {
            outgoing,
            closes,
            waker,
            shutdown,
        }
    }

    pub fn run(self) {
        let mut poll = Poll::new().expect("failed to create writer poll");
        let mut events = Events::with_capacity(4);
        loop {
            match self.outgoing.consume_timeout(WRITER_POLL_TIMEOUT) {
                Consumed::Message(message) => self.write_message(message, &mut poll, &mut events),
                Consumed::TimedOut => {
                    if self.shutdown.is_cancelled() {
                        return;
                    }
                }
                Consumed::Closed => return,
            }
        }
    }

    fn write_message(&self, message: OutboundMessage, poll: &mut Poll, events: &mut Events) {
        let header = message.header.encode();
        let result = self
            .write_full(&message.reply, &header, poll, events)
            .and_then(|()| self.write_full(&message.reply, &message.content, poll, events));

        let close = match result {
            Ok(()) => {
                metrics::inc_records_written();
                message.last_on_connection
            }
            Err(error) => {
                warn!(conn = message.conn, %error, "write failed, closing connection");
                true
            }
        };
        if close {
            self.schedule_close(message.conn);
        }
    }

    fn schedule_close(&self, conn: ConnId) {
        if self.closes.send(conn).is_ok() {
            let _ = self.waker.wake();
        }
    }

    /// Write all of `buf`, retrying partial writes until complete or an
    /// unrecoverable error. Shutdown is re-checked whenever the socket
    /// blocks, so a stuck peer cannot pin the process.
    fn write_full(
        &self,
        reply: &ReplyHandle,
        mut buf: &[u8],
        poll: &mut Poll,
        events: &mut Events,
    ) -> io::Result<()> {
        let mut stream = reply.stream();
        while !buf.is_empty() {
            match stream.write(buf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if self.shutdown.is_cancelled() {
                        return Err(io::ErrorKind::Interrupted.into());
                    }
                    self.wait_writable(reply, poll, events)?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn wait_writable(
        &self,
        reply: &ReplyHandle,
        poll: &mut Poll,
        events: &mut Events,
    ) -> io::Result<()> {
        let fd = reply.stream().as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), WRITABLE, Interest::WRITABLE)?;
        let result = poll.poll(events, Some(WRITABLE_WAIT_TIMEOUT));
        let _ = poll.registry().deregister(&mut SourceFd(&fd));
        match result {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            other => other,
        }
    }
}
