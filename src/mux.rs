//! Connection multiplexer: the single thread that owns the listener and
//! every open connection.
//!
//! One readiness loop with a bounded wait. Each iteration drains the
//! pending-close channel, checks the shutdown token, then polls. Listener
//! readiness accepts until would-block; connection readiness drives that
//! connection's record reader and forwards completed records to the
//! incoming queue. No other thread touches connection state; the write
//! side schedules closes through the channel and the waker.

use std::io;
use std::sync::Arc;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use tracing::{debug, error, info, warn};

use crate::constants::{EVENTS_CAPACITY, POLL_TIMEOUT};
use crate::message::{ConnId, InboundMessage, ReplyHandle};
use crate::metrics;
use crate::queue::Producer;
use crate::reader::{ReadStatus, RecordReader};
use crate::shutdown::ShutdownToken;

const LISTENER: Token = Token(usize::MAX - 1);
const WAKER: Token = Token(usize::MAX - 2);

struct Connection {
    stream: TcpStream,
    reader: RecordReader,
    reply: ReplyHandle,
}

pub struct Multiplexer {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    conns: Slab<Connection>,
    incoming: Producer<InboundMessage>,
    pending_closes: crossbeam_channel::Receiver<ConnId>,
    shutdown: ShutdownToken,
}

impl Multiplexer {
    /// Also returns the waker other threads use to interrupt the
    /// readiness wait after scheduling a close.
    pub fn new(
        mut listener: TcpListener,
        incoming: Producer<InboundMessage>,
        pending_closes: crossbeam_channel::Receiver<ConnId>,
        shutdown: ShutdownToken,
    ) -> io::Result<(Multiplexer, Arc<Waker>)> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        Ok((
            Multiplexer {
                poll,
                events: Events::with_capacity(EVENTS_CAPACITY),
                listener,
                conns: Slab::new(),
                incoming,
                pending_closes,
                shutdown,
            },
            waker,
        ))
    }

    pub fn run(mut self) {
        loop {
            self.drain_pending_closes();
            if self.shutdown.is_cancelled() {
                debug!("multiplexer shutting down");
                return;
            }

            if let Err(error) = self.poll.poll(&mut self.events, Some(POLL_TIMEOUT)) {
                if error.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(%error, "readiness wait failed");
                return;
            }

            let ready: Vec<Token> = self.events.iter().map(|event| event.token()).collect();
            for token in ready {
                match token {
                    LISTENER => self.accept_connections(),
                    WAKER => {}
                    Token(key) => self.drive_connection(key),
                }
            }
        }
    }

    /// Accept every pending connection; would-block ends the burst.
    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let reply = match ReplyHandle::duplicate(&stream) {
                        Ok(reply) => reply,
                        Err(error) => {
                            warn!(%peer, %error, "failed to duplicate connection descriptor");
                            continue;
                        }
                    };
                    let entry = self.conns.vacant_entry();
                    let key = entry.key();
                    if let Err(error) =
                        self.poll
                            .registry()
                            .register(&mut stream, Token(key), Interest::READABLE)
                    {
                        warn!(%peer, %error, "failed to register connection");
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    entry.insert(Connection {
                        stream,
                        reader: RecordReader::new(),
                        reply,
                    });
                    metrics::inc_connections_accepted();
                    info!(%peer, conn = key, "new connection");
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    warn!(%error, "accept failed");
                    return;
                }
            }
        }
    }

    fn drive_connection(&mut self, key: usize) {
        // Stale readiness for an already-evicted connection is possible
        // when a close was drained earlier in this iteration.
        let Some(conn) = self.conns.get_mut(key) else {
            return;
        };

        let mut records = Vec::new();
        let status = conn.reader.fill(&mut conn.stream, &mut records);
        let reply = conn.reply.clone();

        for record in records {
            metrics::inc_records_read();
            let message = InboundMessage::Record {
                conn: key,
                reply: reply.clone(),
                record,
            };
            if self.incoming.produce(message).is_err() {
                self.remove_connection(key, "engine is gone");
                return;
            }
        }

        match status {
            ReadStatus::Open => {}
            ReadStatus::Closed => self.remove_connection(key, "peer closed"),
            ReadStatus::Violation(violation) => {
                metrics::inc_protocol_violations();
                warn!(conn = key, %violation, "protocol violation on the wire");
                self.remove_connection(key, "protocol violation");
            }
        }
    }

    fn remove_connection(&mut self, key: ConnId, reason: &str) {
        if !self.conns.contains(key) {
            return;
        }
        let mut conn = self.conns.remove(key);
        let _ = self.poll.registry().deregister(&mut conn.stream);
        let _ = self.incoming.produce(InboundMessage::Disconnected { conn: key });
        metrics::inc_connections_closed();
        debug!(conn = key, reason, "connection closed");
    }

    fn drain_pending_closes(&mut self) {
        while let Ok(key) = self.pending_closes.try_recv() {
            self.remove_connection(key, "write side finished");
        }
    }
}
