//! Server assembly: wires the listener, queues and threads together.

use std::io;
use std::net::SocketAddr;
use std::thread::{self, JoinHandle};

use tracing::info;

use crate::constants::QUEUE_CAPACITY;
use crate::fcgi::{Engine, Handler};
use crate::listener::create_listener;
use crate::message::{ConnId, InboundMessage, OutboundMessage};
use crate::mux::Multiplexer;
use crate::queue;
use crate::shutdown::{self, ShutdownHandle};
use crate::writer::WriterLoop;

/// Runtime knobs. The listening address is the only required piece of
/// configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub queue_capacity: usize,
}

impl ServerConfig {
    pub fn new(addr: SocketAddr) -> ServerConfig {
        ServerConfig {
            addr,
            queue_capacity: QUEUE_CAPACITY,
        }
    }
}

/// A running server: multiplexer, protocol engine and writer threads.
/// Dropping it shuts everything down cooperatively.
pub struct Server {
    local_addr: SocketAddr,
    shutdown: Option<ShutdownHandle>,
    threads: Vec<JoinHandle<()>>,
}

impl Server {
    /// Bind the listener and spawn the three server threads. Listener
    /// setup failure is the only error that propagates; everything after
    /// startup is connection-scoped.
    pub fn start<H: Handler>(config: ServerConfig, handler: H) -> io::Result<Server> {
        let listener = create_listener(config.addr)?;
        let local_addr = listener.local_addr()?;

        let (shutdown_handle, token) = shutdown::channel();
        let (inbound_tx, inbound_rx) = queue::bounded::<InboundMessage>(config.queue_capacity);
        let (outbound_tx, outbound_rx) = queue::bounded::<OutboundMessage>(config.queue_capacity);
        let (close_tx, close_rx) = crossbeam_channel::unbounded::<ConnId>();

        let (mux, waker) = Multiplexer::new(listener, inbound_tx, close_rx, token.clone())?;
        let engine = Engine::new(
            inbound_rx,
            outbound_tx,
            close_tx.clone(),
            waker.clone(),
            token.clone(),
            handler,
        );
        let writer = WriterLoop::new(outbound_rx, close_tx, waker, token);

        let mux_thread = thread::Builder::new()
            .name("mux".into())
            .spawn(move || mux.run())
            .expect("failed to spawn multiplexer thread");
        let engine_thread = thread::Builder::new()
            .name("fcgi-engine".into())
            .spawn(move || engine.run())
            .expect("failed to spawn engine thread");
        let writer_thread = thread::Builder::new()
            .name("writer".into())
            .spawn(move || writer.run())
            .expect("failed to spawn writer thread");

        info!(%local_addr, "server started");
        Ok(Server {
            local_addr,
            shutdown: Some(shutdown_handle),
            threads: vec![mux_thread, engine_thread, writer_thread],
        })
    }

    /// The bound address; useful when the config asked for port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cancel every loop and join the threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.shutdown.take() {
            handle.shutdown();
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
