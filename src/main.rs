use std::collections::HashMap;
use std::net::SocketAddr;

use clap::Parser;
use tracing::info;

use fcgid::constants::QUEUE_CAPACITY;
use fcgid::metrics;
use fcgid::server::{Server, ServerConfig};

#[derive(Parser)]
#[command(about = "FastCGI application server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 9000)]
    port: u16,

    /// Capacity of the incoming and outgoing message queues
    #[arg(long, default_value_t = QUEUE_CAPACITY)]
    queue_capacity: usize,
}

/// Placeholder responder: reports the request line and body size. Real
/// deployments embed `Server` with their own handler.
fn demo_handler(body: &[u8], params: &HashMap<String, String>) -> Vec<u8> {
    let method = params
        .get("REQUEST_METHOD")
        .map(String::as_str)
        .unwrap_or("-");
    let uri = params.get("REQUEST_URI").map(String::as_str).unwrap_or("-");

    let mut response = b"Content-type: text/plain\r\n\r\n".to_vec();
    response.extend_from_slice(
        format!("fcgid: {method} {uri} ({} body bytes)\n", body.len()).as_bytes(),
    );
    response
}

fn main() {
    tracing_subscriber::fmt::init();
    metrics::spawn_reporter();
    let args = Args::parse();

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let mut config = ServerConfig::new(addr);
    config.queue_capacity = args.queue_capacity;

    let server = Server::start(config, demo_handler).expect("failed to start server");
    info!(port = args.port, "listening");

    // First ctrl-c requests a graceful stop; the channel is bounded so
    // the signal handler never allocates.
    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .expect("failed to install signal handler");

    let _ = stop_rx.recv();
    info!("shutting down");
    server.shutdown();
}
