#[cfg(feature = "metrics")]
mod imp {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use tracing::info;

    // Lifecycle (cumulative counts)
    static CONNECTIONS_ACCEPTED: AtomicU64 = AtomicU64::new(0);
    static CONNECTIONS_CLOSED: AtomicU64 = AtomicU64::new(0);
    // Throughput (cumulative)
    static RECORDS_READ: AtomicU64 = AtomicU64::new(0);
    static RECORDS_WRITTEN: AtomicU64 = AtomicU64::new(0);
    static REQUESTS_COMPLETED: AtomicU64 = AtomicU64::new(0);
    // Failure / backpressure
    static PROTOCOL_VIOLATIONS: AtomicU64 = AtomicU64::new(0);
    static QUEUE_FULL: AtomicU64 = AtomicU64::new(0);

    #[derive(Clone, Copy)]
    pub struct MetricsSnapshot {
        pub connections_accepted: u64,
        pub connections_closed: u64,
        pub records_read: u64,
        pub records_written: u64,
        pub requests_completed: u64,
        pub protocol_violations: u64,
        pub queue_full: u64,
    }

    pub fn inc_connections_accepted() {
        CONNECTIONS_ACCEPTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connections_closed() {
        CONNECTIONS_CLOSED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_records_read() {
        RECORDS_READ.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_records_written() {
        RECORDS_WRITTEN.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_completed() {
        REQUESTS_COMPLETED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_protocol_violations() {
        PROTOCOL_VIOLATIONS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_queue_full() {
        QUEUE_FULL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: CONNECTIONS_ACCEPTED.load(Ordering::Relaxed),
            connections_closed: CONNECTIONS_CLOSED.load(Ordering::Relaxed),
            records_read: RECORDS_READ.load(Ordering::Relaxed),
            records_written: RECORDS_WRITTEN.load(Ordering::Relaxed),
            requests_completed: REQUESTS_COMPLETED.load(Ordering::Relaxed),
            protocol_violations: PROTOCOL_VIOLATIONS.load(Ordering::Relaxed),
            queue_full: QUEUE_FULL.load(Ordering::Relaxed),
        }
    }

    pub fn spawn_reporter() {
        const INTERVAL_SECS: u64 = 10;
        std::thread::spawn(|| {
            let mut last = snapshot();
            loop {
                std::thread::sleep(Duration::from_secs(INTERVAL_SECS));
                let snap = snapshot();
                info!(
                    interval_secs = INTERVAL_SECS,
                    accepted = snap.connections_accepted.saturating_sub(last.connections_accepted),
                    closed = snap.connections_closed.saturating_sub(last.connections_closed),
                    records_read = snap.records_read.saturating_sub(last.records_read),
                    records_written = snap.records_written.saturating_sub(last.records_written),
                    requests = snap.requests_completed.saturating_sub(last.requests_completed),
                    violations = snap.protocol_violations.saturating_sub(last.protocol_violations),
                    queue_full_stalls = snap.queue_full.saturating_sub(last.queue_full),
                    "metrics delta"
                );
                last = snap;
            }
        });
    }
}

#[cfg(not(feature = "metrics"))]
#[allow(dead_code)]
mod imp {
    #[derive(Clone, Copy)]
    pub struct MetricsSnapshot {
        pub connections_accepted: u64,
        pub connections_closed: u64,
        pub records_read: u64,
        pub records_written: u64,
        pub requests_completed: u64,
        pub protocol_violations: u64,
        pub queue_full: u64,
    }

    pub fn inc_connections_accepted() {}
    pub fn inc_connections_closed() {}
    pub fn inc_records_read() {}
    pub fn inc_records_written() {}
    pub fn inc_requests_completed() {}
    pub fn inc_protocol_violations() {}
    pub fn inc_queue_full() {}
    pub fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: 0,
            connections_closed: 0,
            records_read: 0,
            records_written: 0,
            requests_completed: 0,
            protocol_violations: 0,
            queue_full: 0,
        }
    }
    pub fn spawn_reporter() {}
}

pub use imp::*;
