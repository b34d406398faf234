//! Bounded blocking message queues.
//!
//! The two queues (incoming records, outgoing responses) are the only
//! structures shared between threads. Producers block when a queue is
//! full; that backpressure is the sole flow control between the I/O side
//! and the protocol engine. Closure is terminal: once every producer is
//! gone and the queue is drained, consumers observe `Closed` and exit.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use thiserror::Error;

use crate::metrics;

/// Returned by `produce` when every consumer is gone.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("queue is closed")]
pub struct QueueClosed;

/// Outcome of a timed consume.
#[derive(Debug)]
pub enum Consumed<T> {
    Message(T),
    TimedOut,
    Closed,
}

pub struct Producer<T>(Sender<T>);

pub struct Consumer<T>(Receiver<T>);

/// Build a bounded queue with `capacity` slots.
pub fn bounded<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (Producer(tx), Consumer(rx))
}

impl<T> Producer<T> {
    /// Enqueue a message, blocking while the queue is at capacity. Never
    /// drops; fails only when the queue is closed.
    pub fn produce(&self, item: T) -> Result<(), QueueClosed> {
        match self.0.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => {
                metrics::inc_queue_full();
                self.0.send(item).map_err(|_| QueueClosed)
            }
            Err(TrySendError::Disconnected(_)) => Err(QueueClosed),
        }
    }
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Producer(self.0.clone())
    }
}

impl<T> Consumer<T> {
    /// Block until a message is available. `None` means the queue is
    /// closed and drained.
    pub fn consume(&self) -> Option<T> {
        self.0.recv().ok()
    }

    /// Block for at most `timeout`. Long-running consumer loops use this
    /// to re-check their shutdown token without busy-waiting.
    pub fn consume_timeout(&self, timeout: Duration) -> Consumed<T> {
        match self.0.recv_timeout(timeout) {
            Ok(item) => Consumed::Message(item),
            Err(RecvTimeoutError::Timeout) => Consumed::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Consumed::Closed,
        }
    }
}
