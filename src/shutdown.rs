//! Cooperative shutdown signalling.
//!
//! A shutdown is a closed channel: the handle holds the sending half and
//! never sends; dropping it (or calling `shutdown`) disconnects every
//! token. Loops check their token once per iteration and at every timed
//! queue wait; nothing is preempted.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

/// Owning side. Dropping it requests shutdown.
pub struct ShutdownHandle {
    _tx: Sender<()>,
}

/// Observing side, cloned into every loop thread.
pub struct ShutdownToken {
    rx: Receiver<()>,
}

pub fn channel() -> (ShutdownHandle, ShutdownToken) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (ShutdownHandle { _tx: tx }, ShutdownToken { rx })
}

impl ShutdownHandle {
    /// Request shutdown. Equivalent to dropping the handle.
    pub fn shutdown(self) {}
}

impl ShutdownToken {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        ShutdownToken { rx: self.rx.clone() }
    }
}
