//! Card transport contract consumed by the reader core.

use crate::{error::Error, iso7816::StatusWord};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A command/response smart-card transport.
///
/// Implementations wrap PC/SC, CCID or any other APDU-capable binding. The
/// core issues strictly serialized `transmit` calls and never retries; I/O
/// timeouts are the transport's responsibility and surface as
/// [`Error::Transport`].
pub trait Transceiver {
    /// Send a command APDU and return the response body and status word.
    fn transmit(&mut self, apdu: &[u8]) -> Result<(Vec<u8>, StatusWord), Error>;
}

/// Cooperative cancellation flag, consulted by transports before each
/// blocking wait (card-detection polling in particular).
///
/// Clones share the same flag, so one can be handed to a signal handler or
/// UI thread while the transport polls.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the pending wait.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
