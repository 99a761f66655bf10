//! Session bus: wraps `tokio::sync::broadcast` so sessions and bots never
//! touch the broadcast types directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

use pulsepair::SessionMessage;

const BUS_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// PollError
// ---------------------------------------------------------------------------

/// Error from `BusReceiver::poll()`: the bus is closed or the shutdown
/// flag is set.
#[derive(Debug, PartialEq, Eq)]
pub enum PollError {
    Shutdown,
}

/// Create a bus. The returned sender stamps `source`; the receiver shares
/// its shutdown flag.
pub fn channel(source: impl Into<String>) -> (BusSender, BusReceiver) {
    let (tx, _) = broadcast::channel(BUS_CAPACITY);
    let sender = BusSender::new(source.into(), tx, Arc::new(AtomicBool::new(false)));
    let receiver = sender.subscribe();
    (sender, receiver)
}

// ---------------------------------------------------------------------------
// BusSender
// ---------------------------------------------------------------------------

/// Cloneable sender that auto-stamps `source` on every outbound message.
pub struct BusSender {
    source: String,
    inner: broadcast::Sender<SessionMessage>,
    shutdown: Arc<AtomicBool>,
}

impl BusSender {
    pub fn new(
        source: String,
        inner: broadcast::Sender<SessionMessage>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            inner,
            shutdown,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Same bus and shutdown flag, different source stamp.
    pub fn with_source(&self, source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            inner: self.inner.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Send a message, auto-stamping source. Having no receivers is fine.
    pub fn send(&self, msg: SessionMessage) {
        let _ = self.inner.send(msg.source(self.source.clone()));
    }

    /// Raise the shared shutdown flag. Every receiver sees it on next poll.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn subscribe(&self) -> BusReceiver {
        BusReceiver {
            inner: self.inner.subscribe(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl Clone for BusSender {
    fn clone(&self) -> Self {
        self.with_source(self.source.clone())
    }
}

// ---------------------------------------------------------------------------
// BusReceiver
// ---------------------------------------------------------------------------

pub struct BusReceiver {
    inner: broadcast::Receiver<SessionMessage>,
    shutdown: Arc<AtomicBool>,
}

impl BusReceiver {
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Non-blocking drain: returns the next message, `Ok(None)` if empty,
    /// or `Err(PollError::Shutdown)` if the bus is closed or shutdown flag set.
    pub fn poll(&mut self) -> Result<Option<SessionMessage>, PollError> {
        if self.is_shutdown() {
            return Err(PollError::Shutdown);
        }
        loop {
            match self.inner.try_recv() {
                Ok(msg) => return Ok(Some(msg)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => return Err(PollError::Shutdown),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!("bus: lagged, dropped {n} events");
                    continue;
                }
            }
        }
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<SessionMessage> {
        let mut out = Vec::new();
        while let Ok(Some(msg)) = self.poll() {
            out.push(msg);
        }
        out
    }
}
