//! Pending message buffer

use parking_lot::Mutex;
use tidepool_core::Message;
use tokio::time::Instant;

/// A message waiting to be flushed
#[derive(Debug, Clone)]
pub struct BufferedMessage {
    pub message: Message,
    /// When the message entered the buffer
    pub arrived_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    messages: Vec<BufferedMessage>,
    sealed: bool,
}

/// Ordered buffer of pending messages
///
/// [`drain`](Self::drain) takes the whole content in the same critical
/// section that empties it, so a message is handed out exactly once no
/// matter how many flushes race.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    inner: Mutex<Inner>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message
    ///
    /// Returns `false` (and drops the message) once the buffer is sealed.
    pub fn push(&self, message: Message) -> bool {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return false;
        }
        inner.messages.push(BufferedMessage {
            message,
            arrived_at: Instant::now(),
        });
        true
    }

    /// Take every pending message, leaving the buffer empty
    pub fn drain(&self) -> Vec<BufferedMessage> {
        std::mem::take(&mut self.inner.lock().messages)
    }

    /// Refuse all further pushes
    pub fn seal(&self) {
        self.inner.lock().sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().sealed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().messages.is_empty()
    }
}
