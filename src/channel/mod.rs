//! Duplex message channel between host and sandbox.
//!
//! Both transports hand back the same pair: an event receiver and a
//! [`ChannelHandle`] for the outbound direction. Frames are delivered
//! exactly once, FIFO per direction; responses still arrive whenever the
//! remote side finishes, so callers correlate by id, never by position.

pub mod local;
pub mod socket;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::WireMessage;

/// Buffer size of the per-direction queues.
pub(crate) const CHANNEL_CAPACITY: usize = 100;

/// The three observable event classes of a channel endpoint.
#[derive(Debug)]
pub enum ChannelEvent {
    /// An incoming data message.
    Message(WireMessage),
    /// A transport-level fault — distinct from a sandboxed evaluation
    /// error, which travels inside a `Message`.
    Fault(String),
    /// Graceful completion. No further events follow.
    Closed,
}

/// Instruction for the writer task.
#[derive(Debug)]
pub(crate) enum WriterOp {
    Frame(WireMessage),
    Shutdown,
}

/// Outbound half of a channel endpoint.
///
/// Cloneable; `close()` is idempotent and sends after it fail with
/// [`Error::ChannelClosed`].
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    writer: mpsc::Sender<WriterOp>,
    closed: Arc<AtomicBool>,
}

impl ChannelHandle {
    pub(crate) fn new(writer: mpsc::Sender<WriterOp>) -> Self {
        Self {
            writer,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn send(&self, message: WireMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }
        self.writer
            .send(WriterOp::Frame(message))
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Closes the outbound direction. Safe to call repeatedly; only the
    /// first call reaches the writer task.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.writer.try_send(WriterOp::Shutdown);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
