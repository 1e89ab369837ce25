//! In-process transport.
//!
//! A pair of connected endpoints bridged by background tasks — the
//! offline/benchmarking harness uses this to exercise the full protocol
//! with no real inter-process pipe underneath. Semantics match the
//! socket transport: FIFO per direction, `Closed` delivered to both
//! sides when either one closes.

use tokio::sync::mpsc;
use tracing::debug;

use super::{ChannelEvent, ChannelHandle, WriterOp, CHANNEL_CAPACITY};

/// One side of an in-process channel.
pub type Endpoint = (mpsc::Receiver<ChannelEvent>, ChannelHandle);

/// Creates two connected endpoints (host side, sandbox side — the pair
/// is symmetric, the naming is by convention of the caller).
pub fn pair() -> (Endpoint, Endpoint) {
    let (a_writer_tx, a_writer_rx) = mpsc::channel::<WriterOp>(CHANNEL_CAPACITY);
    let (b_writer_tx, b_writer_rx) = mpsc::channel::<WriterOp>(CHANNEL_CAPACITY);
    let (a_event_tx, a_event_rx) = mpsc::channel::<ChannelEvent>(CHANNEL_CAPACITY);
    let (b_event_tx, b_event_rx) = mpsc::channel::<ChannelEvent>(CHANNEL_CAPACITY);

    tokio::spawn(bridge(a_writer_rx, b_event_tx.clone(), a_event_tx.clone()));
    tokio::spawn(bridge(b_writer_rx, a_event_tx, b_event_tx));

    (
        (a_event_rx, ChannelHandle::new(a_writer_tx)),
        (b_event_rx, ChannelHandle::new(b_writer_tx)),
    )
}

/// Forwards one direction until shutdown, then notifies both sides.
async fn bridge(
    mut writer_rx: mpsc::Receiver<WriterOp>,
    peer_events: mpsc::Sender<ChannelEvent>,
    own_events: mpsc::Sender<ChannelEvent>,
) {
    loop {
        match writer_rx.recv().await {
            Some(WriterOp::Frame(message)) => {
                if peer_events.send(ChannelEvent::Message(message)).await.is_err() {
                    // Peer endpoint dropped its receiver
                    break;
                }
            }
            Some(WriterOp::Shutdown) | None => break,
        }
    }
    debug!("in-process channel direction closed");
    let _ = peer_events.send(ChannelEvent::Closed).await;
    let _ = own_events.send(ChannelEvent::Closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WireMessage;

    fn execute(code: &str) -> WireMessage {
        WireMessage::Execute {
            code: code.into(),
            id: None,
        }
    }

    #[tokio::test]
    async fn test_messages_cross_in_order() {
        let ((_a_events, a_handle), (mut b_events, _b_handle)) = pair();

        a_handle.send(execute("first")).await.unwrap();
        a_handle.send(execute("second")).await.unwrap();

        match b_events.recv().await.unwrap() {
            ChannelEvent::Message(WireMessage::Execute { code, .. }) => {
                assert_eq!(code, "first")
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match b_events.recv().await.unwrap() {
            ChannelEvent::Message(WireMessage::Execute { code, .. }) => {
                assert_eq!(code, "second")
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_reaches_both_sides() {
        let ((mut a_events, a_handle), (mut b_events, _b_handle)) = pair();

        a_handle.close();

        assert!(matches!(b_events.recv().await, Some(ChannelEvent::Closed)));
        assert!(matches!(a_events.recv().await, Some(ChannelEvent::Closed)));
    }

    #[tokio::test]
    async fn test_dropping_a_handle_closes_the_direction() {
        let ((_a_events, a_handle), (mut b_events, _b_handle)) = pair();

        drop(a_handle);
        assert!(matches!(b_events.recv().await, Some(ChannelEvent::Closed)));
    }
}
