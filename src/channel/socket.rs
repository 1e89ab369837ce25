//! TCP transport.
//!
//! One NDJSON frame per line, reader and writer as separate tasks over
//! the split stream. A line that fails to decode is a protocol
//! violation: logged and dropped, never fatal to the connection.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{ChannelEvent, ChannelHandle, WriterOp, CHANNEL_CAPACITY};
use crate::error::{Error, Result};
use crate::protocol::{decode_frame, encode_frame};

/// Connects to a listening sandbox and returns the channel endpoint.
pub async fn connect(host: &str, port: u16) -> Result<(mpsc::Receiver<ChannelEvent>, ChannelHandle)> {
    let addr = format!("{host}:{port}");
    let stream = TcpStream::connect(&addr).await.map_err(|e| Error::Transport {
        message: format!("TCP connect to {addr}: {e}"),
    })?;
    info!("Connected to {addr}");
    Ok(spawn_io(stream))
}

/// Binds the serve-side listener.
pub async fn listen(host: &str, port: u16) -> Result<TcpListener> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await.map_err(|e| Error::Transport {
        message: format!("TCP bind on {addr}: {e}"),
    })?;
    info!("Listening on {addr}");
    Ok(listener)
}

/// Wraps an established connection in the reader/writer task pair.
pub fn spawn_io(stream: TcpStream) -> (mpsc::Receiver<ChannelEvent>, ChannelHandle) {
    let (reader, writer) = stream.into_split();
    let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(CHANNEL_CAPACITY);
    let (writer_tx, writer_rx) = mpsc::channel::<WriterOp>(CHANNEL_CAPACITY);

    tokio::spawn(read_loop(reader, event_tx.clone()));
    tokio::spawn(write_loop(writer, writer_rx, event_tx));

    (event_rx, ChannelHandle::new(writer_tx))
}

async fn read_loop(reader: OwnedReadHalf, event_tx: mpsc::Sender<ChannelEvent>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match decode_frame(&line) {
                    Ok(message) => {
                        debug!("Received: {message:?}");
                        if event_tx.send(ChannelEvent::Message(message)).await.is_err() {
                            break;
                        }
                    }
                    // Malformed frame — drop it, keep the connection
                    Err(e) => warn!("Dropping malformed frame: {e}"),
                }
            }
            Ok(None) => {
                debug!("Peer closed the connection");
                let _ = event_tx.send(ChannelEvent::Closed).await;
                break;
            }
            Err(e) => {
                error!("Read error: {e}");
                let _ = event_tx.send(ChannelEvent::Fault(e.to_string())).await;
                break;
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut writer_rx: mpsc::Receiver<WriterOp>,
    event_tx: mpsc::Sender<ChannelEvent>,
) {
    loop {
        match writer_rx.recv().await {
            Some(WriterOp::Frame(message)) => {
                let frame = encode_frame(&message);
                if let Err(e) = writer.write_all(frame.as_bytes()).await {
                    error!("Write error: {e}");
                    let _ = event_tx.send(ChannelEvent::Fault(e.to_string())).await;
                    break;
                }
                debug!("Sent: {}", frame.trim_end());
            }
            Some(WriterOp::Shutdown) | None => {
                let _ = writer.shutdown().await;
                let _ = event_tx.send(ChannelEvent::Closed).await;
                break;
            }
        }
    }
}
