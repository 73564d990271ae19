//! Per-connection plumbing: read/write pumps and the outbound sender.
//!
//! Each accepted socket gets a read pump (frames forwarded to the dispatch
//! task's event channel) and a write pump (bounded buffer drained to the
//! socket). The dispatch task never touches a socket directly, so one slow
//! or dead client cannot stall it.

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parley_protocol::{Envelope, SEND_BUFFER_SIZE};
use parley_wire::{WireError, read_frame, write_frame};

/// Identifies one accepted connection for the lifetime of the server.
pub type ConnId = u64;

/// Events flowing from the connection pumps into the dispatch task.
pub(crate) enum ConnEvent {
    /// One complete, well-formed frame.
    Frame { id: ConnId, envelope: Envelope },
    /// A frame arrived but its payload did not decode. The framing layer
    /// is still in sync, so the connection survives.
    Malformed { id: ConnId },
    /// The connection is gone (EOF, I/O error, or server-initiated close).
    Closed { id: ConnId },
    /// The handshake grace period elapsed; close the connection if it has
    /// not authenticated by now.
    AuthDeadline { id: ConnId },
}

/// Error returned when the outbound buffer is full or the peer is gone.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub(crate) struct SendError;

/// Handle for queueing frames to one client.
///
/// Cloneable and cheap. `send` never blocks the dispatch task: a full
/// buffer is reported as [`SendError`], which routing treats as the
/// client being unreachable.
#[derive(Clone)]
pub(crate) struct ClientSender {
    tx: mpsc::Sender<Envelope>,
}

impl ClientSender {
    pub(crate) fn new(tx: mpsc::Sender<Envelope>) -> Self {
        Self { tx }
    }

    pub(crate) fn send(&self, envelope: Envelope) -> Result<(), SendError> {
        self.tx.try_send(envelope).map_err(|_| SendError)
    }

    pub(crate) fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Handle the dispatch task keeps per connection.
pub(crate) struct ConnHandle {
    pub(crate) sender: ClientSender,
    cancel: CancellationToken,
}

impl ConnHandle {
    pub(crate) fn new(sender: ClientSender, cancel: CancellationToken) -> Self {
        Self { sender, cancel }
    }

    /// Signals both pumps to stop. Queued replies are flushed first.
    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }
}

/// Spawns the read and write pumps for an accepted socket.
pub(crate) fn spawn_connection(
    stream: TcpStream,
    id: ConnId,
    events: mpsc::Sender<ConnEvent>,
    server_cancel: &CancellationToken,
) -> ConnHandle {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Envelope>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();

    let handle = ConnHandle::new(ClientSender::new(tx), cancel.clone());

    // Read pump: frames in, events out.
    let read_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = read_cancel.cancelled() => break,

                result = read_frame(&mut reader) => match result {
                    Ok(envelope) => {
                        if events.send(ConnEvent::Frame { id, envelope }).await.is_err() {
                            break;
                        }
                    }
                    Err(WireError::Decode(e)) => {
                        warn!(conn = id, "protocol violation, undecodable frame: {e}");
                        if events.send(ConnEvent::Malformed { id }).await.is_err() {
                            break;
                        }
                    }
                    Err(WireError::Closed) => break,
                    Err(e) => {
                        debug!(conn = id, "read error: {e}");
                        break;
                    }
                },
            }
        }
        // Single cleanup path: the dispatch task reacts to Closed whether
        // the peer disconnected or the server closed the connection.
        let _ = events.send(ConnEvent::Closed { id }).await;
        read_cancel.cancel();
    });

    // Write pump: drains the outbound buffer.
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Flush replies queued before the close decision (a 400
                    // verdict must reach the peer before the socket drops).
                    while let Ok(envelope) = rx.try_recv() {
                        if write_frame(&mut writer, &envelope).await.is_err() {
                            break;
                        }
                    }
                    break;
                }

                maybe = rx.recv() => match maybe {
                    Some(envelope) => {
                        if let Err(e) = write_frame(&mut writer, &envelope).await {
                            debug!(conn = id, "write error: {e}");
                            cancel.cancel();
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        use tokio::io::AsyncWriteExt;
        let _ = writer.shutdown().await;
    });

    handle
}
