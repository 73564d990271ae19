//! The chat relay server: accept loop plus the single dispatch task.
//!
//! One task owns all state ([`ServerState`]) and routes every event:
//! newly accepted sockets, decoded frames, and connection closures.
//! Per-connection I/O runs in the pump tasks, so a slow client never
//! blocks dispatch.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use parley_protocol::HANDSHAKE_TIMEOUT;

use crate::ServerError;
use crate::connection::{ConnEvent, ConnId, spawn_connection};
use crate::dispatch::ServerState;
use crate::store::ClientStore;

/// Capacity of the shared pump-to-dispatch event channel.
const EVENT_BUFFER: usize = 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub bind: SocketAddr,
    /// Grace period for a fresh connection to complete authentication.
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: ([0, 0, 0, 0], 0).into(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

/// The chat relay server.
pub struct ChatServer {
    config: ServerConfig,
    store: Arc<dyn ClientStore>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ChatServer {
    /// Creates a server over the given backing store.
    pub fn new(config: ServerConfig, store: Arc<dyn ClientStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the bound address. Only available after [`run`](Self::run)
    /// binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Gracefully shuts down the server and all connections.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the accept/dispatch loop until cancellation.
    ///
    /// A failed bind is the only fatal error; everything after that is
    /// isolated per connection.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        info!("chat server listening on {local_addr}");

        let (events_tx, mut events_rx) = mpsc::channel::<ConnEvent>(EVENT_BUFFER);
        let mut state = ServerState::new(self.store.clone());
        let mut next_id: ConnId = 0;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("server shutting down");
                    break Ok(());
                }

                result = listener.accept() => match result {
                    Ok((stream, peer_addr)) => {
                        next_id += 1;
                        let id = next_id;
                        let handle =
                            spawn_connection(stream, id, events_tx.clone(), &self.cancel);
                        state.add_conn(id, handle, peer_addr);

                        // Pending sockets do not get to sit unauthenticated
                        // forever.
                        let deadline_tx = events_tx.clone();
                        let deadline = self.config.handshake_timeout;
                        tokio::spawn(async move {
                            tokio::time::sleep(deadline).await;
                            let _ = deadline_tx.send(ConnEvent::AuthDeadline { id }).await;
                        });
                    }
                    Err(e) => error!("accept error: {e}"),
                },

                Some(event) = events_rx.recv() => state.handle_event(event),
            }
        }
    }
}
