//! The client transport: connection, pumps, and request methods.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_auth::derive_password_hash;
use parley_protocol::{Action, Envelope, Status};
use parley_wire::{WireError, read_frame, write_frame};

use crate::ClientError;
use crate::handshake::perform_handshake;
use crate::types::{ClientConfig, ClientEvent};

/// Outbound frame buffer capacity.
const WRITE_BUFFER: usize = 64;

/// Push-event buffer capacity.
const EVENT_BUFFER: usize = 64;

/// Slot for the reply to the single outstanding request.
type Pending = Arc<Mutex<Option<oneshot::Sender<Envelope>>>>;

/// A connected, authenticated chat client.
///
/// Requests serialize through an internal gate: exactly one outstanding
/// request at a time, so replies correlate by order. Server-pushed frames
/// (routed messages, 205 notifications) arrive on the event channel
/// returned by [`take_events`](Self::take_events).
pub struct ChatClient {
    username: String,
    request_timeout: Duration,
    write_tx: mpsc::Sender<Envelope>,
    pending: Pending,
    request_gate: Mutex<()>,
    events_rx: Mutex<Option<mpsc::Receiver<ClientEvent>>>,
    cancel: CancellationToken,
    _read_handle: JoinHandle<()>,
    _write_handle: JoinHandle<()>,
}

impl ChatClient {
    /// Connects, authenticates, and starts the pumps.
    ///
    /// The password is consumed locally to derive the password hash; it is
    /// never transmitted. Fatal outcomes: [`ClientError::ServerUnreachable`]
    /// after the retry budget, [`ClientError::AuthFailed`] on a 400 verdict.
    pub async fn connect(config: ClientConfig, password: &str) -> Result<Self, ClientError> {
        let password_hash = derive_password_hash(password, &config.username);

        let mut stream = connect_with_retries(&config).await?;
        tokio::time::timeout(
            config.handshake_timeout,
            perform_handshake(&mut stream, &config, &password_hash),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;
        info!(user = %config.username, server = %config.addr, "session established");

        let (reader, mut writer) = stream.into_split();
        let (write_tx, mut write_rx) = mpsc::channel::<Envelope>(WRITE_BUFFER);
        let (events_tx, events_rx) = mpsc::channel::<ClientEvent>(EVENT_BUFFER);
        let pending: Pending = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            // Flush what was queued before the stop (the
                            // best-effort exit notice lives here).
                            while let Ok(envelope) = write_rx.try_recv() {
                                if write_frame(&mut writer, &envelope).await.is_err() {
                                    break;
                                }
                            }
                            break;
                        }
                        maybe = write_rx.recv() => match maybe {
                            Some(envelope) => {
                                if let Err(e) = write_frame(&mut writer, &envelope).await {
                                    debug!("write pump stopped: {e}");
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
            })
        };

        let read_handle = {
            let pending = pending.clone();
            let cancel = cancel.clone();
            tokio::spawn(read_pump(reader, pending, events_tx, cancel))
        };

        Ok(Self {
            username: config.username,
            request_timeout: config.request_timeout,
            write_tx,
            pending,
            request_gate: Mutex::new(()),
            events_rx: Mutex::new(Some(events_rx)),
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
        })
    }

    /// Takes the push-event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Account name this session authenticated as.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns `true` while the transport is up.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.write_tx.is_closed()
    }

    // -- requests -----------------------------------------------------------

    /// Sends a chat message and waits for the server's 200 ack.
    pub async fn send_text(
        &self,
        destination: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), ClientError> {
        let envelope = Envelope::chat_message(self.username.clone(), destination, text);
        let reply = self.request(envelope).await?;
        expect_ok(reply)
    }

    /// Fetches the caller's contact list.
    pub async fn contacts(&self) -> Result<Vec<String>, ClientError> {
        let reply = self.request(Envelope::get_contacts()).await?;
        expect_list(reply)
    }

    /// Fetches all known users.
    pub async fn users(&self) -> Result<Vec<String>, ClientError> {
        let reply = self.request(Envelope::users_request()).await?;
        expect_list(reply)
    }

    /// Adds a contact.
    pub async fn add_contact(&self, name: impl Into<String>) -> Result<(), ClientError> {
        let reply = self.request(Envelope::add_contact(name)).await?;
        expect_ok(reply)
    }

    /// Removes a contact.
    pub async fn remove_contact(&self, name: impl Into<String>) -> Result<(), ClientError> {
        let reply = self.request(Envelope::remove_contact(name)).await?;
        expect_ok(reply)
    }

    /// Fetches another user's public key.
    pub async fn public_key(&self, name: impl Into<String>) -> Result<String, ClientError> {
        let reply = self.request(Envelope::public_key_request(name)).await?;
        match (reply.response, reply.data) {
            (Some(Status::AuthChallenge), Some(key)) => Ok(key),
            (response, _) => Err(ClientError::UnexpectedReply(format!(
                "expected key-bearing 511, got {response:?}"
            ))),
        }
    }

    /// Stops the transport: best-effort exit notice, then pump shutdown.
    pub async fn close(&self) {
        let _ = self.write_tx.send(Envelope::exit()).await;
        self.cancel.cancel();
    }

    /// Writes a request and awaits the matching reply.
    async fn request(&self, envelope: Envelope) -> Result<Envelope, ClientError> {
        // One outstanding request per connection; replies correlate by order.
        let _gate = self.request_gate.lock().await;
        if self.cancel.is_cancelled() {
            return Err(ClientError::ConnectionLost);
        }

        let (tx, rx) = oneshot::channel();
        *self.pending.lock().await = Some(tx);

        if self.write_tx.send(envelope).await.is_err() {
            *self.pending.lock().await = None;
            return Err(ClientError::ConnectionLost);
        }

        let result = tokio::time::timeout(self.request_timeout, rx).await;
        // Clean up the slot on any exit path.
        *self.pending.lock().await = None;

        match result {
            Ok(Ok(reply)) => {
                if reply.response == Some(Status::Error) {
                    return Err(ClientError::Server {
                        error: reply.error.unwrap_or_else(|| "unknown error".into()),
                    });
                }
                Ok(reply)
            }
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => Err(ClientError::Timeout),
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
    }
}

fn expect_ok(reply: Envelope) -> Result<(), ClientError> {
    match reply.response {
        Some(Status::Ok) => Ok(()),
        other => Err(ClientError::UnexpectedReply(format!(
            "expected 200 ack, got {other:?}"
        ))),
    }
}

fn expect_list(reply: Envelope) -> Result<Vec<String>, ClientError> {
    match (reply.response, reply.list_info) {
        (Some(Status::Data), Some(list)) => Ok(list),
        (response, _) => Err(ClientError::UnexpectedReply(format!(
            "expected 202 list reply, got {response:?}"
        ))),
    }
}

/// Bounded connect loop with a fixed inter-attempt delay.
async fn connect_with_retries(config: &ClientConfig) -> Result<TcpStream, ClientError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match TcpStream::connect(&config.addr).await {
            Ok(stream) => {
                debug!(attempt, server = %config.addr, "connected");
                return Ok(stream);
            }
            Err(e) => {
                warn!(attempt, server = %config.addr, "connection attempt failed: {e}");
                if attempt >= config.connect_attempts {
                    return Err(ClientError::ServerUnreachable { attempts: attempt });
                }
                tokio::time::sleep(config.retry_delay).await;
            }
        }
    }
}

/// Receives server frames and routes them: replies to the pending request
/// slot, pushed traffic to the event channel.
async fn read_pump(
    mut reader: OwnedReadHalf,
    pending: Pending,
    events: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            // Deliberate stop: no ConnectionLost event.
            _ = cancel.cancelled() => return,

            result = read_frame(&mut reader) => match result {
                Ok(envelope) => route_inbound(envelope, &pending, &events).await,
                Err(WireError::Decode(e)) => {
                    // Framing is intact; skip the frame and keep reading.
                    warn!("undecodable frame from server: {e}");
                }
                Err(e) => {
                    debug!("read pump stopped: {e}");
                    break;
                }
            },
        }
    }
    cancel.cancel();
    let _ = events.send(ClientEvent::ConnectionLost).await;
}

async fn route_inbound(envelope: Envelope, pending: &Pending, events: &mpsc::Sender<ClientEvent>) {
    // 205 is a service notification, never the reply to a request.
    if envelope.response == Some(Status::ListsChanged) {
        let _ = events.send(ClientEvent::ListsChanged).await;
        return;
    }

    if envelope.response.is_some() {
        match pending.lock().await.take() {
            Some(tx) => {
                let _ = tx.send(envelope);
            }
            None => warn!(response = ?envelope.response, "unsolicited response dropped"),
        }
        return;
    }

    if envelope.action == Some(Action::Message) {
        match (envelope.sender, envelope.message_text) {
            (Some(sender), Some(text)) => {
                let _ = events
                    .send(ClientEvent::MessageReceived { sender, text })
                    .await;
            }
            _ => warn!("routed message missing sender or text"),
        }
        return;
    }

    warn!(action = ?envelope.action, "protocol violation: unroutable frame");
}
