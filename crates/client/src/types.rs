//! Public types for the client transport.

use std::time::Duration;

use parley_protocol::{
    CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY, HANDSHAKE_TIMEOUT, REQUEST_TIMEOUT,
};

/// Configuration for one client connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, `host:port`.
    pub addr: String,
    /// Account name to authenticate as.
    pub username: String,
    /// Public key announced with the presence request.
    pub public_key: String,
    /// Connection attempts before giving up.
    pub connect_attempts: u32,
    /// Fixed delay between connection attempts.
    pub retry_delay: Duration,
    /// Deadline for the whole authentication handshake.
    pub handshake_timeout: Duration,
    /// Deadline for each request/reply exchange.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Config with protocol-default timeouts and retry budget.
    pub fn new(
        addr: impl Into<String>,
        username: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            addr: addr.into(),
            username: username.into(),
            public_key: public_key.into(),
            connect_attempts: CONNECT_ATTEMPTS,
            retry_delay: CONNECT_RETRY_DELAY,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

/// Events pushed by the transport to the embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A routed chat message arrived.
    MessageReceived { sender: String, text: String },
    /// The server says cached contact/user lists are stale (205).
    ListsChanged,
    /// The connection dropped mid-session. Emitted exactly once; the
    /// transport is stopped afterwards.
    ConnectionLost,
}
