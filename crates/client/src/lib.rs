//! Client transport for the parley chat relay.
//!
//! Connects with a bounded retry budget, performs the challenge-response
//! handshake, then runs a background read pump alongside on-demand request
//! methods. Server-pushed traffic (routed messages, list-staleness
//! notifications, connection loss) is surfaced on an event channel the
//! embedding application drains; no UI toolkit coupling.

mod handshake;
pub mod transport;
pub mod types;

pub use transport::ChatClient;
pub use types::{ClientConfig, ClientEvent};

use parley_wire::WireError;

/// Errors surfaced by the client transport.
///
/// `ServerUnreachable` and `AuthFailed` are fatal: the transport never
/// came up. `Server` carries an ordinary 400 reply (for example
/// "destination not registered") so the caller can display it.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot reach server after {attempts} attempts")]
    ServerUnreachable { attempts: u32 },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("server error: {error}")]
    Server { error: String },

    #[error("request timed out")]
    Timeout,

    #[error("connection lost")]
    ConnectionLost,

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error(transparent)]
    Wire(#[from] WireError),
}
