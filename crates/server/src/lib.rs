//! Chat relay server.
//!
//! A single dispatch task owns all session state and routes frames between
//! authenticated clients: accept loop, challenge-response authentication,
//! session registry, and per-connection read/write pumps. One misbehaving
//! client never affects another; the only fatal error is a failed bind.

mod connection;
mod dispatch;
pub mod registry;
pub mod server;
pub mod store;

pub use registry::{RegistryError, SessionRegistry};
pub use server::{ChatServer, ServerConfig};
pub use store::{ClientStore, MemoryStore};

/// Errors that abort server startup.
///
/// Everything past a successful bind is handled per connection and logged;
/// it never surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
