//! Session registry: the server's single source of truth for who is
//! currently connected.
//!
//! Membership in the registry and reachability as a message-delivery
//! target are the same set by construction; routing resolves destinations
//! exclusively through [`SessionRegistry::lookup`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::connection::ConnId;
use crate::store::ClientStore;

/// Failures of registry operations.
///
/// These are ordinary outcomes the dispatch loop turns into 400 replies,
/// not faults.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("name already taken: {0}")]
    NameTaken(String),
}

/// Maps logged-in user names to their connections.
///
/// Mutated only from the dispatch task, so no internal locking.
pub struct SessionRegistry {
    sessions: HashMap<String, ConnId>,
    store: Arc<dyn ClientStore>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn ClientStore>) -> Self {
        Self {
            sessions: HashMap::new(),
            store,
        }
    }

    /// Registers a freshly authenticated session and persists the login
    /// metadata (address, public key) to the backing store.
    pub fn register(
        &mut self,
        name: &str,
        conn: ConnId,
        addr: SocketAddr,
        pubkey: &str,
    ) -> Result<(), RegistryError> {
        if self.sessions.contains_key(name) {
            return Err(RegistryError::NameTaken(name.to_string()));
        }
        self.sessions.insert(name.to_string(), conn);
        self.store.user_login(name, addr.ip(), addr.port(), pubkey);
        Ok(())
    }

    /// Resolves a user name to its connection, if currently logged in.
    pub fn lookup(&self, name: &str) -> Option<ConnId> {
        self.sessions.get(name).copied()
    }

    /// Removes a session and records the logout. Idempotent.
    pub fn unregister(&mut self, name: &str) {
        if self.sessions.remove(name).is_some() {
            self.store.user_logout(name);
        }
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
