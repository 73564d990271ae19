//! Frame routing and the per-connection authentication state machine.
//!
//! All of [`ServerState`] lives on the single dispatch task; handlers take
//! it by reference, so multiple independent servers can coexist in one
//! process (nothing here is global).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, info, warn};

use parley_auth::{compute_challenge_digest, digests_match, generate_challenge};
use parley_protocol::{Action, CHALLENGE_LEN, Envelope, Status};

use crate::connection::{ConnEvent, ConnHandle, ConnId};
use crate::registry::SessionRegistry;
use crate::store::ClientStore;

/// Lifecycle of one client connection.
#[derive(Clone)]
enum Phase {
    /// Socket accepted, nothing received yet.
    Connected,
    /// Presence received, challenge issued, awaiting the digest.
    ChallengeSent {
        username: String,
        public_key: String,
        challenge: [u8; CHALLENGE_LEN],
    },
    /// Handshake complete; the user is in the session registry.
    Authenticated { username: String },
}

struct Conn {
    handle: ConnHandle,
    addr: SocketAddr,
    phase: Phase,
}

/// All mutable server state, owned by the dispatch task.
pub(crate) struct ServerState {
    store: Arc<dyn ClientStore>,
    registry: SessionRegistry,
    conns: HashMap<ConnId, Conn>,
}

impl ServerState {
    pub(crate) fn new(store: Arc<dyn ClientStore>) -> Self {
        Self {
            registry: SessionRegistry::new(store.clone()),
            store,
            conns: HashMap::new(),
        }
    }

    /// Tracks a freshly accepted connection.
    pub(crate) fn add_conn(&mut self, id: ConnId, handle: ConnHandle, addr: SocketAddr) {
        info!(conn = id, peer = %addr, "connection accepted");
        self.conns.insert(
            id,
            Conn {
                handle,
                addr,
                phase: Phase::Connected,
            },
        );
    }

    pub(crate) fn handle_event(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::Frame { id, envelope } => self.handle_frame(id, envelope),
            ConnEvent::Malformed { id } => {
                self.reply(id, Envelope::bad_request("bad request"));
            }
            ConnEvent::Closed { id } => self.cleanup(id),
            ConnEvent::AuthDeadline { id } => {
                if let Some(conn) = self.conns.get(&id)
                    && !matches!(conn.phase, Phase::Authenticated { .. })
                {
                    warn!(conn = id, "handshake timed out");
                    conn.handle.close();
                }
            }
        }
    }

    fn handle_frame(&mut self, id: ConnId, envelope: Envelope) {
        let Some(conn) = self.conns.get(&id) else {
            // Events can trail behind a close; nothing left to do.
            return;
        };

        if envelope.is_malformed() {
            warn!(conn = id, "protocol violation: envelope without action or response");
            self.reply(id, Envelope::bad_request("bad request"));
            return;
        }

        match conn.phase.clone() {
            Phase::Connected => self.handle_presence(id, envelope),
            Phase::ChallengeSent {
                username,
                public_key,
                challenge,
            } => self.handle_challenge_answer(id, username, public_key, challenge, envelope),
            Phase::Authenticated { username } => {
                self.handle_session_frame(id, username, envelope)
            }
        }
    }

    // -- handshake ----------------------------------------------------------

    fn handle_presence(&mut self, id: ConnId, envelope: Envelope) {
        if envelope.action != Some(Action::Presence) {
            self.refuse(id, "authentication required");
            return;
        }
        let Some(user) = envelope.user else {
            self.refuse(id, "presence without user block");
            return;
        };

        if self.registry.lookup(&user.account_name).is_some() {
            warn!(conn = id, user = %user.account_name, "name already taken");
            self.refuse(id, "name already taken");
            return;
        }
        if !self.store.check_user(&user.account_name) {
            warn!(conn = id, user = %user.account_name, "unknown user");
            self.refuse(id, "user not registered");
            return;
        }

        let challenge = generate_challenge();
        self.reply(id, Envelope::challenge(BASE64.encode(challenge)));
        if let Some(conn) = self.conns.get_mut(&id) {
            conn.phase = Phase::ChallengeSent {
                username: user.account_name,
                public_key: user.public_key,
                challenge,
            };
        }
    }

    fn handle_challenge_answer(
        &mut self,
        id: ConnId,
        username: String,
        public_key: String,
        challenge: [u8; CHALLENGE_LEN],
        envelope: Envelope,
    ) {
        // No retries within a handshake attempt: any unexpected shape or a
        // wrong digest closes the pending connection.
        if envelope.response != Some(Status::AuthChallenge) {
            self.refuse(id, "expected challenge response");
            return;
        }
        let submitted = envelope
            .data
            .as_deref()
            .and_then(|d| hex::decode(d).ok());
        let Some(submitted) = submitted else {
            self.refuse(id, "bad digest encoding");
            return;
        };

        let Some(stored_hash) = self.store.get_hash(&username) else {
            self.refuse(id, "user not registered");
            return;
        };
        let expected = compute_challenge_digest(&stored_hash, &challenge);
        if !digests_match(&expected, &submitted) {
            warn!(conn = id, user = %username, "authentication failed: wrong digest");
            self.refuse(id, "authentication failed");
            return;
        }

        let addr = match self.conns.get(&id) {
            Some(conn) => conn.addr,
            None => return,
        };
        if let Err(e) = self.registry.register(&username, id, addr, &public_key) {
            // A second login for the same name slipped in between the
            // challenge and the answer; the existing session wins.
            warn!(conn = id, user = %username, "{e}");
            self.refuse(id, "name already taken");
            return;
        }

        if let Some(conn) = self.conns.get_mut(&id) {
            conn.phase = Phase::Authenticated {
                username: username.clone(),
            };
        }
        info!(conn = id, user = %username, "authenticated");
        self.reply(id, Envelope::ok());
        self.broadcast_lists_changed(id);
    }

    // -- authenticated traffic ----------------------------------------------

    fn handle_session_frame(&mut self, id: ConnId, username: String, envelope: Envelope) {
        let Some(action) = envelope.action else {
            self.reply(id, Envelope::bad_request("bad request"));
            return;
        };

        match action {
            Action::Message => self.route_message(id, &username, envelope),
            Action::Exit => {
                info!(conn = id, user = %username, "client exit");
                self.registry.unregister(&username);
                self.close_conn(id);
            }
            Action::GetContacts => {
                let contacts = self.store.get_contacts(&username);
                self.reply(id, Envelope::list_reply(contacts));
            }
            Action::UsersRequest => {
                self.reply(id, Envelope::list_reply(self.store.users_list()));
            }
            Action::AddContact => match envelope.account_name {
                Some(contact) if self.store.check_user(&contact) => {
                    self.store.add_contact(&username, &contact);
                    self.reply(id, Envelope::ok());
                }
                Some(_) => self.reply(id, Envelope::bad_request("user not found")),
                None => self.reply(id, Envelope::bad_request("missing account_name")),
            },
            Action::RemoveContact => match envelope.account_name {
                Some(contact) => {
                    self.store.remove_contact(&username, &contact);
                    self.reply(id, Envelope::ok());
                }
                None => self.reply(id, Envelope::bad_request("missing account_name")),
            },
            Action::PublicKeyRequest => match envelope.account_name {
                Some(name) => match self.store.get_pubkey(&name) {
                    Some(key) => self.reply(id, Envelope::key_reply(key)),
                    None => self.reply(
                        id,
                        Envelope::bad_request("no public key for user"),
                    ),
                },
                None => self.reply(id, Envelope::bad_request("missing account_name")),
            },
            Action::Presence => {
                self.reply(id, Envelope::bad_request("already authenticated"));
            }
        }
    }

    fn route_message(&mut self, id: ConnId, username: &str, envelope: Envelope) {
        if envelope.sender.as_deref() != Some(username) {
            warn!(
                conn = id,
                user = %username,
                claimed = ?envelope.sender,
                "protocol violation: sender does not match session"
            );
            self.reply(id, Envelope::bad_request("sender does not match session"));
            return;
        }
        let Some(destination) = envelope.destination.clone() else {
            self.reply(id, Envelope::bad_request("missing destination"));
            return;
        };

        let Some(dest_id) = self.registry.lookup(&destination) else {
            self.reply(
                id,
                Envelope::bad_request("user is not registered on the server"),
            );
            return;
        };

        let delivered = self
            .conns
            .get(&dest_id)
            .map(|c| c.handle.sender.send(envelope).is_ok())
            .unwrap_or(false);

        if delivered {
            self.store.process_message(username, &destination);
            self.reply(id, Envelope::ok());
            debug!(from = %username, to = %destination, "message routed");
        } else {
            // The registry said reachable but the buffer is gone or full:
            // treat the destination as disconnected.
            warn!(user = %destination, "unreachable destination, unregistering");
            self.registry.unregister(&destination);
            self.close_conn(dest_id);
            self.reply(
                id,
                Envelope::bad_request("user is not registered on the server"),
            );
        }
    }

    // -- lifecycle ----------------------------------------------------------

    fn cleanup(&mut self, id: ConnId) {
        let Some(conn) = self.conns.remove(&id) else {
            return;
        };
        conn.handle.close();
        if let Phase::Authenticated { username } = conn.phase {
            info!(conn = id, user = %username, "client disconnected");
            self.registry.unregister(&username);
            self.broadcast_lists_changed(id);
        } else {
            debug!(conn = id, "connection closed before authentication");
        }
    }

    /// Queues a reply; an undeliverable reply closes the connection.
    fn reply(&self, id: ConnId, envelope: Envelope) {
        if let Some(conn) = self.conns.get(&id)
            && conn.handle.sender.send(envelope).is_err()
        {
            conn.handle.close();
        }
    }

    /// 400 + close: the terminal answer for handshake failures.
    fn refuse(&self, id: ConnId, error: &str) {
        self.reply(id, Envelope::bad_request(error));
        self.close_conn(id);
    }

    fn close_conn(&self, id: ConnId) {
        if let Some(conn) = self.conns.get(&id) {
            conn.handle.close();
        }
    }

    /// Tells every other authenticated client to refresh its lists.
    fn broadcast_lists_changed(&self, origin: ConnId) {
        for (&other, conn) in &self.conns {
            if other != origin && matches!(conn.phase, Phase::Authenticated { .. }) {
                let _ = conn.handle.sender.send(Envelope::lists_changed());
            }
        }
    }
}
