//! Backing store for client records.
//!
//! The server only ever touches persisted client data through the
//! [`ClientStore`] trait; schema ownership is external. [`MemoryStore`]
//! is the in-process implementation used by tests and embedders that do
//! not need durability.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use parley_auth::derive_password_hash;

/// Read/write access to persisted client records.
///
/// All methods are called from the single dispatch task, so implementations
/// only need interior mutability, not transactional semantics.
pub trait ClientStore: Send + Sync + 'static {
    /// Returns `true` if `name` is a known account.
    fn check_user(&self, name: &str) -> bool;

    /// Returns the stored password hash for `name`.
    fn get_hash(&self, name: &str) -> Option<Vec<u8>>;

    /// Returns the last known public key for `name`.
    fn get_pubkey(&self, name: &str) -> Option<String>;

    /// Records a successful login with the client's address and key.
    fn user_login(&self, name: &str, ip: IpAddr, port: u16, pubkey: &str);

    /// Records a logout.
    fn user_logout(&self, name: &str);

    /// Returns `name`'s contact list.
    fn get_contacts(&self, name: &str) -> Vec<String>;

    /// Adds `contact` to `owner`'s contact list.
    fn add_contact(&self, owner: &str, contact: &str);

    /// Removes `contact` from `owner`'s contact list.
    fn remove_contact(&self, owner: &str, contact: &str);

    /// Returns all known account names.
    fn users_list(&self) -> Vec<String>;

    /// Bumps the sent/received counters for a routed message.
    fn process_message(&self, sender: &str, destination: &str);
}

#[derive(Debug, Clone, Default)]
struct ClientRecord {
    password_hash: Vec<u8>,
    public_key: Option<String>,
    contacts: HashSet<String>,
    last_addr: Option<(IpAddr, u16)>,
    last_login: Option<DateTime<Utc>>,
    messages_sent: u64,
    messages_received: u64,
}

/// In-memory [`ClientStore`] backed by a `RwLock`ed map.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, ClientRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an account, deriving and storing the password hash.
    pub fn create_user(&self, name: &str, password: &str) {
        let record = ClientRecord {
            password_hash: derive_password_hash(password, name).to_vec(),
            ..ClientRecord::default()
        };
        self.records.write().unwrap().insert(name.to_string(), record);
    }

    /// Returns the (sent, received) message counters for `name`.
    pub fn message_counts(&self, name: &str) -> Option<(u64, u64)> {
        self.records
            .read()
            .unwrap()
            .get(name)
            .map(|r| (r.messages_sent, r.messages_received))
    }

    /// Returns the last address `name` logged in from.
    pub fn last_addr(&self, name: &str) -> Option<(IpAddr, u16)> {
        self.records.read().unwrap().get(name).and_then(|r| r.last_addr)
    }
}

impl ClientStore for MemoryStore {
    fn check_user(&self, name: &str) -> bool {
        self.records.read().unwrap().contains_key(name)
    }

    fn get_hash(&self, name: &str) -> Option<Vec<u8>> {
        self.records
            .read()
            .unwrap()
            .get(name)
            .map(|r| r.password_hash.clone())
    }

    fn get_pubkey(&self, name: &str) -> Option<String> {
        self.records
            .read()
            .unwrap()
            .get(name)
            .and_then(|r| r.public_key.clone())
    }

    fn user_login(&self, name: &str, ip: IpAddr, port: u16, pubkey: &str) {
        if let Some(record) = self.records.write().unwrap().get_mut(name) {
            record.last_addr = Some((ip, port));
            record.last_login = Some(Utc::now());
            if !pubkey.is_empty() {
                record.public_key = Some(pubkey.to_string());
            }
        }
    }

    fn user_logout(&self, _name: &str) {
        // Login history keeps only the last address; nothing to erase.
    }

    fn get_contacts(&self, name: &str) -> Vec<String> {
        self.records
            .read()
            .unwrap()
            .get(name)
            .map(|r| {
                let mut contacts: Vec<String> = r.contacts.iter().cloned().collect();
                contacts.sort();
                contacts
            })
            .unwrap_or_default()
    }

    fn add_contact(&self, owner: &str, contact: &str) {
        if let Some(record) = self.records.write().unwrap().get_mut(owner) {
            record.contacts.insert(contact.to_string());
        }
    }

    fn remove_contact(&self, owner: &str, contact: &str) {
        if let Some(record) = self.records.write().unwrap().get_mut(owner) {
            record.contacts.remove(contact);
        }
    }

    fn users_list(&self) -> Vec<String> {
        let mut users: Vec<String> = self.records.read().unwrap().keys().cloned().collect();
        users.sort();
        users
    }

    fn process_message(&self, sender: &str, destination: &str) {
        let mut records = self.records.write().unwrap();
        if let Some(record) = records.get_mut(sender) {
            record.messages_sent += 1;
        }
        if let Some(record) = records.get_mut(destination) {
            record.messages_received += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn create_and_check_user() {
        let store = MemoryStore::new();
        assert!(!store.check_user("alice"));
        store.create_user("alice", "secret");
        assert!(store.check_user("alice"));
    }

    #[test]
    fn stored_hash_matches_derivation() {
        let store = MemoryStore::new();
        store.create_user("alice", "secret");
        let stored = store.get_hash("alice").unwrap();
        assert_eq!(stored, derive_password_hash("secret", "alice").to_vec());
    }

    #[test]
    fn unknown_user_has_no_hash() {
        let store = MemoryStore::new();
        assert!(store.get_hash("ghost").is_none());
    }

    #[test]
    fn login_records_address_and_key() {
        let store = MemoryStore::new();
        store.create_user("alice", "secret");
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        store.user_login("alice", ip, 54321, "pk-alice");
        assert_eq!(store.last_addr("alice"), Some((ip, 54321)));
        assert_eq!(store.get_pubkey("alice").as_deref(), Some("pk-alice"));
    }

    #[test]
    fn empty_pubkey_does_not_overwrite() {
        let store = MemoryStore::new();
        store.create_user("alice", "secret");
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        store.user_login("alice", ip, 1, "pk-alice");
        store.user_login("alice", ip, 2, "");
        assert_eq!(store.get_pubkey("alice").as_deref(), Some("pk-alice"));
    }

    #[test]
    fn contact_list_add_remove() {
        let store = MemoryStore::new();
        store.create_user("alice", "secret");
        store.add_contact("alice", "bob");
        store.add_contact("alice", "carol");
        assert_eq!(store.get_contacts("alice"), vec!["bob", "carol"]);

        store.remove_contact("alice", "bob");
        assert_eq!(store.get_contacts("alice"), vec!["carol"]);
    }

    #[test]
    fn contacts_for_unknown_user_empty() {
        let store = MemoryStore::new();
        assert!(store.get_contacts("ghost").is_empty());
    }

    #[test]
    fn users_list_is_sorted() {
        let store = MemoryStore::new();
        store.create_user("carol", "pw");
        store.create_user("alice", "pw");
        store.create_user("bob", "pw");
        assert_eq!(store.users_list(), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn message_counters() {
        let store = MemoryStore::new();
        store.create_user("alice", "pw");
        store.create_user("bob", "pw");
        store.process_message("alice", "bob");
        store.process_message("alice", "bob");
        assert_eq!(store.message_counts("alice"), Some((2, 0)));
        assert_eq!(store.message_counts("bob"), Some((0, 2)));
    }
}
