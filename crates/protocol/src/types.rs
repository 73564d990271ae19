//! Action and status-code vocabulary of the chat protocol.

use serde::{Deserialize, Serialize};

/// Request kind carried in the `action` field of an [`Envelope`].
///
/// [`Envelope`]: crate::envelope::Envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Session-establishment request (starts the auth handshake).
    #[serde(rename = "presence")]
    Presence,
    /// A chat message routed to another user.
    #[serde(rename = "message")]
    Message,
    /// Graceful logout.
    #[serde(rename = "exit")]
    Exit,
    /// Fetch the caller's contact list.
    #[serde(rename = "get_contacts")]
    GetContacts,
    /// Add a user to the caller's contact list.
    #[serde(rename = "add_contact")]
    AddContact,
    /// Remove a user from the caller's contact list.
    #[serde(rename = "remove_contact")]
    RemoveContact,
    /// Fetch the list of all known users.
    #[serde(rename = "users_request")]
    UsersRequest,
    /// Fetch another user's public key.
    #[serde(rename = "public_key_request")]
    PublicKeyRequest,
}

/// Status code carried in the `response` field of an [`Envelope`].
///
/// Serialized as the bare integer, matching the numeric codes on the wire.
///
/// [`Envelope`]: crate::envelope::Envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Status {
    /// OK / acknowledged.
    Ok = 200,
    /// Data reply; payload in `list_info` or `data`.
    Data = 202,
    /// Cached contact/user lists are stale; re-fetch them.
    ListsChanged = 205,
    /// Bad request or error; details in `error`.
    Error = 400,
    /// Authentication challenge or challenge response; nonce/digest in `data`.
    AuthChallenge = 511,
}

impl From<Status> for u16 {
    fn from(status: Status) -> u16 {
        status as u16
    }
}

impl TryFrom<u16> for Status {
    type Error = UnknownStatus;

    fn try_from(code: u16) -> Result<Self, UnknownStatus> {
        match code {
            200 => Ok(Status::Ok),
            202 => Ok(Status::Data),
            205 => Ok(Status::ListsChanged),
            400 => Ok(Status::Error),
            511 => Ok(Status::AuthChallenge),
            other => Err(UnknownStatus(other)),
        }
    }
}

/// A `response` field carried a code outside the protocol vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown status code {0}")]
pub struct UnknownStatus(pub u16);

/// Identity block sent with a `presence` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredentials {
    pub account_name: String,
    pub public_key: String,
}
