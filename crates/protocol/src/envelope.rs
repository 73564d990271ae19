//! The JSON message envelope exchanged between client and server.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{Action, Status, UserCredentials};

/// A single protocol message.
///
/// Every envelope carries either an `action` (a request or a routed chat
/// message) or a `response` (a status code), plus whichever payload fields
/// that shape uses. `None` fields are omitted from the wire entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Status>,
    /// Unix timestamp (seconds) at creation.
    pub time: i64,
    /// Identity block of a `presence` request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserCredentials>,
    /// Subject user of a contact/key operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    /// Opaque payload: base64 challenge nonce, hex digest, or public key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Target user of a routed chat message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Originating user of a routed chat message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_text: Option<String>,
    /// Contact or user list in a 202 reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_info: Option<Vec<String>>,
    /// Human-readable error text in a 400 reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    fn base() -> Self {
        Self {
            action: None,
            response: None,
            time: Utc::now().timestamp(),
            user: None,
            account_name: None,
            data: None,
            destination: None,
            sender: None,
            message_text: None,
            list_info: None,
            error: None,
        }
    }

    fn action(action: Action) -> Self {
        Self {
            action: Some(action),
            ..Self::base()
        }
    }

    /// Bare status reply.
    pub fn response(status: Status) -> Self {
        Self {
            response: Some(status),
            ..Self::base()
        }
    }

    // -- requests -----------------------------------------------------------

    /// Session-establishment request opening the auth handshake.
    pub fn presence(user: UserCredentials) -> Self {
        Self {
            user: Some(user),
            ..Self::action(Action::Presence)
        }
    }

    /// A chat message from `sender` addressed to `destination`.
    pub fn chat_message(
        sender: impl Into<String>,
        destination: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            sender: Some(sender.into()),
            destination: Some(destination.into()),
            message_text: Some(text.into()),
            ..Self::action(Action::Message)
        }
    }

    /// Graceful logout. The server resolves the session from the socket.
    pub fn exit() -> Self {
        Self::action(Action::Exit)
    }

    /// Fetch the caller's contact list.
    pub fn get_contacts() -> Self {
        Self::action(Action::GetContacts)
    }

    /// Fetch all known users.
    pub fn users_request() -> Self {
        Self::action(Action::UsersRequest)
    }

    /// Add `contact` to the caller's contact list.
    pub fn add_contact(contact: impl Into<String>) -> Self {
        Self {
            account_name: Some(contact.into()),
            ..Self::action(Action::AddContact)
        }
    }

    /// Remove `contact` from the caller's contact list.
    pub fn remove_contact(contact: impl Into<String>) -> Self {
        Self {
            account_name: Some(contact.into()),
            ..Self::action(Action::RemoveContact)
        }
    }

    /// Fetch `name`'s public key.
    pub fn public_key_request(name: impl Into<String>) -> Self {
        Self {
            account_name: Some(name.into()),
            ..Self::action(Action::PublicKeyRequest)
        }
    }

    /// Client half of the challenge-response: hex digest in `data`.
    pub fn challenge_response(digest_hex: impl Into<String>) -> Self {
        Self {
            data: Some(digest_hex.into()),
            ..Self::response(Status::AuthChallenge)
        }
    }

    // -- replies ------------------------------------------------------------

    /// 200 acknowledgement.
    pub fn ok() -> Self {
        Self::response(Status::Ok)
    }

    /// 400 reply with error text.
    pub fn bad_request(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::response(Status::Error)
        }
    }

    /// Server half of the challenge-response: base64 nonce in `data`.
    pub fn challenge(nonce_b64: impl Into<String>) -> Self {
        Self {
            data: Some(nonce_b64.into()),
            ..Self::response(Status::AuthChallenge)
        }
    }

    /// 202 reply carrying a contact or user list.
    pub fn list_reply(list: Vec<String>) -> Self {
        Self {
            list_info: Some(list),
            ..Self::response(Status::Data)
        }
    }

    /// 511 reply carrying a requested public key.
    pub fn key_reply(public_key: impl Into<String>) -> Self {
        Self {
            data: Some(public_key.into()),
            ..Self::response(Status::AuthChallenge)
        }
    }

    /// 205 service notification: cached lists are stale.
    pub fn lists_changed() -> Self {
        Self::response(Status::ListsChanged)
    }

    // -- shape checks -------------------------------------------------------

    /// Returns `true` if the envelope carries neither an action nor a
    /// response — a shape the protocol never produces.
    pub fn is_malformed(&self) -> bool {
        self.action.is_none() && self.response.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_roundtrip() {
        let env = Envelope::presence(UserCredentials {
            account_name: "alice".into(),
            public_key: "pk".into(),
        });
        let json = serde_json::to_string(&env).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, env);
        assert_eq!(parsed.action, Some(Action::Presence));
        assert_eq!(parsed.user.unwrap().account_name, "alice");
    }

    #[test]
    fn chat_message_roundtrip() {
        let env = Envelope::chat_message("alice", "bob", "hi");
        let json = serde_json::to_string(&env).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, env);
        assert_eq!(parsed.sender.as_deref(), Some("alice"));
        assert_eq!(parsed.destination.as_deref(), Some("bob"));
        assert_eq!(parsed.message_text.as_deref(), Some("hi"));
    }

    #[test]
    fn omits_null_fields() {
        let json = serde_json::to_string(&Envelope::ok()).unwrap();
        assert!(json.contains("\"response\":200"));
        assert!(!json.contains("action"));
        assert!(!json.contains("error"));
        assert!(!json.contains("list_info"));
    }

    #[test]
    fn bad_request_carries_error_text() {
        let env = Envelope::bad_request("user not registered");
        assert_eq!(env.response, Some(Status::Error));
        assert_eq!(env.error.as_deref(), Some("user not registered"));
    }

    #[test]
    fn challenge_and_response_share_status() {
        let challenge = Envelope::challenge("bm9uY2U=");
        let answer = Envelope::challenge_response("deadbeef");
        assert_eq!(challenge.response, Some(Status::AuthChallenge));
        assert_eq!(answer.response, Some(Status::AuthChallenge));
        assert_eq!(challenge.data.as_deref(), Some("bm9uY2U="));
        assert_eq!(answer.data.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn list_reply_roundtrip() {
        let env = Envelope::list_reply(vec!["bob".into(), "carol".into()]);
        let json = serde_json::to_string(&env).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.response, Some(Status::Data));
        assert_eq!(parsed.list_info.unwrap(), vec!["bob", "carol"]);
    }

    #[test]
    fn missing_optionals_parse_as_none() {
        let parsed: Envelope = serde_json::from_str(r#"{"action":"exit","time":0}"#).unwrap();
        assert_eq!(parsed.action, Some(Action::Exit));
        assert!(parsed.response.is_none());
        assert!(parsed.sender.is_none());
    }

    #[test]
    fn malformed_shape_detected() {
        let parsed: Envelope = serde_json::from_str(r#"{"time":0}"#).unwrap();
        assert!(parsed.is_malformed());
        assert!(!Envelope::exit().is_malformed());
    }

    #[test]
    fn unknown_action_rejected() {
        let result: Result<Envelope, _> =
            serde_json::from_str(r#"{"action":"teleport","time":0}"#);
        assert!(result.is_err());
    }
}
