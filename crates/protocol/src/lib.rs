//! Wire protocol types for the parley chat relay.
//!
//! Defines the JSON message envelope exchanged between client and server,
//! the action and status-code vocabulary, and the protocol-level constants
//! (timeouts, retry budgets, frame limits) shared by both sides.

pub mod constants;
pub mod envelope;
pub mod types;

pub use constants::*;
pub use envelope::Envelope;
pub use types::{Action, Status, UserCredentials};
