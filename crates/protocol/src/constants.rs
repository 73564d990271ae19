//! Protocol-level constants shared by client and server.

use std::time::Duration;

/// Maximum size of a single wire frame (envelope JSON), in bytes.
///
/// Chat messages are small; anything approaching this limit is a protocol
/// violation rather than a legitimate payload.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Per-connection outbound buffer capacity (frames).
///
/// The dispatch loop never blocks on a slow client: if this buffer fills,
/// the client is treated as unreachable and unregistered.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Connection attempts before giving up on an unreachable server.
pub const CONNECT_ATTEMPTS: u32 = 5;

/// Fixed delay between connection attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Time allowed for the full authentication handshake on either side.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a request/reply exchange once the session is running.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// PBKDF2 iteration count for password-hash derivation.
///
/// Must match between the server's stored hashes and the client's
/// re-derivation at login.
pub const PBKDF2_ROUNDS: u32 = 10_000;

/// Length of the server-issued random challenge, in bytes.
pub const CHALLENGE_LEN: usize = 32;
