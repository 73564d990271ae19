//! The client half of the challenge-response handshake.
//!
//! Runs inline on the freshly connected socket, before the pumps start,
//! so the reply ordering is trivial: one frame out, one frame in.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::net::TcpStream;
use tracing::debug;

use parley_auth::{PASSWORD_HASH_LEN, compute_challenge_digest};
use parley_protocol::{Envelope, Status, UserCredentials};
use parley_wire::{read_frame, write_frame};

use crate::ClientError;
use crate::types::ClientConfig;

/// Sends the presence request and answers the server's challenge.
///
/// The plaintext password never leaves the process; only the keyed digest
/// of the server's nonce crosses the wire.
pub(crate) async fn perform_handshake(
    stream: &mut TcpStream,
    config: &ClientConfig,
    password_hash: &[u8; PASSWORD_HASH_LEN],
) -> Result<(), ClientError> {
    let presence = Envelope::presence(UserCredentials {
        account_name: config.username.clone(),
        public_key: config.public_key.clone(),
    });
    write_frame(stream, &presence).await?;

    let reply = read_frame(stream).await?;
    let challenge = match reply.response {
        Some(Status::AuthChallenge) => reply
            .data
            .ok_or_else(|| ClientError::UnexpectedReply("challenge without nonce".into()))?,
        Some(Status::Error) => {
            return Err(ClientError::AuthFailed(
                reply.error.unwrap_or_else(|| "rejected".into()),
            ));
        }
        _ => {
            return Err(ClientError::UnexpectedReply(format!(
                "expected 511 challenge, got {:?}",
                reply.response
            )));
        }
    };

    let nonce = BASE64
        .decode(challenge.as_bytes())
        .map_err(|e| ClientError::UnexpectedReply(format!("undecodable nonce: {e}")))?;
    let digest = compute_challenge_digest(password_hash, &nonce);
    debug!(user = %config.username, "answering auth challenge");
    write_frame(stream, &Envelope::challenge_response(hex::encode(digest))).await?;

    let verdict = read_frame(stream).await?;
    match verdict.response {
        Some(Status::Ok) => Ok(()),
        Some(Status::Error) => Err(ClientError::AuthFailed(
            verdict.error.unwrap_or_else(|| "rejected".into()),
        )),
        other => Err(ClientError::UnexpectedReply(format!(
            "expected 200 verdict, got {other:?}"
        ))),
    }
}
