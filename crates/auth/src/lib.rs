//! Credential verification primitives.
//!
//! The plaintext password never crosses the wire. The client and server
//! both hold the same derived password hash (the server stores it, the
//! client re-derives it at login) and prove possession by exchanging a
//! keyed digest of a server-issued random challenge.

use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::{Sha256, Sha512};

use parley_protocol::{CHALLENGE_LEN, PBKDF2_ROUNDS};

/// Length of a derived password hash in bytes (SHA-512 output).
pub const PASSWORD_HASH_LEN: usize = 64;

/// Length of a challenge digest in bytes (HMAC-SHA256 output).
pub const DIGEST_LEN: usize = 32;

/// Derives the stable password hash for a user.
///
/// PBKDF2-HMAC-SHA512 with the lower-cased account name as salt, so the
/// same (password, username) pair always yields the same digest regardless
/// of how the name was capitalized at login.
pub fn derive_password_hash(password: &str, username: &str) -> [u8; PASSWORD_HASH_LEN] {
    let salt = username.to_lowercase();
    let mut hash = [0u8; PASSWORD_HASH_LEN];
    pbkdf2_hmac::<Sha512>(
        password.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ROUNDS,
        &mut hash,
    );
    hash
}

/// Generates a fresh random challenge for one handshake attempt.
pub fn generate_challenge() -> [u8; CHALLENGE_LEN] {
    let mut nonce = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill(&mut nonce[..]);
    nonce
}

/// Computes the keyed digest both sides derive independently:
/// HMAC-SHA256 with the password hash as key and the challenge as message.
pub fn compute_challenge_digest(
    password_hash: &[u8],
    challenge: &[u8],
) -> [u8; DIGEST_LEN] {
    let mut mac = Hmac::<Sha256>::new_from_slice(password_hash)
        .expect("HMAC accepts keys of any length");
    mac.update(challenge);
    mac.finalize().into_bytes().into()
}

/// Constant-time digest comparison.
pub fn digests_match(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_is_deterministic() {
        let a = derive_password_hash("secret", "alice");
        let b = derive_password_hash("secret", "alice");
        assert_eq!(a, b);
    }

    #[test]
    fn username_salt_is_case_insensitive() {
        let lower = derive_password_hash("secret", "alice");
        let mixed = derive_password_hash("secret", "Alice");
        assert_eq!(lower, mixed);
    }

    #[test]
    fn different_passwords_differ() {
        let a = derive_password_hash("secret", "alice");
        let b = derive_password_hash("secret2", "alice");
        assert_ne!(a, b);
    }

    #[test]
    fn different_users_differ() {
        let a = derive_password_hash("secret", "alice");
        let b = derive_password_hash("secret", "bob");
        assert_ne!(a, b);
    }

    #[test]
    fn challenges_are_unique() {
        assert_ne!(generate_challenge(), generate_challenge());
    }

    #[test]
    fn digest_is_deterministic_across_sides() {
        let hash = derive_password_hash("secret", "alice");
        let challenge = generate_challenge();
        // Client and server compute independently from the same inputs.
        let client_side = compute_challenge_digest(&hash, &challenge);
        let server_side = compute_challenge_digest(&hash, &challenge);
        assert_eq!(client_side, server_side);
    }

    #[test]
    fn digest_avalanche_on_challenge() {
        let hash = derive_password_hash("secret", "alice");
        let mut challenge = generate_challenge();
        let original = compute_challenge_digest(&hash, &challenge);
        challenge[0] ^= 0x01;
        let mutated = compute_challenge_digest(&hash, &challenge);
        assert_ne!(original, mutated);
    }

    #[test]
    fn digest_avalanche_on_key() {
        let challenge = generate_challenge();
        let mut hash = derive_password_hash("secret", "alice");
        let original = compute_challenge_digest(&hash, &challenge);
        hash[0] ^= 0x01;
        let mutated = compute_challenge_digest(&hash, &challenge);
        assert_ne!(original, mutated);
    }

    #[test]
    fn digests_match_detects_equality() {
        let hash = derive_password_hash("secret", "alice");
        let challenge = generate_challenge();
        let a = compute_challenge_digest(&hash, &challenge);
        let b = compute_challenge_digest(&hash, &challenge);
        assert!(digests_match(&a, &b));
    }

    #[test]
    fn digests_match_rejects_mutation() {
        let hash = derive_password_hash("secret", "alice");
        let challenge = generate_challenge();
        let a = compute_challenge_digest(&hash, &challenge);
        let mut b = a;
        b[DIGEST_LEN - 1] ^= 0x80;
        assert!(!digests_match(&a, &b));
    }

    #[test]
    fn digests_match_rejects_length_mismatch() {
        assert!(!digests_match(b"short", b"rather longer"));
    }

    #[test]
    fn digest_hex_encoding_is_stable_width() {
        let hash = derive_password_hash("secret", "alice");
        let digest = compute_challenge_digest(&hash, &generate_challenge());
        assert_eq!(hex::encode(digest).len(), DIGEST_LEN * 2);
    }
}
