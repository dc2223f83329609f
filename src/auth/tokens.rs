/// Opaque Token Helpers
///
/// Single-use tokens (email verification, password reset) are random
/// strings handed to the user and never stored. Both those and refresh
/// tokens are persisted only as their SHA-256 digest, so a database leak
/// does not expose usable bearer credentials.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};

const OPAQUE_TOKEN_LENGTH: usize = 64;

/// Generate a new cryptographically secure opaque token
///
/// 64 alphanumeric characters, about 380 bits of entropy.
pub fn generate_opaque_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(OPAQUE_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Deterministic one-way digest used as the storage key for a token
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
