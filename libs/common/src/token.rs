//! Collision-resistant opaque tokens for session ids and postponed requests.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

/// Number of random bytes in a token (128 bits).
const TOKEN_BYTES: usize = 16;

/// Generate a random 128-bit token, base64url-encoded without padding.
pub fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
