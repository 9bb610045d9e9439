//! Random token generation.
//!
//! All values come from the operating system CSPRNG and are encoded as
//! base64url without padding.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;

/// Random bytes behind `state` and `nonce` values (22 characters encoded).
pub const STATE_BYTES: usize = 16;

/// Random bytes behind session identifiers (43 characters encoded).
pub const SESSION_ID_BYTES: usize = 32;

/// Returns `len` CSPRNG bytes, base64url-encoded without padding.
#[must_use]
pub fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates an OAuth `state` value.
#[must_use]
pub fn generate_state() -> String {
    random_token(STATE_BYTES)
}

/// Generates an OIDC `nonce` value.
///
/// Deliberately the same routine as [`generate_state`]: same entropy source,
/// same length. The two values serve different purposes (CSRF binding versus
/// ID-token replay binding) but nothing requires them to differ in shape, and
/// deployed clients already expect 22-character nonces.
#[must_use]
pub fn generate_nonce() -> String {
    generate_state()
}

/// Generates a session identifier.
#[must_use]
pub fn generate_session_id() -> String {
    random_token(SESSION_ID_BYTES)
}

/// Returns the encoded length of `bytes` random bytes.
#[must_use]
pub const fn encoded_len(bytes: usize) -> usize {
    (bytes * 4).div_ceil(3)
}

/// Returns `true` if `value` has the exact shape of a token from [`random_token`].
#[must_use]
pub fn is_token_shaped(value: &str, bytes: usize) -> bool {
    value.len() == encoded_len(bytes)
        && value
            .bytes()
            .all(|c| c.is_ascii_alphanumeric() || c == b'-' || c == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_and_nonce_shape() {
        let state = generate_state();
        let nonce = generate_nonce();
        assert_eq!(state.len(), 22);
        assert_eq!(nonce.len(), 22);
        assert!(is_token_shaped(&state, STATE_BYTES));
        assert!(is_token_shaped(&nonce, STATE_BYTES));
        assert_ne!(state, nonce);
    }

    #[test]
    fn test_session_id_shape() {
        let id = generate_session_id();
        assert_eq!(id.len(), 43);
        assert!(is_token_shaped(&id, SESSION_ID_BYTES));
    }

    #[test]
    fn test_uniqueness() {
        let mut values: Vec<String> = (0..200).map(|_| generate_state()).collect();
        values.sort();
        values.dedup();
        assert_eq!(values.len(), 200);
    }

    #[test]
    fn test_is_token_shaped_rejects() {
        assert!(!is_token_shaped("", STATE_BYTES));
        assert!(!is_token_shaped(&"a".repeat(21), STATE_BYTES));
        assert!(!is_token_shaped(&format!("{}=", "a".repeat(21)), STATE_BYTES));
        assert!(!is_token_shaped(&format!("{}/", "a".repeat(21)), STATE_BYTES));
    }
}
