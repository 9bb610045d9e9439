//! Stateless cryptographic primitives: PKCE and random token generation.

pub mod pkce;
pub mod random;

pub use pkce::{
    PkceChallengeMethod, generate_code_challenge, generate_code_verifier, is_valid_code_challenge,
    is_valid_code_verifier, self_test, validate_code_challenge,
};
pub use random::{generate_nonce, generate_session_id, generate_state};
