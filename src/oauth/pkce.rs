//! PKCE (RFC 7636) and CSRF state generation

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

/// Generate a code verifier: 32 random bytes, base64url without padding (43 chars)
#[must_use]
pub fn generate_verifier() -> String {
    let verifier_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(verifier_bytes)
}

/// S256 code challenge for a verifier
#[must_use]
pub fn derive_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate a random state parameter
#[must_use]
pub fn generate_state() -> String {
    let state_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

/// Secrets of one login attempt
///
/// The challenge is always recomputed from the verifier.
pub struct AuthSession {
    verifier: String,
    state: String,
    deadline: Instant,
}

impl AuthSession {
    /// Start a session that expires after `timeout`
    #[must_use]
    pub fn start(timeout: Duration) -> Self {
        Self {
            verifier: generate_verifier(),
            state: generate_state(),
            deadline: Instant::now() + timeout,
        }
    }

    /// Code verifier, sent with the token exchange
    #[must_use]
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    /// Code challenge, sent with the authorize request
    #[must_use]
    pub fn challenge(&self) -> String {
        derive_challenge(&self.verifier)
    }

    /// Anti-CSRF state echoed through the redirect
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// When the login gives up waiting for the callback
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("verifier", &"***")
            .field("state", &"***")
            .field("deadline", &self.deadline)
            .finish()
    }
}
