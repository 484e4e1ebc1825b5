//! OAuth 2.0 client
//!
//! Implements the Authorization Code flow with PKCE (RFC 7636):
//! - PKCE verifier/challenge and CSRF state generation
//! - A single-use callback server for the browser redirect
//! - Code exchange and refresh-token exchange
//! - Token persistence (OS keychain or a private file)

mod callback;
mod flow;
mod pkce;
mod storage;
mod token;

pub use callback::{CallbackListener, CallbackParams, CallbackResult};
pub use flow::{BrowserLauncher, LoginState, OAuthFlow, SystemBrowser};
pub use pkce::{AuthSession, derive_challenge, generate_state, generate_verifier};
#[cfg(feature = "keyring")]
pub use storage::KeyringTokenStore;
pub use storage::{
    FileTokenStore, KEYRING_SERVICE, KEYRING_USER, MemoryTokenStore, TokenStore, open_store,
};
pub use token::{Token, redact};
