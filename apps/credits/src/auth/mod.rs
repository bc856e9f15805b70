// Read path: session token verification against contract state.

pub mod handlers;
pub mod token;
pub mod verifier;

use std::fmt;

use serde::Deserialize;

use crate::auth::token::token_preview;

/// Caller-presented credential. Never persisted.
#[derive(Clone, Deserialize)]
pub struct Credential {
    pub user_address: String,
    pub session_token: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_address", &self.user_address)
            .field("session_token", &token_preview(&self.session_token))
            .finish()
    }
}
