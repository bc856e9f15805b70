//! Axum handlers and extractors for session token verification.

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::request::Parts,
    Json,
};
use serde::Serialize;

use crate::auth::Credential;
use crate::errors::AppError;
use crate::state::AppState;

pub const USER_ADDRESS_HEADER: &str = "x-user-address";
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub authorized: bool,
}

/// POST /api/v1/auth/verify
///
/// Reports whether the credential may run a paid action. Never charges.
pub async fn handle_verify(
    State(state): State<AppState>,
    Json(credential): Json<Credential>,
) -> Result<Json<VerifyResponse>, AppError> {
    if credential.user_address.trim().is_empty() || credential.session_token.trim().is_empty() {
        return Err(AppError::Validation(
            "user_address and session_token are required".to_string(),
        ));
    }

    let authorized = state
        .verifier
        .verify(&credential.user_address, &credential.session_token)
        .await;

    Ok(Json(VerifyResponse { authorized }))
}

/// A credential from the `x-user-address` / `x-session-token` headers that
/// the verifier has accepted. Rejects with 401 otherwise.
#[derive(Debug)]
pub struct AuthorizedUser(pub Credential);

#[async_trait]
impl FromRequestParts<AppState> for AuthorizedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let credential = Credential {
            user_address: header_value(parts, USER_ADDRESS_HEADER).ok_or(AppError::Unauthorized)?,
            session_token: header_value(parts, SESSION_TOKEN_HEADER)
                .ok_or(AppError::Unauthorized)?,
        };

        if !state
            .verifier
            .verify(&credential.user_address, &credential.session_token)
            .await
        {
            return Err(AppError::Unauthorized);
        }

        Ok(AuthorizedUser(credential))
    }
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
