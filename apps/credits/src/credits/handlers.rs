//! Axum handlers for the credit ledger.

use axum::{extract::State, Json};
use tracing::info;

use crate::auth::handlers::AuthorizedUser;
use crate::credits::ledger::DeductionOutcome;
use crate::errors::AppError;
use crate::state::AppState;

/// POST /api/v1/credits/deduct
///
/// Called once the paid action has succeeded. Charges one CV credit for the
/// header credential, retrying with backoff. Exhaustion surfaces as
/// `CREDIT_NOT_CHARGED`, distinct from the 401 of a rejected credential.
pub async fn handle_deduct(
    State(state): State<AppState>,
    AuthorizedUser(credential): AuthorizedUser,
) -> Result<Json<DeductionOutcome>, AppError> {
    let outcome = state
        .ledger
        .deduct_with_retry(
            &credential.user_address,
            &credential.session_token,
            state.config.deduct_max_attempts,
        )
        .await;

    if !outcome.success() {
        let error = outcome.error().unwrap_or("unknown error").to_string();
        return Err(AppError::CreditNotCharged(error));
    }

    info!(
        "Charged one CV credit to {} in tx {}, {} remaining",
        credential.user_address,
        outcome.tx_hash().unwrap_or_default(),
        outcome.credits_remaining().unwrap_or_default()
    );
    Ok(Json(outcome))
}
