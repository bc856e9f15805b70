//! Credit deduction against the contract ledger.
//!
//! A deduction is one signed `deduct_cv_credit` execute, observed through to
//! settlement. The remaining-credit counter is read from the contract's
//! `wasm` event when present and defaults to 0 otherwise.
//!
//! Retries are at-least-once: if a broadcast lands on-chain but settlement is
//! never observed, the next attempt submits a second deduction. The execute
//! message carries no idempotency key, so the contract cannot tell the two
//! apart.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::chain::signer::{SignerError, SigningClient, TxEvent};
use crate::chain::ExecuteMsg;
use crate::credits::retry::{RetryPolicy, Retryable};

const CREDITS_EVENT: &str = "wasm";
const CREDITS_ATTRIBUTE: &str = "credits_remaining";

/// Terminal result of a deduction.
///
/// Built only through `settled` or `failed`: a success always carries a
/// non-empty tx hash and no error, a failure always carries a non-empty error
/// and no tx hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeductionOutcome {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credits_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl DeductionOutcome {
    pub fn settled(tx_hash: String, credits_remaining: u64) -> Self {
        if tx_hash.trim().is_empty() {
            return Self::failed("settled transaction carried no hash");
        }
        Self {
            success: true,
            tx_hash: Some(tx_hash),
            credits_remaining: Some(credits_remaining),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            "unknown error".to_string()
        } else {
            error
        };
        Self {
            success: false,
            tx_hash: None,
            credits_remaining: None,
            error: Some(error),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn tx_hash(&self) -> Option<&str> {
        self.tx_hash.as_deref()
    }

    pub fn credits_remaining(&self) -> Option<u64> {
        self.credits_remaining
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl Retryable for DeductionOutcome {
    fn is_success(&self) -> bool {
        self.success
    }

    fn failure_reason(&self) -> Option<&str> {
        self.error()
    }

    fn exhausted(self, attempts: u32) -> Self {
        let last = self.error.unwrap_or_default();
        Self::failed(format!("Failed after {attempts} attempts: {last}"))
    }
}

pub struct CreditLedgerClient {
    signer: Arc<dyn SigningClient>,
    contract_address: String,
    retry: RetryPolicy,
}

impl CreditLedgerClient {
    pub fn new(
        signer: Arc<dyn SigningClient>,
        contract_address: String,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            signer,
            contract_address,
            retry,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// One deduction attempt. Every failure is folded into the outcome.
    pub async fn deduct(&self, user_address: &str, secure_token: &str) -> DeductionOutcome {
        info!("Deducting CV credit for user: {user_address}");

        match self.execute_deduction(user_address, secure_token).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Error deducting CV credit: {e}");
                DeductionOutcome::failed(e.to_string())
            }
        }
    }

    /// `deduct` under the configured backoff, with an explicit attempt budget.
    pub async fn deduct_with_retry(
        &self,
        user_address: &str,
        secure_token: &str,
        max_attempts: u32,
    ) -> DeductionOutcome {
        self.retry
            .with_max_attempts(max_attempts)
            .run(|_| self.deduct(user_address, secure_token))
            .await
    }

    async fn execute_deduction(
        &self,
        user_address: &str,
        secure_token: &str,
    ) -> Result<DeductionOutcome, SignerError> {
        let msg = serde_json::to_value(ExecuteMsg::DeductCvCredit {
            user_address,
            secure_token,
        })?;

        info!("Executing deduct_cv_credit transaction...");
        let tx_hash = self.signer.submit(&self.contract_address, &msg).await?;
        info!("Broadcast deduct_cv_credit: {tx_hash}");

        let settled = self.signer.wait_for_settlement(&tx_hash).await?;
        if settled.code != 0 {
            return Err(SignerError::Rejected {
                code: settled.code,
                raw_log: settled.raw_log,
            });
        }

        let credits_remaining = credits_remaining(&settled.events).unwrap_or(0);
        info!("Transaction completed: {tx_hash}, credits remaining: {credits_remaining}");

        Ok(DeductionOutcome::settled(tx_hash, credits_remaining))
    }
}

/// Last `credits_remaining` attribute on a `wasm` event.
fn credits_remaining(events: &[TxEvent]) -> Option<u64> {
    let attr = events
        .iter()
        .filter(|e| e.kind == CREDITS_EVENT)
        .flat_map(|e| &e.attributes)
        .filter(|a| a.key == CREDITS_ATTRIBUTE)
        .last()?;

    match attr.value.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(e) => {
            warn!("Ignoring unparsable credits_remaining {:?}: {e}", attr.value);
            None
        }
    }
}
