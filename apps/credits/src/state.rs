use std::sync::Arc;

use crate::auth::verifier::CredentialVerifier;
use crate::chain::transport::RestProbe;
use crate::config::Config;
use crate::credits::ledger::CreditLedgerClient;

/// Shared application state injected into all route handlers via Axum extractors.
/// Everything here is read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub verifier: Arc<CredentialVerifier>,
    pub ledger: Arc<CreditLedgerClient>,
    /// Direct REST access for the chain health check.
    pub chain: RestProbe,
}
