mod auth;
mod chain;
mod config;
mod credits;
mod errors;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::auth::verifier::{CredentialVerifier, VerifierSettings};
use crate::chain::cli::XiondQuery;
use crate::chain::signer::{XiondSigner, XiondSignerConfig};
use crate::chain::transport::RestProbe;
use crate::config::Config;
use crate::credits::ledger::CreditLedgerClient;
use crate::credits::retry::{RetryPolicy, DEFAULT_BASE_DELAY};
use crate::routes::{build_router, cors_layer};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Credits API v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Chain {} via {} (contract {})",
        config.chain_id, config.rest_url, config.contract_address
    );

    // Connectivity check only; the service still starts with the node down
    let chain = RestProbe::new(config.rest_url.clone());
    match chain.latest_height(config.query_timeout).await {
        Ok(height) => info!("Connected to chain, latest block height: {height}"),
        Err(e) => warn!("Chain connectivity check failed: {e}"),
    }

    let settings = VerifierSettings::from(&config);
    if settings.fail_open {
        warn!("XION_VERIFY_FAIL_OPEN is on: requests are authorized when token state cannot be read");
    }
    let verifier = CredentialVerifier::new(
        Arc::new(chain.clone()),
        Arc::new(XiondQuery::new(config.cli_bin.clone(), config.cli_timeout)),
        settings,
    );

    let signer = XiondSigner::new(XiondSignerConfig {
        binary: config.cli_bin.clone(),
        key_name: config.admin_key.clone(),
        keyring_backend: config.keyring_backend.clone(),
        chain_id: config.chain_id.clone(),
        node_url: config.rpc_url.clone(),
        gas_prices: config.gas_prices.clone(),
        cli_timeout: config.cli_timeout,
        rest_url: config.rest_url.clone(),
        http_timeout: config.query_timeout,
        settlement_timeout: config.settlement_timeout,
        poll_interval: config.settlement_poll_interval,
    });
    let ledger = CreditLedgerClient::new(
        Arc::new(signer),
        config.contract_address.clone(),
        RetryPolicy::new(config.deduct_max_attempts, DEFAULT_BASE_DELAY),
    );
    info!(
        "Credit ledger initialized (signer key: {}, max attempts: {})",
        config.admin_key,
        ledger.retry_policy().max_attempts()
    );

    // Build app state
    let state = AppState {
        config: config.clone(),
        verifier: Arc::new(verifier),
        ledger: Arc::new(ledger),
        chain,
    };

    if config.cors_origins.is_empty() {
        warn!("CORS_ORIGINS is not set: allowing requests from any origin");
    }
    let cors = cors_layer(&config.cors_origins)?;

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
