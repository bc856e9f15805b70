//! Signed contract execution.
//!
//! `SigningClient` is the seam the ledger client talks to. `XiondSigner` is the
//! production implementation: the chain CLI signs with a keyring key and
//! broadcasts, then settlement is observed by polling the node's REST tx
//! endpoint. No key material is handled here, only the key name.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::chain::cli::run_command;
use crate::chain::transport::with_segments;
use crate::chain::CommandError;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Signing command failed: {0}")]
    Command(#[from] CommandError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Node returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Transaction rejected with code {code}: {raw_log}")]
    Rejected { code: u32, raw_log: String },

    #[error("Broadcast response carried no transaction hash")]
    MissingTxHash,

    #[error("Transaction {tx_hash} not settled after {waited:?}")]
    SettlementTimeout { tx_hash: String, waited: Duration },
}

/// A single event attribute. Values are plain strings on current SDKs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// An ABCI event emitted while executing a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TxEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

#[cfg(test)]
impl TxEvent {
    pub fn new(kind: &str, attributes: &[(&str, &str)]) -> Self {
        Self {
            kind: kind.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| EventAttribute {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect(),
        }
    }
}

/// A transaction that has been included in a block and executed.
#[derive(Debug, Clone)]
pub struct SettledTx {
    pub tx_hash: String,
    pub height: u64,
    /// Zero on success; anything else means execution failed in-block.
    pub code: u32,
    pub raw_log: String,
    pub events: Vec<TxEvent>,
}

/// Submits execute messages under the backend's single configured credential.
#[async_trait]
pub trait SigningClient: Send + Sync {
    /// Signs and broadcasts `msg` against `contract_address`, returning the tx hash.
    async fn submit(&self, contract_address: &str, msg: &Value) -> Result<String, SignerError>;

    /// Blocks until `tx_hash` is included in a block and executed.
    async fn wait_for_settlement(&self, tx_hash: &str) -> Result<SettledTx, SignerError>;
}

#[derive(Debug, Clone)]
pub struct XiondSignerConfig {
    pub binary: String,
    pub key_name: String,
    pub keyring_backend: String,
    pub chain_id: String,
    pub node_url: String,
    pub gas_prices: String,
    pub cli_timeout: Duration,
    pub rest_url: Url,
    /// Per-request budget for each settlement poll.
    pub http_timeout: Duration,
    pub settlement_timeout: Duration,
    pub poll_interval: Duration,
}

/// `xiond tx wasm execute` signer with REST settlement polling.
#[derive(Debug, Clone)]
pub struct XiondSigner {
    config: XiondSignerConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    #[serde(default)]
    txhash: String,
    #[serde(default)]
    code: u32,
    #[serde(default)]
    raw_log: String,
}

#[derive(Debug, Deserialize)]
struct GetTxResponse {
    tx_response: TxResponse,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    txhash: String,
    #[serde(default)]
    height: String,
    #[serde(default)]
    code: u32,
    #[serde(default)]
    raw_log: String,
    #[serde(default)]
    events: Vec<TxEvent>,
    #[serde(default)]
    logs: Vec<TxLog>,
}

#[derive(Debug, Deserialize)]
struct TxLog {
    #[serde(default)]
    events: Vec<TxEvent>,
}

impl From<TxResponse> for SettledTx {
    fn from(tx: TxResponse) -> Self {
        let mut events = tx.events;
        events.extend(tx.logs.into_iter().flat_map(|log| log.events));
        Self {
            tx_hash: tx.txhash,
            height: tx.height.parse().unwrap_or_default(),
            code: tx.code,
            raw_log: tx.raw_log,
            events,
        }
    }
}

impl XiondSigner {
    pub fn new(config: XiondSignerConfig) -> Self {
        Self {
            config,
            client: Client::builder()
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    fn execute_args(&self, contract_address: &str, msg: &str) -> Vec<String> {
        let c = &self.config;
        [
            "tx",
            "wasm",
            "execute",
            contract_address,
            msg,
            "--from",
            c.key_name.as_str(),
            "--keyring-backend",
            c.keyring_backend.as_str(),
            "--chain-id",
            c.chain_id.as_str(),
            "--node",
            c.node_url.as_str(),
            "--gas",
            "auto",
            "--gas-adjustment",
            "1.3",
            "--gas-prices",
            c.gas_prices.as_str(),
            "--broadcast-mode",
            "sync",
            "-y",
            "--output",
            "json",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// `Ok(None)` while the node does not know the hash yet.
    async fn fetch_tx(&self, url: &Url) -> Result<Option<SettledTx>, SignerError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.config.http_timeout)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Some gateways answer an unknown hash with 400/500 and "not found".
            if body.contains("not found") {
                return Ok(None);
            }
            return Err(SignerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: GetTxResponse = response.json().await?;
        Ok(Some(body.tx_response.into()))
    }
}

#[async_trait]
impl SigningClient for XiondSigner {
    async fn submit(&self, contract_address: &str, msg: &Value) -> Result<String, SignerError> {
        let msg = serde_json::to_string(msg)?;
        let args = self.execute_args(contract_address, &msg);
        debug!("Executing {} tx wasm execute {}", self.config.binary, contract_address);

        let stdout = run_command(&self.config.binary, &args, self.config.cli_timeout).await?;
        let broadcast = parse_broadcast_output(&stdout)?;

        if broadcast.code != 0 {
            return Err(SignerError::Rejected {
                code: broadcast.code,
                raw_log: broadcast.raw_log,
            });
        }
        if broadcast.txhash.is_empty() {
            return Err(SignerError::MissingTxHash);
        }

        Ok(broadcast.txhash)
    }

    async fn wait_for_settlement(&self, tx_hash: &str) -> Result<SettledTx, SignerError> {
        let url = with_segments(
            &self.config.rest_url,
            &["cosmos", "tx", "v1beta1", "txs", tx_hash],
        )
        .map_err(|e| SignerError::InvalidUrl(e.to_string()))?;
        let started = Instant::now();
        let deadline = started + self.config.settlement_timeout;

        loop {
            match self.fetch_tx(&url).await {
                Ok(Some(tx)) => {
                    info!("Transaction {} settled at height {}", tx.tx_hash, tx.height);
                    return Ok(tx);
                }
                Ok(None) => debug!("Transaction {tx_hash} not yet included"),
                Err(e) => warn!("Settlement poll for {tx_hash} failed: {e}"),
            }

            if Instant::now() + self.config.poll_interval > deadline {
                return Err(SignerError::SettlementTimeout {
                    tx_hash: tx_hash.to_string(),
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

/// `--gas auto` makes some CLI versions print a `gas estimate:` line ahead of
/// the JSON body, so parsing starts at the first `{`.
fn parse_broadcast_output(stdout: &str) -> Result<BroadcastResponse, SignerError> {
    let start = stdout.find('{').unwrap_or(0);
    Ok(serde_json::from_str(&stdout[start..])?)
}
