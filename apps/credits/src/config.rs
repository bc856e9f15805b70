use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Url;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    /// Tendermint RPC endpoint, passed to `xiond --node`.
    pub rpc_url: String,
    /// REST (LCD) endpoint for smart queries and tx lookups.
    pub rest_url: Url,
    pub chain_id: String,
    pub contract_address: String,
    /// Keyring key name the backend signs with.
    pub admin_key: String,
    pub keyring_backend: String,
    pub cli_bin: String,
    pub gas_prices: String,
    /// Authorize when token state cannot be determined. See `auth::verifier`.
    pub fail_open: bool,
    pub query_timeout: Duration,
    pub cli_timeout: Duration,
    pub settlement_timeout: Duration,
    pub settlement_poll_interval: Duration,
    pub deduct_max_attempts: u32,
    /// Allowed browser origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let rpc_url = normalize_node_url(&require_env("XION_RPC_URL")?);
        let rest_url = match std::env::var("XION_REST_URL") {
            Ok(url) => normalize_node_url(&url),
            Err(_) => rpc_url.clone(),
        };

        Ok(Config {
            rest_url: rest_url
                .parse()
                .with_context(|| format!("XION_REST_URL '{rest_url}' is not a valid URL"))?,
            rpc_url,
            chain_id: require_env("XION_CHAIN_ID")?,
            contract_address: require_env("XION_CONTRACT_ADDRESS")?,
            admin_key: require_env("XION_ADMIN_KEY")?,
            keyring_backend: env_or("XION_KEYRING_BACKEND", "test"),
            cli_bin: env_or("XION_CLI_BIN", "xiond"),
            gas_prices: env_or("XION_GAS_PRICES", "0.025uxion"),
            fail_open: parse_bool(&env_or("XION_VERIFY_FAIL_OPEN", "true"))
                .context("XION_VERIFY_FAIL_OPEN must be a boolean")?,
            query_timeout: Duration::from_secs(parse_env("XION_QUERY_TIMEOUT_SECS", 30)?),
            cli_timeout: Duration::from_secs(parse_env("XION_CLI_TIMEOUT_SECS", 30)?),
            settlement_timeout: Duration::from_secs(parse_env(
                "XION_SETTLEMENT_TIMEOUT_SECS",
                60,
            )?),
            settlement_poll_interval: Duration::from_millis(parse_env(
                "XION_SETTLEMENT_POLL_MS",
                1000,
            )?),
            deduct_max_attempts: parse_env("DEDUCT_MAX_ATTEMPTS", 3)?,
            cors_origins: parse_list(&env_or("CORS_ORIGINS", "")),
            port: parse_env("PORT", 8080)?,
            rust_log: env_or("RUST_LOG", "info"),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

/// Comma-separated list; blank entries are dropped.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('/').to_string())
        .collect()
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => bail!("expected true/false, got '{other}'"),
    }
}

/// Normalises a node URL from the environment.
///
/// Strips a `rest+`/`grpc+` transport prefix, gives a bare host `http://`,
/// pins `https://` without a port to `:443`, and drops trailing slashes.
pub fn normalize_node_url(raw: &str) -> String {
    let url = raw.trim().trim_end_matches('/');
    let url = url
        .strip_prefix("rest+")
        .or_else(|| url.strip_prefix("grpc+"))
        .unwrap_or(url);

    if let Some(rest) = url.strip_prefix("https://") {
        let (host, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));
        if host.contains(':') {
            url.to_string()
        } else {
            format!("https://{host}:443{path}")
        }
    } else if url.starts_with("http://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}
