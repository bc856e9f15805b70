//! `xiond` CLI fallback for contract queries, plus the shared subprocess runner.
//!
//! The output parser accepts JSON, or a flat `key: value`
//! block (optionally under a `data:` header). Anything else is an error.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{error, info};

use crate::chain::{user_token_query, CommandError, ContractTokenRecord, QueryError};

/// Last-resort query path, tried once after every REST shape has failed.
#[async_trait]
pub trait CliFallback: Send + Sync {
    async fn query(
        &self,
        contract_address: &str,
        user_address: &str,
        node_url: &str,
    ) -> Result<ContractTokenRecord, QueryError>;
}

/// Runs `xiond query wasm contract-state smart ...` as a subprocess.
#[derive(Debug, Clone)]
pub struct XiondQuery {
    binary: String,
    timeout: Duration,
}

impl XiondQuery {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CliFallback for XiondQuery {
    async fn query(
        &self,
        contract_address: &str,
        user_address: &str,
        node_url: &str,
    ) -> Result<ContractTokenRecord, QueryError> {
        let payload = user_token_query(user_address)?;
        let args = query_args(contract_address, &payload, node_url);
        info!("Executing CLI command: {} {}", self.binary, args.join(" "));

        let stdout = run_command(&self.binary, &args, self.timeout).await?;
        parse_cli_output(&stdout)
    }
}

/// Argument order is fixed: `query wasm contract-state smart <contract> <json> --node <url> --output json`.
fn query_args(contract_address: &str, payload: &str, node_url: &str) -> Vec<String> {
    [
        "query",
        "wasm",
        "contract-state",
        "smart",
        contract_address,
        payload,
        "--node",
        node_url,
        "--output",
        "json",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Runs a command to completion under `timeout` and returns trimmed stdout.
/// A non-zero exit is an error; the child is killed if the timeout fires.
pub(crate) async fn run_command(
    binary: &str,
    args: &[String],
    timeout: Duration,
) -> Result<String, CommandError> {
    let mut command = Command::new(binary);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| CommandError::Timeout(timeout))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!("CLI command failed: {stderr}");
        return Err(CommandError::Failed {
            code: output.status.code(),
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Parses CLI stdout as JSON, or failing that as a flat `key: value` block.
pub fn parse_cli_output(output: &str) -> Result<ContractTokenRecord, QueryError> {
    let output = output.trim();
    if output.is_empty() {
        return Err(QueryError::UnparsableOutput("empty output".to_string()));
    }

    if let Ok(value) = serde_json::from_str::<Value>(output) {
        if !value.is_object() {
            return Err(unparsable(output));
        }
        return ContractTokenRecord::from_response(value).map_err(|_| unparsable(output));
    }

    let fields = parse_key_value_block(output)?;
    ContractTokenRecord::from_response(Value::Object(fields)).map_err(|_| unparsable(output))
}

fn parse_key_value_block(output: &str) -> Result<Map<String, Value>, QueryError> {
    let mut lines = output.lines().filter(|l| !l.trim().is_empty()).peekable();

    let has_header = lines.peek().is_some_and(|l| l.trim_end() == "data:");
    if has_header {
        lines.next();
    }

    let mut fields = Map::new();
    for line in lines {
        let indented = line.starts_with(' ') || line.starts_with('\t');
        if has_header && !indented {
            return Err(unparsable(output));
        }

        let (key, value) = line.trim().split_once(':').ok_or_else(|| unparsable(output))?;
        let key = key.trim();
        let value = unquote(value.trim());

        // Empty value means a nested mapping follows; not supported.
        if !is_plain_key(key) || value.is_empty() {
            return Err(unparsable(output));
        }

        fields.insert(key.to_string(), Value::String(value.to_string()));
    }

    if fields.is_empty() {
        return Err(unparsable(output));
    }
    Ok(fields)
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('-')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q)?.strip_suffix(*q))
        .unwrap_or(value)
}

fn unparsable(output: &str) -> QueryError {
    let preview: String = output.chars().take(120).collect();
    QueryError::UnparsableOutput(preview)
}
