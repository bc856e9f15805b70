//! Chain access for the CV credit contract.
//!
//! Read path: `transport` issues smart queries over REST, `cli` shells out to
//! `xiond` when every REST shape has failed.
//! Write path: `signer` submits execute messages and waits for settlement.
//!
//! Nothing in here retries on its own. Retry and fallback ordering belong to
//! the callers in `auth` and `credits`.

pub mod cli;
pub mod signer;
pub mod transport;

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Failure of an external command (`xiond`) invocation.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Command exited with code {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors on the read path. All of these are "could not determine", never
/// "token invalid".
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),

    #[error("CLI query failed: {0}")]
    Command(#[from] CommandError),

    #[error("Unable to parse CLI output: {0}")]
    UnparsableOutput(String),
}

/// Contract query messages.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMsg<'a> {
    GetUserToken { address: &'a str },
}

/// Contract execute messages.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMsg<'a> {
    DeductCvCredit {
        user_address: &'a str,
        secure_token: &'a str,
    },
}

/// Serialised `get_user_token` query, shared by the REST and CLI paths.
pub fn user_token_query(user_address: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string(&QueryMsg::GetUserToken {
        address: user_address,
    })
}

/// Snapshot of the contract's token state for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractTokenRecord {
    pub has_active_token: bool,
    pub token: String,
}

impl ContractTokenRecord {
    /// Builds a record from a query response, unwrapping a `{"data": {...}}`
    /// envelope when present.
    ///
    /// Booleans may arrive as strings (`"true"`) when the source was the
    /// CLI's key/value output. `has_active_token` must be present: a body
    /// without it is not evidence that the user has no token. A missing or
    /// null `token` reads as empty.
    pub fn from_response(body: Value) -> Result<Self, QueryError> {
        let inner = match body {
            Value::Object(mut map) => match map.remove("data") {
                Some(data) => data,
                None => Value::Object(map),
            },
            other => other,
        };

        let fields = match inner {
            Value::Object(fields) => fields,
            other => {
                return Err(QueryError::UnexpectedShape(format!(
                    "expected an object, got {other}"
                )))
            }
        };

        let has_active_token = match fields.get("has_active_token") {
            None => {
                return Err(QueryError::UnexpectedShape(
                    "missing has_active_token".to_string(),
                ))
            }
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => true,
            Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => false,
            Some(other) => {
                return Err(QueryError::UnexpectedShape(format!(
                    "has_active_token is not a boolean: {other}"
                )))
            }
        };

        let token = match fields.get("token") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(QueryError::UnexpectedShape(format!(
                    "token is not a string: {other}"
                )))
            }
        };

        Ok(Self {
            has_active_token,
            token,
        })
    }
}
