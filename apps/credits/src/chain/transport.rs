//! REST smart queries against the contract.
//!
//! Nodes disagree on which REST shape they expose, so a query is described by
//! an ordered list of `EndpointCandidate`s. Each one only builds a URL; the
//! orchestrator decides which to try and in what order.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header::CONTENT_TYPE, Client, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use crate::chain::{user_token_query, ContractTokenRecord, QueryError};

/// Builds the request URL for one endpoint shape from
/// `(base_url, contract_address, base64_query)`.
pub type BuildEndpoint = fn(&Url, &str, &str) -> Result<Url, QueryError>;

/// One URL construction strategy for a smart query.
#[derive(Clone, Copy)]
pub struct EndpointCandidate {
    pub name: &'static str,
    pub build: BuildEndpoint,
}

impl fmt::Debug for EndpointCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointCandidate")
            .field("name", &self.name)
            .finish()
    }
}

/// Default probing order: standard CosmWasm path, legacy path, explicit
/// `?query=` parameter.
pub const DEFAULT_ENDPOINTS: [EndpointCandidate; 3] = [
    EndpointCandidate {
        name: "cosmwasm-path",
        build: cosmwasm_path,
    },
    EndpointCandidate {
        name: "legacy-wasm-path",
        build: legacy_wasm_path,
    },
    EndpointCandidate {
        name: "cosmwasm-query-param",
        build: cosmwasm_query_param,
    },
];

fn cosmwasm_path(base: &Url, contract: &str, encoded: &str) -> Result<Url, QueryError> {
    with_segments(
        base,
        &["cosmwasm", "wasm", "v1", "contract", contract, "smart", encoded],
    )
}

fn legacy_wasm_path(base: &Url, contract: &str, encoded: &str) -> Result<Url, QueryError> {
    with_segments(base, &["wasm", "contracts", contract, "smart", encoded])
}

fn cosmwasm_query_param(base: &Url, contract: &str, encoded: &str) -> Result<Url, QueryError> {
    let mut url = with_segments(
        base,
        &["cosmwasm", "wasm", "v1", "contract", contract, "smart"],
    )?;
    url.query_pairs_mut().append_pair("query", encoded);
    Ok(url)
}

/// Appends path segments to `base`, percent-encoding each one.
pub(crate) fn with_segments(base: &Url, segments: &[&str]) -> Result<Url, QueryError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| QueryError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// A single read-only contract query over one endpoint shape.
#[async_trait]
pub trait TransportProbe: Send + Sync {
    async fn query(
        &self,
        contract_address: &str,
        user_address: &str,
        endpoint: &EndpointCandidate,
        timeout: Duration,
    ) -> Result<ContractTokenRecord, QueryError>;
}

/// `reqwest`-backed probe against a node's REST (LCD) API.
#[derive(Clone, Debug)]
pub struct RestProbe {
    client: Client,
    base_url: Url,
}

impl RestProbe {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: Client::builder()
                .build()
                .expect("Failed to build HTTP client"),
            base_url,
        }
    }

    /// Latest block height, used as a connectivity check.
    pub async fn latest_height(&self, timeout: Duration) -> Result<u64, QueryError> {
        let url = with_segments(
            &self.base_url,
            &["cosmos", "base", "tendermint", "v1beta1", "blocks", "latest"],
        )?;

        let response = self.client.get(url).timeout(timeout).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        parse_block_height(&body)
    }
}

#[async_trait]
impl TransportProbe for RestProbe {
    async fn query(
        &self,
        contract_address: &str,
        user_address: &str,
        endpoint: &EndpointCandidate,
        timeout: Duration,
    ) -> Result<ContractTokenRecord, QueryError> {
        let encoded = STANDARD.encode(user_token_query(user_address)?);
        let url = (endpoint.build)(&self.base_url, contract_address, &encoded)?;
        debug!("Querying {} endpoint: {}", endpoint.name, url);

        let response = self
            .client
            .get(url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        ContractTokenRecord::from_response(body)
    }
}

/// Reads `block.header.height`, falling back to `sdk_block` on newer SDKs.
/// Heights are encoded as decimal strings.
fn parse_block_height(body: &Value) -> Result<u64, QueryError> {
    ["block", "sdk_block"]
        .iter()
        .find_map(|key| body.get(key)?.get("header")?.get("height")?.as_str())
        .and_then(|h| h.parse::<u64>().ok())
        .ok_or_else(|| QueryError::UnexpectedShape("missing block.header.height".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONTRACT: &str = "xion1contract";

    fn encoded_query(user: &str) -> String {
        STANDARD.encode(user_token_query(user).unwrap())
    }

    #[test]
    fn test_endpoint_shapes() {
        let base: Url = "https://api.example.com:443".parse().unwrap();
        let encoded = encoded_query("xion1abc");

        let first = (DEFAULT_ENDPOINTS[0].build)(&base, CONTRACT, &encoded).unwrap();
        assert!(first
            .path()
            .starts_with("/cosmwasm/wasm/v1/contract/xion1contract/smart/"));
        assert!(first.query().is_none());

        let second = (DEFAULT_ENDPOINTS[1].build)(&base, CONTRACT, &encoded).unwrap();
        assert!(second
            .path()
            .starts_with("/wasm/contracts/xion1contract/smart/"));

        let third = (DEFAULT_ENDPOINTS[2].build)(&base, CONTRACT, &encoded).unwrap();
        assert_eq!(third.path(), "/cosmwasm/wasm/v1/contract/xion1contract/smart");
        let (key, value) = third.query_pairs().next().unwrap();
        assert_eq!(key, "query");
        assert_eq!(value, encoded);
    }

    #[test]
    fn test_slash_in_base64_is_escaped() {
        let base: Url = "http://node.local".parse().unwrap();
        let url = (DEFAULT_ENDPOINTS[0].build)(&base, CONTRACT, "ab/cd+=").unwrap();
        assert!(url.path().ends_with("/smart/ab%2Fcd+="));
    }

    #[test]
    fn test_base_path_is_preserved() {
        let base: Url = "http://node.local/lcd/".parse().unwrap();
        let url = (DEFAULT_ENDPOINTS[1].build)(&base, CONTRACT, "e30=").unwrap();
        assert_eq!(url.path(), "/lcd/wasm/contracts/xion1contract/smart/e30=");
    }

    #[tokio::test]
    async fn test_query_unwraps_data_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/cosmwasm/wasm/v1/contract/xion1contract/smart/.+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"data": {"has_active_token": true, "token": "tokA:1:u1"}}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let probe = RestProbe::new(server.uri().parse().unwrap());
        let record = probe
            .query(CONTRACT, "xion1abc", &DEFAULT_ENDPOINTS[0], Duration::from_secs(5))
            .await
            .unwrap();

        assert!(record.has_active_token);
        assert_eq!(record.token, "tokA:1:u1");
    }

    #[tokio::test]
    async fn test_query_param_shape_sends_encoded_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cosmwasm/wasm/v1/contract/xion1contract/smart"))
            .and(query_param("query", encoded_query("xion1abc").as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"has_active_token": false, "token": ""})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let probe = RestProbe::new(server.uri().parse().unwrap());
        let record = probe
            .query(CONTRACT, "xion1abc", &DEFAULT_ENDPOINTS[2], Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!record.has_active_token);
    }

    #[tokio::test]
    async fn test_non_200_is_an_error_not_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(501).set_body_string("not implemented"))
            .mount(&server)
            .await;

        let probe = RestProbe::new(server.uri().parse().unwrap());
        let err = probe
            .query(CONTRACT, "xion1abc", &DEFAULT_ENDPOINTS[1], Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Status { status: 501, .. }));
    }

    #[tokio::test]
    async fn test_timeout_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"has_active_token": true, "token": "x"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let probe = RestProbe::new(server.uri().parse().unwrap());
        let err = probe
            .query(
                CONTRACT,
                "xion1abc",
                &DEFAULT_ENDPOINTS[0],
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Http(_)));
    }

    #[tokio::test]
    async fn test_latest_height() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cosmos/base/tendermint/v1beta1/blocks/latest"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"block": {"header": {"height": "1234567"}}})),
            )
            .mount(&server)
            .await;

        let probe = RestProbe::new(server.uri().parse().unwrap());
        let height = probe.latest_height(Duration::from_secs(5)).await.unwrap();
        assert_eq!(height, 1_234_567);
    }

    #[test]
    fn test_parse_block_height_sdk_block() {
        let body = json!({"sdk_block": {"header": {"height": "42"}}});
        assert_eq!(parse_block_height(&body).unwrap(), 42);
        assert!(parse_block_height(&json!({})).is_err());
    }
}
