//! Credential verification against on-chain token state.
//!
//! One pass, no retries: each REST endpoint shape in configured order, then
//! the CLI once. The first record obtained decides. When nothing could be
//! fetched the outcome is inconclusive and the fail-open flag decides.
//!
//! SECURITY: with `fail_open` set, an unreachable chain authorizes every
//! request. That trades strictness for availability and is off only when
//! `XION_VERIFY_FAIL_OPEN=false`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::auth::token::{matches, token_preview};
use crate::chain::cli::CliFallback;
use crate::chain::transport::{EndpointCandidate, TransportProbe, DEFAULT_ENDPOINTS};
use crate::chain::ContractTokenRecord;
use crate::config::Config;

/// Outcome of one verification. Only `Accepted` and a fail-open
/// `Inconclusive` authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Accepted,
    NoActiveToken,
    TokenMismatch,
    /// Blank address or token; nothing to look up. Rejected before any
    /// transport is tried, so fail-open never applies to it.
    MalformedCredential,
    /// Every transport failed.
    Inconclusive { fail_open: bool },
}

impl Verification {
    pub fn is_authorized(self) -> bool {
        matches!(
            self,
            Verification::Accepted | Verification::Inconclusive { fail_open: true }
        )
    }
}

#[derive(Debug, Clone)]
pub struct VerifierSettings {
    pub contract_address: String,
    /// Passed to the CLI as `--node`.
    pub node_url: String,
    pub endpoints: Vec<EndpointCandidate>,
    pub query_timeout: Duration,
    pub fail_open: bool,
}

impl From<&Config> for VerifierSettings {
    fn from(config: &Config) -> Self {
        Self {
            contract_address: config.contract_address.clone(),
            node_url: config.rpc_url.clone(),
            endpoints: DEFAULT_ENDPOINTS.to_vec(),
            query_timeout: config.query_timeout,
            fail_open: config.fail_open,
        }
    }
}

pub struct CredentialVerifier {
    probe: Arc<dyn TransportProbe>,
    fallback: Arc<dyn CliFallback>,
    settings: VerifierSettings,
}

impl CredentialVerifier {
    pub fn new(
        probe: Arc<dyn TransportProbe>,
        fallback: Arc<dyn CliFallback>,
        settings: VerifierSettings,
    ) -> Self {
        Self {
            probe,
            fallback,
            settings,
        }
    }

    /// True when the caller may proceed. Never errors.
    pub async fn verify(&self, user_address: &str, session_token: &str) -> bool {
        self.evaluate(user_address, session_token)
            .await
            .is_authorized()
    }

    pub async fn evaluate(&self, user_address: &str, session_token: &str) -> Verification {
        if user_address.trim().is_empty() || session_token.trim().is_empty() {
            warn!("Rejecting verification with blank address or token");
            return Verification::MalformedCredential;
        }

        info!(
            "Verifying token {} for user: {user_address}",
            token_preview(session_token)
        );

        match self.fetch_record(user_address).await {
            Some(record) => decide(&record, session_token, user_address),
            None => {
                let fail_open = self.settings.fail_open;
                if fail_open {
                    warn!(
                        "Token state for {user_address} could not be determined; accepting under fail-open policy"
                    );
                } else {
                    warn!(
                        "Token state for {user_address} could not be determined; rejecting (fail-open disabled)"
                    );
                }
                Verification::Inconclusive { fail_open }
            }
        }
    }

    /// First record from the endpoints in order, then the CLI. `None` when
    /// every path failed.
    async fn fetch_record(&self, user_address: &str) -> Option<ContractTokenRecord> {
        let s = &self.settings;

        for (i, endpoint) in s.endpoints.iter().enumerate() {
            match self
                .probe
                .query(&s.contract_address, user_address, endpoint, s.query_timeout)
                .await
            {
                Ok(record) => {
                    info!("Endpoint {} ({}) successful", i + 1, endpoint.name);
                    return Some(record);
                }
                Err(e) => warn!("Endpoint {} ({}) failed: {e}", i + 1, endpoint.name),
            }
        }

        match self
            .fallback
            .query(&s.contract_address, user_address, &s.node_url)
            .await
        {
            Ok(record) => {
                info!("CLI fallback successful");
                Some(record)
            }
            Err(e) => {
                error!("CLI fallback error: {e}");
                None
            }
        }
    }
}

fn decide(record: &ContractTokenRecord, presented: &str, user_address: &str) -> Verification {
    if !record.has_active_token {
        warn!("User has no active token: {user_address}");
        return Verification::NoActiveToken;
    }

    if matches(&record.token, presented) {
        info!("Token verified for user: {user_address}");
        Verification::Accepted
    } else {
        warn!("Token mismatch for user: {user_address}");
        Verification::TokenMismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::QueryError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tracing_subscriber::fmt::MakeWriter;

    /// Collects formatted log output for assertions.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        /// Routes events on this thread here until the guard drops.
        fn install(&self) -> tracing::subscriber::DefaultGuard {
            let subscriber = tracing_subscriber::fmt()
                .with_writer(self.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::INFO)
                .finish();
            tracing::subscriber::set_default(subscriber)
        }

        fn warnings(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .filter(|line| line.contains("WARN"))
                .map(str::to_string)
                .collect()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Answers per endpoint name; unknown names fail with a 503.
    #[derive(Default)]
    struct StubProbe {
        answers: HashMap<&'static str, ContractTokenRecord>,
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl TransportProbe for StubProbe {
        async fn query(
            &self,
            _contract_address: &str,
            _user_address: &str,
            endpoint: &EndpointCandidate,
            _timeout: Duration,
        ) -> Result<ContractTokenRecord, QueryError> {
            self.calls.lock().unwrap().push(endpoint.name);
            self.answers
                .get(endpoint.name)
                .cloned()
                .ok_or(QueryError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                })
        }
    }

    #[derive(Default)]
    struct StubCli {
        answer: Option<ContractTokenRecord>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CliFallback for StubCli {
        async fn query(
            &self,
            _contract_address: &str,
            _user_address: &str,
            _node_url: &str,
        ) -> Result<ContractTokenRecord, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
                .clone()
                .ok_or_else(|| QueryError::UnparsableOutput("garbage".to_string()))
        }
    }

    fn record(active: bool, token: &str) -> ContractTokenRecord {
        ContractTokenRecord {
            has_active_token: active,
            token: token.to_string(),
        }
    }

    fn settings(fail_open: bool) -> VerifierSettings {
        VerifierSettings {
            contract_address: "xion1contract".to_string(),
            node_url: "http://localhost:26657".to_string(),
            endpoints: DEFAULT_ENDPOINTS.to_vec(),
            query_timeout: Duration::from_secs(1),
            fail_open,
        }
    }

    fn verifier(
        probe: Arc<StubProbe>,
        cli: Arc<StubCli>,
        fail_open: bool,
    ) -> CredentialVerifier {
        CredentialVerifier::new(probe, cli, settings(fail_open))
    }

    #[tokio::test]
    async fn test_inactive_token_rejects_regardless_of_token() {
        let probe = Arc::new(StubProbe {
            answers: HashMap::from([("cosmwasm-path", record(false, "T1:111:uuid"))]),
            ..Default::default()
        });
        let v = verifier(probe, Arc::new(StubCli::default()), true);

        assert_eq!(
            v.evaluate("xion1abc", "T1:111:uuid").await,
            Verification::NoActiveToken
        );
        assert!(!v.verify("xion1abc", "anything:else").await);
    }

    #[tokio::test]
    async fn test_segment_match_accepts() {
        let probe = Arc::new(StubProbe {
            answers: HashMap::from([("cosmwasm-path", record(true, "T1:111:uuid"))]),
            ..Default::default()
        });
        let v = verifier(probe, Arc::new(StubCli::default()), false);

        assert_eq!(
            v.evaluate("xion1abc", "T1:999:other").await,
            Verification::Accepted
        );
    }

    #[tokio::test]
    async fn test_mismatch_is_confirmed_rejection_without_fallback() {
        let probe = Arc::new(StubProbe {
            answers: HashMap::from([("cosmwasm-path", record(true, "T1:111:uuid"))]),
            ..Default::default()
        });
        let cli = Arc::new(StubCli::default());
        let v = verifier(probe.clone(), cli.clone(), true);

        assert_eq!(
            v.evaluate("xion1abc", "T2:111:uuid").await,
            Verification::TokenMismatch
        );
        assert_eq!(probe.calls.lock().unwrap().len(), 1);
        assert_eq!(cli.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_endpoints_tried_in_order_until_third_succeeds() {
        let probe = Arc::new(StubProbe {
            answers: HashMap::from([("cosmwasm-query-param", record(true, "tokA:1:u1"))]),
            ..Default::default()
        });
        let cli = Arc::new(StubCli::default());
        let v = verifier(probe.clone(), cli.clone(), false);

        assert!(v.verify("xion1abc", "tokA:1:u1").await);
        assert_eq!(
            *probe.calls.lock().unwrap(),
            vec!["cosmwasm-path", "legacy-wasm-path", "cosmwasm-query-param"]
        );
        assert_eq!(cli.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cli_fallback_used_after_all_endpoints_fail() {
        let probe = Arc::new(StubProbe::default());
        let cli = Arc::new(StubCli {
            answer: Some(record(false, "")),
            ..Default::default()
        });
        let v = verifier(probe.clone(), cli.clone(), true);

        // The CLI answered, so fail-open does not apply.
        assert_eq!(
            v.evaluate("xion1abc", "tokA:1:u1").await,
            Verification::NoActiveToken
        );
        assert_eq!(probe.calls.lock().unwrap().len(), 3);
        assert_eq!(cli.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_transports_failing_fails_open() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();
        let cli = Arc::new(StubCli::default());
        let v = verifier(Arc::new(StubProbe::default()), cli.clone(), true);

        assert_eq!(
            v.evaluate("xion1abc", "tokA:1:u1").await,
            Verification::Inconclusive { fail_open: true }
        );
        assert!(v.verify("xion1abc", "tokA:1:u1").await);
        assert_eq!(cli.calls.load(Ordering::SeqCst), 2);

        let warnings = logs.warnings();
        assert!(
            warnings
                .iter()
                .any(|l| l.contains("accepting under fail-open policy") && l.contains("xion1abc")),
            "{warnings:?}"
        );
    }

    #[tokio::test]
    async fn test_all_transports_failing_fails_closed_when_disabled() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();
        let v = verifier(
            Arc::new(StubProbe::default()),
            Arc::new(StubCli::default()),
            false,
        );
        assert!(!v.verify("xion1abc", "tokA:1:u1").await);

        let warnings = logs.warnings();
        assert!(
            warnings
                .iter()
                .any(|l| l.contains("rejecting (fail-open disabled)")),
            "{warnings:?}"
        );
        assert!(!warnings.iter().any(|l| l.contains("accepting under fail-open")));
    }

    #[tokio::test]
    async fn test_blank_credential_skips_network() {
        let probe = Arc::new(StubProbe::default());
        let cli = Arc::new(StubCli::default());
        let v = verifier(probe.clone(), cli.clone(), true);

        assert_eq!(
            v.evaluate("xion1abc", "  ").await,
            Verification::MalformedCredential
        );
        assert!(!v.verify("", "tokA:1:u1").await);
        assert!(probe.calls.lock().unwrap().is_empty());
        assert_eq!(cli.calls.load(Ordering::SeqCst), 0);
    }
}
