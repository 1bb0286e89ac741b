//! Client for the remote authorization authority.
//!
//! [`AuthorizationClient::check_access`] asks the authority whether a user may
//! read a resource, retrying transient failures with linear backoff. Every
//! failed attempt is reported to the circuit breaker and to the audit trail.
//! The terminal decision is audited by the gateway.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::audit::{self, AuditEvent, AuditSink};
use crate::circuit_breaker::CircuitBreaker;
use crate::error::{AuthzError, Result};
use crate::resource_id::ResourceId;
use crate::types::{AccessDecision, DenyReason};

/// Remote source of access verdicts.
#[async_trait]
pub trait Authority: Send + Sync {
    /// One access check.
    ///
    /// `Ok(Some(allowed))` is a verdict, `Ok(None)` a successful response
    /// without one (empty or `null` body). Errors are transport or protocol
    /// failures and are eligible for retry.
    async fn check_access(&self, user_id: &str, resource_id: &ResourceId)
        -> Result<Option<bool>>;

    /// Liveness probe, used for health reporting only.
    async fn is_healthy(&self) -> bool;
}

/// [`Authority`] reached over HTTP.
///
/// Issues `GET {base}/check-access?userId=..&resourceId=..` and expects a JSON
/// boolean body.
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    http: Client,
    base_url: String,
}

impl HttpAuthority {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Url::parse(base_url).map_err(|e| {
            AuthzError::Configuration(format!("invalid authority URL {:?}: {}", base_url, e))
        })?;

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthzError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}/{}", self.base_url, path))
            .map_err(|e| AuthzError::Internal(format!("invalid authority endpoint: {}", e)))
    }
}

fn transport_error(e: reqwest::Error) -> AuthzError {
    if e.is_timeout() {
        AuthzError::AuthorityTimeout
    } else {
        AuthzError::AuthorityUnreachable(e.to_string())
    }
}

/// Interpret a 2xx body.
fn parse_verdict(body: &[u8]) -> Result<Option<bool>> {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Bool(allowed)) => Ok(Some(allowed)),
        Ok(serde_json::Value::Null) => Ok(None),
        Ok(other) => Err(AuthzError::AuthorityMalformedResponse(format!(
            "expected a boolean, got {}",
            other
        ))),
        Err(e) => Err(AuthzError::AuthorityMalformedResponse(e.to_string())),
    }
}

#[async_trait]
impl Authority for HttpAuthority {
    async fn check_access(
        &self,
        user_id: &str,
        resource_id: &ResourceId,
    ) -> Result<Option<bool>> {
        let mut url = self.endpoint("check-access")?;
        url.query_pairs_mut()
            .append_pair("userId", user_id)
            .append_pair("resourceId", resource_id.as_str());

        let response = self.http.get(url).send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthzError::AuthorityHttpError(status.as_u16()));
        }

        let body = response.bytes().await.map_err(transport_error)?;
        parse_verdict(&body)
    }

    async fn is_healthy(&self) -> bool {
        let url = match self.endpoint("health") {
            Ok(url) => url,
            Err(_) => return false,
        };
        match self.http.get(url).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!("Authority health check failed: {}", e);
                false
            }
        }
    }
}

/// Suspends the retry loop between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and remembers every requested delay.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<std::sync::Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}

/// Retry budget and backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the failed attempt `attempt` (0-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_add(1))
    }
}

/// Asks the authority for access verdicts.
pub struct AuthorizationClient {
    authority: Arc<dyn Authority>,
    breaker: Arc<CircuitBreaker>,
    audit: Arc<dyn AuditSink>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl AuthorizationClient {
    pub fn new(
        authority: Arc<dyn Authority>,
        breaker: Arc<CircuitBreaker>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            authority,
            breaker,
            audit,
            sleeper: Arc::new(TokioSleeper),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Ask the authority whether `user_id` may read `resource_id`.
    ///
    /// Callers check [`CircuitBreaker::allow_call`] first. The breaker is not
    /// consulted again between attempts.
    pub async fn check_access(
        &self,
        user_id: &str,
        resource_id: &ResourceId,
        client_ip: &str,
    ) -> AccessDecision {
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 0..attempts {
            match self.authority.check_access(user_id, resource_id).await {
                Ok(Some(true)) => {
                    self.breaker.record_success();
                    debug!(user = %user_id, resource = %resource_id, "Authority granted access");
                    return AccessDecision::granted(user_id, resource_id, client_ip);
                }
                Ok(Some(false)) => {
                    self.breaker.record_success();
                    debug!(user = %user_id, resource = %resource_id, "Authority denied access");
                    return AccessDecision::denied(
                        user_id,
                        resource_id,
                        client_ip,
                        DenyReason::RemoteDenied,
                    );
                }
                Ok(None) => {
                    self.breaker.record_success();
                    warn!(
                        user = %user_id,
                        resource = %resource_id,
                        "Authority answered without a verdict, denying"
                    );
                    return AccessDecision::denied(
                        user_id,
                        resource_id,
                        client_ip,
                        DenyReason::MalformedResponse,
                    );
                }
                Err(e) => {
                    let failures = self.breaker.record_failure();
                    warn!(
                        user = %user_id,
                        resource = %resource_id,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        consecutive_failures = failures,
                        "Access check attempt failed: {}",
                        e
                    );
                    audit::emit(
                        self.audit.as_ref(),
                        AuditEvent::attempt_failed(
                            user_id,
                            resource_id.as_str(),
                            client_ip,
                            attempt + 1,
                            &e,
                        ),
                    )
                    .await;

                    if attempt + 1 < attempts {
                        self.sleeper.sleep(self.policy.delay_after(attempt)).await;
                    }
                }
            }
        }

        error!(
            user = %user_id,
            resource = %resource_id,
            "{}",
            AuthzError::RetriesExhausted { attempts }
        );
        AccessDecision::denied(
            user_id,
            resource_id,
            client_ip,
            DenyReason::RetriesExhausted,
        )
    }

    pub async fn authority_healthy(&self) -> bool {
        self.authority.is_healthy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Replays a fixed list of answers; the last one repeats.
    struct ScriptedAuthority {
        answers: Mutex<VecDeque<Result<Option<bool>>>>,
        calls: AtomicU32,
    }

    impl ScriptedAuthority {
        fn new(answers: Vec<Result<Option<bool>>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Authority for ScriptedAuthority {
        async fn check_access(&self, _: &str, _: &ResourceId) -> Result<Option<bool>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                answers.pop_front().unwrap()
            } else {
                answers.front().cloned().unwrap()
            }
        }

        async fn is_healthy(&self) -> bool {
            true
        }
    }

    struct Fixture {
        client: AuthorizationClient,
        breaker: Arc<CircuitBreaker>,
        audit: MemoryAuditSink,
        sleeper: RecordingSleeper,
    }

    fn fixture(authority: Arc<dyn Authority>) -> Fixture {
        let breaker = Arc::new(CircuitBreaker::new(5));
        let audit = MemoryAuditSink::new();
        let sleeper = RecordingSleeper::new();
        let client = AuthorizationClient::new(authority, breaker.clone(), Arc::new(audit.clone()))
            .with_sleeper(Arc::new(sleeper.clone()));
        Fixture {
            client,
            breaker,
            audit,
            sleeper,
        }
    }

    fn track() -> ResourceId {
        ResourceId::parse("track_01").unwrap()
    }

    fn unreachable() -> Result<Option<bool>> {
        Err(AuthzError::AuthorityUnreachable("connection refused".to_string()))
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(0), Duration::from_secs(1));
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_parse_verdict() {
        assert_eq!(parse_verdict(b"true").unwrap(), Some(true));
        assert_eq!(parse_verdict(b" false\n").unwrap(), Some(false));
        assert_eq!(parse_verdict(b"").unwrap(), None);
        assert_eq!(parse_verdict(b"null").unwrap(), None);
        assert!(matches!(
            parse_verdict(b"{\"allowed\":true}"),
            Err(AuthzError::AuthorityMalformedResponse(_))
        ));
        assert!(matches!(
            parse_verdict(b"yes"),
            Err(AuthzError::AuthorityMalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_first_attempt_grants() {
        let authority = ScriptedAuthority::new(vec![Ok(Some(true))]);
        let f = fixture(authority.clone());

        let decision = f.client.check_access("alice", &track(), "10.0.0.1").await;

        assert!(decision.granted);
        assert_eq!(authority.calls(), 1);
        assert_eq!(f.breaker.current_failure_count(), 0);
        assert!(f.sleeper.delays().is_empty());
        assert!(f.audit.events().is_empty());
    }

    #[tokio::test]
    async fn test_remote_denial_is_not_a_failure() {
        let authority = ScriptedAuthority::new(vec![Ok(Some(false))]);
        let f = fixture(authority);
        f.breaker.record_failure();

        let decision = f.client.check_access("alice", &track(), "10.0.0.1").await;

        assert!(!decision.granted);
        assert_eq!(decision.reason, Some(DenyReason::RemoteDenied));
        assert_eq!(f.breaker.current_failure_count(), 0);
    }

    #[tokio::test]
    async fn test_success_after_failures_resets_counter() {
        let authority = ScriptedAuthority::new(vec![
            unreachable(),
            Err(AuthzError::AuthorityTimeout),
            Ok(Some(true)),
        ]);
        let f = fixture(authority.clone());

        let decision = f.client.check_access("alice", &track(), "10.0.0.1").await;

        assert!(decision.granted);
        assert_eq!(authority.calls(), 3);
        assert_eq!(f.breaker.current_failure_count(), 0);
        assert_eq!(
            f.sleeper.delays(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert_eq!(
            f.audit.tags(),
            vec!["AUTHORITY_ATTEMPT_FAILED", "AUTHORITY_ATTEMPT_FAILED"]
        );
    }

    #[tokio::test]
    async fn test_always_failing_exhausts_budget() {
        let authority = ScriptedAuthority::new(vec![unreachable()]);
        let f = fixture(authority.clone());

        let decision = f.client.check_access("alice", &track(), "10.0.0.1").await;

        assert!(!decision.granted);
        assert_eq!(decision.reason, Some(DenyReason::RetriesExhausted));
        assert_eq!(authority.calls(), 3);
        assert_eq!(f.breaker.current_failure_count(), 3);
        // No sleep after the last attempt
        assert_eq!(f.sleeper.delays().len(), 2);

        let attempts: Vec<u32> = f
            .audit
            .events()
            .iter()
            .filter_map(|e| match e {
                AuditEvent::AuthorityAttemptFailed { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_null_body_denies_without_counting_failure() {
        let authority = ScriptedAuthority::new(vec![Ok(None)]);
        let f = fixture(authority.clone());

        let decision = f.client.check_access("alice", &track(), "10.0.0.1").await;

        assert_eq!(decision.reason, Some(DenyReason::MalformedResponse));
        assert_eq!(authority.calls(), 1);
        assert_eq!(f.breaker.current_failure_count(), 0);
    }

    #[tokio::test]
    async fn test_non_boolean_body_is_retried() {
        let authority = ScriptedAuthority::new(vec![
            Err(AuthzError::AuthorityMalformedResponse("\"yes\"".to_string())),
            Ok(Some(false)),
        ]);
        let f = fixture(authority.clone());

        let decision = f.client.check_access("alice", &track(), "10.0.0.1").await;

        assert_eq!(decision.reason, Some(DenyReason::RemoteDenied));
        assert_eq!(authority.calls(), 2);
    }

    #[tokio::test]
    async fn test_custom_policy() {
        let authority = ScriptedAuthority::new(vec![unreachable()]);
        let mut f = fixture(authority.clone());
        f.client = f
            .client
            .with_policy(RetryPolicy::new(5, Duration::from_millis(10)));

        f.client.check_access("alice", &track(), "10.0.0.1").await;

        assert_eq!(authority.calls(), 5);
        assert_eq!(
            f.sleeper.delays(),
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(30),
                Duration::from_millis(40),
            ]
        );
    }

    mod http {
        use super::*;

        async fn authority_with(server: &MockServer, timeout: Duration) -> HttpAuthority {
            HttpAuthority::new(&format!("{}/api/internal/", server.uri()), timeout).unwrap()
        }

        #[tokio::test]
        async fn test_check_access_sends_query_and_parses_boolean() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/api/internal/check-access"))
                .and(query_param("userId", "alice"))
                .and(query_param("resourceId", "track_01"))
                .respond_with(ResponseTemplate::new(200).set_body_string("true"))
                .expect(1)
                .mount(&server)
                .await;

            let authority = authority_with(&server, Duration::from_secs(5)).await;
            let answer = authority.check_access("alice", &track()).await.unwrap();
            assert_eq!(answer, Some(true));
        }

        #[tokio::test]
        async fn test_empty_body_is_no_verdict() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/api/internal/check-access"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server)
                .await;

            let authority = authority_with(&server, Duration::from_secs(5)).await;
            assert_eq!(authority.check_access("bob", &track()).await.unwrap(), None);
        }

        #[tokio::test]
        async fn test_error_status() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/api/internal/check-access"))
                .respond_with(ResponseTemplate::new(503))
                .mount(&server)
                .await;

            let authority = authority_with(&server, Duration::from_secs(5)).await;
            assert_eq!(
                authority.check_access("bob", &track()).await,
                Err(AuthzError::AuthorityHttpError(503))
            );
        }

        #[tokio::test]
        async fn test_slow_authority_times_out() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/api/internal/check-access"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string("true")
                        .set_delay(Duration::from_millis(500)),
                )
                .mount(&server)
                .await;

            let authority = authority_with(&server, Duration::from_millis(50)).await;
            assert_eq!(
                authority.check_access("bob", &track()).await,
                Err(AuthzError::AuthorityTimeout)
            );
        }

        #[tokio::test]
        async fn test_unreachable_authority() {
            let authority =
                HttpAuthority::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
            assert!(matches!(
                authority.check_access("bob", &track()).await,
                Err(AuthzError::AuthorityUnreachable(_)) | Err(AuthzError::AuthorityTimeout)
            ));
            assert!(!authority.is_healthy().await);
        }

        #[tokio::test]
        async fn test_health_probe() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/api/internal/health"))
                .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
                .mount(&server)
                .await;

            let authority = authority_with(&server, Duration::from_secs(5)).await;
            assert!(authority.is_healthy().await);
        }

        #[tokio::test]
        async fn test_client_retries_against_http_authority() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/api/internal/check-access"))
                .respond_with(ResponseTemplate::new(500))
                .expect(3)
                .mount(&server)
                .await;

            let authority = Arc::new(authority_with(&server, Duration::from_secs(5)).await);
            let f = fixture(authority);
            let decision = f.client.check_access("alice", &track(), "10.0.0.1").await;

            assert_eq!(decision.reason, Some(DenyReason::RetriesExhausted));
            assert_eq!(f.breaker.current_failure_count(), 3);
        }

        #[test]
        fn test_invalid_base_url() {
            assert!(matches!(
                HttpAuthority::new("::not-a-url", Duration::from_secs(1)),
                Err(AuthzError::Configuration(_))
            ));
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn run<F: std::future::Future>(future: F) -> F::Output {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
                .block_on(future)
        }

        proptest! {
            #[test]
            fn success_after_k_failures(k in 0u32..3) {
                let mut answers: Vec<Result<Option<bool>>> = (0..k).map(|_| unreachable()).collect();
                answers.push(Ok(Some(true)));
                let authority = ScriptedAuthority::new(answers);
                let f = fixture(authority.clone());

                let decision = run(f.client.check_access("alice", &track(), "10.0.0.1"));

                prop_assert!(decision.granted);
                prop_assert_eq!(authority.calls(), k + 1);
                prop_assert_eq!(f.breaker.current_failure_count(), 0);
                prop_assert_eq!(f.sleeper.delays().len() as u32, k);
            }

            #[test]
            fn always_failing_uses_exact_budget(max_attempts in 1u32..8) {
                let authority = ScriptedAuthority::new(vec![unreachable()]);
                let mut f = fixture(authority.clone());
                f.client = f.client.with_policy(RetryPolicy::new(max_attempts, Duration::ZERO));

                let decision = run(f.client.check_access("alice", &track(), "10.0.0.1"));

                prop_assert_eq!(decision.reason, Some(DenyReason::RetriesExhausted));
                prop_assert_eq!(authority.calls(), max_attempts);
                prop_assert_eq!(f.breaker.current_failure_count(), max_attempts);
                prop_assert_eq!(f.audit.events().len() as u32, max_attempts);
            }
        }
    }
}
