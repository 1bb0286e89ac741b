//! The access gateway.
//!
//! One [`AccessGateway::evaluate`] call turns an [`AccessRequest`] into a
//! [`Verdict`]:
//!
//! ```text
//! resource id invalid   -> Rejected(bad_format)
//! token missing/invalid -> Rejected(bad_token)
//! breaker open          -> Denied(circuit_breaker_open)
//! authority             -> Granted | Denied(remote_denied | retries_exhausted | malformed_response)
//! ```
//!
//! No retries happen at this layer; the authorization client owns them.

use prometheus::Registry;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::audit::{self, AuditEvent, AuditSink, TracingAuditSink};
use crate::circuit_breaker::CircuitBreaker;
use crate::client::{Authority, AuthorizationClient, HttpAuthority, RetryPolicy, Sleeper, TokioSleeper};
use crate::config::GatewayConfig;
use crate::error::{AuthzError, Result};
use crate::metrics::AccessMetrics;
use crate::resource_id::ResourceId;
use crate::token::{Clock, SigningKey, SystemClock, TokenVerifier};
use crate::types::{AccessRequest, DenyReason, Identity, RejectReason, Verdict};

/// Access gateway. Shared behind an `Arc` by every request handler.
pub struct AccessGateway {
    verifier: TokenVerifier,
    breaker: Arc<CircuitBreaker>,
    client: AuthorizationClient,
    audit: Arc<dyn AuditSink>,
    metrics: AccessMetrics,
}

impl AccessGateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Gateway talking to the HTTP authority named in `config`.
    pub fn from_config(config: GatewayConfig) -> Result<Self> {
        GatewayBuilder::new(config).build()
    }

    /// Evaluate one access request.
    pub async fn evaluate(&self, request: &AccessRequest) -> Verdict {
        self.metrics.record_request();

        let resource_id = match ResourceId::parse(&request.resource_id) {
            Ok(resource_id) => resource_id,
            Err(_) => {
                self.log_unauthorized_access(
                    &request.resource_id,
                    &request.client_ip,
                    RejectReason::BadFormat,
                )
                .await;
                return Verdict::Rejected(RejectReason::BadFormat);
            }
        };

        let identity = match request.token.as_deref().map(|t| self.verify_token(t)) {
            Some(Ok(identity)) => identity,
            Some(Err(_)) | None => {
                if request.token.is_none() {
                    debug!(ip = %request.client_ip, "Request without bearer token");
                }
                self.log_unauthorized_access(
                    resource_id.as_str(),
                    &request.client_ip,
                    RejectReason::BadToken,
                )
                .await;
                return Verdict::Rejected(RejectReason::BadToken);
            }
        };

        if let Err(e) = self.breaker.ensure_closed() {
            warn!(
                failures = self.breaker.current_failure_count(),
                threshold = self.breaker.threshold(),
                kind = e.kind(),
                "{}, refusing access check",
                e
            );
            return self
                .deny(&identity, &resource_id, &request.client_ip, DenyReason::CircuitBreakerOpen)
                .await;
        }

        let started = Instant::now();
        let decision = self
            .client
            .check_access(&identity.user_id, &resource_id, &request.client_ip)
            .await;
        self.metrics.record_check_duration(started.elapsed());

        if decision.granted {
            self.metrics.record_granted();
            audit::emit(
                self.audit.as_ref(),
                AuditEvent::AccessGranted {
                    user_id: identity.user_id.clone(),
                    resource_id: resource_id.to_string(),
                    client_ip: request.client_ip.clone(),
                },
            )
            .await;
            Verdict::Granted {
                identity,
                resource_id,
            }
        } else {
            let reason = decision.reason.unwrap_or(DenyReason::RemoteDenied);
            self.deny(&identity, &resource_id, &request.client_ip, reason)
                .await
        }
    }

    async fn deny(
        &self,
        identity: &Identity,
        resource_id: &ResourceId,
        client_ip: &str,
        reason: DenyReason,
    ) -> Verdict {
        self.metrics.record_denied();
        audit::emit(
            self.audit.as_ref(),
            AuditEvent::AccessDenied {
                user_id: identity.user_id.clone(),
                resource_id: resource_id.to_string(),
                client_ip: client_ip.to_string(),
                reason,
            },
        )
        .await;
        Verdict::Denied(reason)
    }

    /// Evaluate on a spawned task.
    ///
    /// Dropping the returned future does not cancel the evaluation, so retry
    /// attempts and their audit records always run to completion.
    pub async fn evaluate_detached(self: &Arc<Self>, request: AccessRequest) -> Result<Verdict> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move { gateway.evaluate(&request).await })
            .await
            .map_err(|e| AuthzError::Internal(format!("access evaluation task failed: {}", e)))
    }

    pub fn verify_token(&self, token: &str) -> Result<Identity> {
        self.verifier.verify(token)
    }

    /// Audit a request refused before the authority was consulted.
    pub async fn log_unauthorized_access(
        &self,
        resource_id: &str,
        client_ip: &str,
        reason: RejectReason,
    ) {
        self.metrics.record_unauthorized();
        audit::emit(
            self.audit.as_ref(),
            AuditEvent::UnauthorizedAccessAttempt {
                resource_id: resource_id.to_string(),
                client_ip: client_ip.to_string(),
                reason,
            },
        )
        .await;
    }

    /// Close the circuit breaker. Returns the failure count before the reset.
    ///
    /// Role checks belong to the caller; this only records who asked.
    pub async fn reset_circuit_breaker(&self, actor: &Identity) -> u32 {
        let previous_failures = self.breaker.current_failure_count();
        self.breaker.reset();
        info!(
            actor = %actor.user_id,
            previous_failures,
            "Circuit breaker manually reset"
        );
        audit::emit(
            self.audit.as_ref(),
            AuditEvent::CircuitBreakerReset {
                actor: actor.user_id.clone(),
                previous_failures,
            },
        )
        .await;
        previous_failures
    }

    pub async fn authority_healthy(&self) -> bool {
        self.client.authority_healthy().await
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> &AccessMetrics {
        &self.metrics
    }
}

/// Assembles an [`AccessGateway`], with production defaults for every
/// collaborator that is not supplied.
pub struct GatewayBuilder {
    config: GatewayConfig,
    authority: Option<Arc<dyn Authority>>,
    audit: Option<Arc<dyn AuditSink>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    clock: Option<Arc<dyn Clock>>,
    breaker: Option<Arc<CircuitBreaker>>,
    registry: Option<Registry>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            authority: None,
            audit: None,
            sleeper: None,
            clock: None,
            breaker: None,
            registry: None,
        }
    }

    pub fn authority(mut self, authority: Arc<dyn Authority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share an existing breaker instead of creating one from the threshold.
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Register the access metrics in an existing prometheus registry.
    pub fn metrics_registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<AccessGateway> {
        let config = self.config;
        config.validate()?;

        let key = SigningKey::from_secret(&config.jwt_secret);
        let verifier = TokenVerifier::new(&key, &config.jwt_issuer, &config.jwt_audience)
            .with_clock(self.clock.unwrap_or_else(|| Arc::new(SystemClock)));

        let authority = match self.authority {
            Some(authority) => authority,
            None => Arc::new(HttpAuthority::new(
                &config.authority_base_url,
                config.authority_timeout(),
            )?),
        };
        let breaker = self
            .breaker
            .unwrap_or_else(|| Arc::new(CircuitBreaker::new(config.circuit_breaker_threshold)));
        let audit = self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink));
        let sleeper = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));
        let metrics = match self.registry {
            Some(registry) => AccessMetrics::with_registry(registry)?,
            None => AccessMetrics::new()?,
        };

        let client = AuthorizationClient::new(authority, breaker.clone(), audit.clone())
            .with_policy(RetryPolicy::new(
                config.max_retry_attempts,
                config.retry_base_delay(),
            ))
            .with_sleeper(sleeper);

        info!(
            issuer = %config.jwt_issuer,
            audience = %config.jwt_audience,
            threshold = breaker.threshold(),
            generated_key = key.is_generated(),
            "Access gateway initialised"
        );

        Ok(AccessGateway {
            verifier,
            breaker,
            client,
            audit,
            metrics,
        })
    }
}
