//! End-to-end gateway scenarios against an in-memory authority.

use async_trait::async_trait;
use authz::audit::MemoryAuditSink;
use authz::client::RecordingSleeper;
use authz::{
    AccessGateway, AccessRequest, AuditEvent, Authority, AuthzError, DenyReason, GatewayConfig,
    RejectReason, ResourceId, Result, SigningKey, TokenIssuer, Verdict,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

enum Behaviour {
    Answer(bool),
    Unreachable,
}

struct InMemoryAuthority {
    behaviour: Behaviour,
    calls: AtomicU32,
}

impl InMemoryAuthority {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authority for InMemoryAuthority {
    async fn check_access(&self, _user_id: &str, _resource_id: &ResourceId) -> Result<Option<bool>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Answer(allowed) => Ok(Some(allowed)),
            Behaviour::Unreachable => Err(AuthzError::AuthorityUnreachable(
                "connection refused".to_string(),
            )),
        }
    }

    async fn is_healthy(&self) -> bool {
        matches!(self.behaviour, Behaviour::Answer(_))
    }
}

struct Harness {
    gateway: AccessGateway,
    authority: Arc<InMemoryAuthority>,
    audit: MemoryAuditSink,
    sleeper: RecordingSleeper,
    issuer: TokenIssuer,
}

fn harness(behaviour: Behaviour) -> Harness {
    let config = GatewayConfig {
        jwt_secret: STANDARD.encode(b"0123456789abcdef0123456789abcdef"),
        jwt_issuer: "main-app".to_string(),
        jwt_audience: "audio-resource-provider".to_string(),
        ..GatewayConfig::default()
    };
    let key = SigningKey::from_secret(&config.jwt_secret);
    let issuer = TokenIssuer::new(&key, config.jwt_issuer.clone(), config.jwt_audience.clone());

    let authority = InMemoryAuthority::new(behaviour);
    let audit = MemoryAuditSink::new();
    let sleeper = RecordingSleeper::new();
    let gateway = AccessGateway::builder(config)
        .authority(authority.clone())
        .audit_sink(Arc::new(audit.clone()))
        .sleeper(Arc::new(sleeper.clone()))
        .build()
        .unwrap();

    Harness {
        gateway,
        authority,
        audit,
        sleeper,
        issuer,
    }
}

fn alice_token(h: &Harness) -> String {
    h.issuer
        .issue("alice", None, &["stream"], Duration::from_secs(600))
        .unwrap()
}

#[tokio::test]
async fn scenario_a_valid_token_is_granted() {
    let h = harness(Behaviour::Answer(true));
    let request = AccessRequest::new(Some(alice_token(&h)), "track_01", "203.0.113.7");

    let verdict = h.gateway.evaluate(&request).await;

    match verdict {
        Verdict::Granted {
            identity,
            resource_id,
        } => {
            assert_eq!(identity.user_id, "alice");
            assert!(identity.has_permission("stream"));
            assert_eq!(resource_id.as_str(), "track_01");
        }
        other => panic!("expected grant, got {other}"),
    }
    assert_eq!(h.authority.calls(), 1);
    assert_eq!(h.gateway.circuit_breaker().current_failure_count(), 0);
    assert_eq!(
        h.audit.events(),
        vec![AuditEvent::AccessGranted {
            user_id: "alice".to_string(),
            resource_id: "track_01".to_string(),
            client_ip: "203.0.113.7".to_string(),
        }]
    );
}

#[tokio::test]
async fn scenario_b_path_traversal_is_rejected_without_network() {
    let h = harness(Behaviour::Answer(true));
    let request = AccessRequest::new(Some(alice_token(&h)), "../../etc/passwd", "203.0.113.7");

    let verdict = h.gateway.evaluate(&request).await;

    assert_eq!(verdict, Verdict::Rejected(RejectReason::BadFormat));
    assert_eq!(h.authority.calls(), 0);
    assert_eq!(h.audit.tags(), vec!["UNAUTHORIZED_ACCESS_ATTEMPT"]);
}

#[tokio::test]
async fn scenario_c_open_breaker_denies_without_network() {
    let h = harness(Behaviour::Answer(true));
    for _ in 0..5 {
        h.gateway.circuit_breaker().record_failure();
    }
    let request = AccessRequest::new(Some(alice_token(&h)), "track_01", "203.0.113.7");

    let verdict = h.gateway.evaluate(&request).await;

    assert_eq!(verdict, Verdict::Denied(DenyReason::CircuitBreakerOpen));
    assert_eq!(h.authority.calls(), 0);
    assert_eq!(h.gateway.circuit_breaker().current_failure_count(), 5);
    assert_eq!(h.audit.tags(), vec!["ACCESS_DENIED"]);
}

#[tokio::test]
async fn scenario_d_unreachable_authority_exhausts_retries() {
    let h = harness(Behaviour::Unreachable);
    let request = AccessRequest::new(Some(alice_token(&h)), "track_01", "203.0.113.7");

    let verdict = h.gateway.evaluate(&request).await;

    assert_eq!(verdict, Verdict::Denied(DenyReason::RetriesExhausted));
    assert_eq!(h.authority.calls(), 3);
    assert_eq!(h.gateway.circuit_breaker().current_failure_count(), 3);
    assert_eq!(
        h.sleeper.delays(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
    assert_eq!(
        h.audit.tags(),
        vec![
            "AUTHORITY_ATTEMPT_FAILED",
            "AUTHORITY_ATTEMPT_FAILED",
            "AUTHORITY_ATTEMPT_FAILED",
            "ACCESS_DENIED",
        ]
    );
    match h.audit.events().last() {
        Some(AuditEvent::AccessDenied { reason, .. }) => {
            assert_eq!(*reason, DenyReason::RetriesExhausted)
        }
        other => panic!("unexpected final audit record {other:?}"),
    }
}

#[tokio::test]
async fn repeated_outages_open_the_breaker() {
    let h = harness(Behaviour::Unreachable);
    let request = AccessRequest::new(Some(alice_token(&h)), "track_01", "203.0.113.7");

    h.gateway.evaluate(&request).await;
    h.gateway.evaluate(&request).await;
    assert_eq!(h.authority.calls(), 6);

    let verdict = h.gateway.evaluate(&request).await;
    assert_eq!(verdict, Verdict::Denied(DenyReason::CircuitBreakerOpen));
    assert_eq!(h.authority.calls(), 6);
}

#[tokio::test]
async fn remote_denial_is_distinct_from_failure() {
    let h = harness(Behaviour::Answer(false));
    let request = AccessRequest::new(Some(alice_token(&h)), "track_01", "203.0.113.7");

    let verdict = h.gateway.evaluate(&request).await;

    assert_eq!(verdict, Verdict::Denied(DenyReason::RemoteDenied));
    assert_eq!(h.gateway.circuit_breaker().current_failure_count(), 0);
    assert_eq!(h.audit.tags(), vec!["ACCESS_DENIED"]);
}

#[tokio::test]
async fn expired_token_is_rejected_before_the_authority() {
    let h = harness(Behaviour::Answer(true));
    let expired = h
        .issuer
        .issue("alice", None, &[], Duration::ZERO)
        .unwrap();
    let request = AccessRequest::new(Some(expired), "track_01", "203.0.113.7");

    let verdict = h.gateway.evaluate(&request).await;

    assert_eq!(verdict, Verdict::Rejected(RejectReason::BadToken));
    assert_eq!(h.authority.calls(), 0);
}

#[tokio::test]
async fn foreign_token_is_rejected() {
    let h = harness(Behaviour::Answer(true));
    let other_key = SigningKey::generate();
    let forged = TokenIssuer::new(&other_key, "main-app", "audio-resource-provider")
        .issue("mallory", Some("admin"), &[], Duration::from_secs(600))
        .unwrap();

    let verdict = h
        .gateway
        .evaluate(&AccessRequest::new(Some(forged), "track_01", "198.51.100.1"))
        .await;

    assert_eq!(verdict, Verdict::Rejected(RejectReason::BadToken));
    assert_eq!(h.authority.calls(), 0);
}
