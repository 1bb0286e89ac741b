//! Bearer token verification (HS256 JWT).
//!
//! Verification is a pure function of the token, the signing key and the
//! current time. The key is immutable after construction, so a single
//! [`TokenVerifier`] can be shared by any number of concurrent requests.
//!
//! # Check order
//!
//! 1. Structure (three base64url segments, JSON claims) -> `TokenMalformed`
//! 2. `now >= exp` -> `TokenExpired`, before the signature is looked at
//! 3. Signature -> `TokenSignatureInvalid`
//! 4. Issuer, then audience -> `TokenIssuerMismatch` / `TokenAudienceMismatch`
//! 5. Non-empty subject -> `TokenNoSubject`

use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
    Engine,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AuthzError, Result};
use crate::types::Identity;

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Symmetric HMAC key material.
#[derive(Clone)]
pub struct SigningKey {
    bytes: Vec<u8>,
    generated: bool,
}

impl SigningKey {
    /// Minimum accepted key length in bytes (256 bits for HS256).
    pub const MIN_LEN: usize = 32;

    /// Build a key from a standard base64 secret.
    ///
    /// A secret that does not decode, or decodes to fewer than [`Self::MIN_LEN`]
    /// bytes, is replaced by a freshly generated random key. Every token signed
    /// with the configured secret is then rejected until the process restarts
    /// with a valid secret.
    pub fn from_secret(secret: &str) -> Self {
        match BASE64.decode(secret.trim().as_bytes()) {
            Ok(bytes) if bytes.len() >= Self::MIN_LEN => Self {
                bytes,
                generated: false,
            },
            Ok(bytes) => {
                warn!(
                    key_len = bytes.len(),
                    "Configured JWT secret is shorter than {} bytes, generating a process-local key; previously issued tokens will not validate",
                    Self::MIN_LEN
                );
                Self::generate()
            }
            Err(e) => {
                warn!(
                    "Configured JWT secret is not valid base64 ({}), generating a process-local key; previously issued tokens will not validate",
                    e
                );
                Self::generate()
            }
        }
    }

    /// Generate a random process-local key.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = vec![0u8; Self::MIN_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            bytes,
            generated: true,
        }
    }

    /// True if the configured secret was rejected and a random key substituted.
    pub fn is_generated(&self) -> bool {
        self.generated
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(&self.bytes)
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(&self.bytes)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("bytes", &"<redacted>")
            .field("generated", &self.generated)
            .finish()
    }
}

/// JWT claims understood by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Comma or whitespace separated permission names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
}

/// Strip the `Bearer ` scheme from an `Authorization` header value.
pub fn extract_bearer(header_value: &str) -> Option<&str> {
    let token = header_value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Stateless verifier for gateway bearer tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    issuer: String,
    audience: String,
    clock: Arc<dyn Clock>,
}

impl TokenVerifier {
    pub fn new(key: &SigningKey, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            key: key.decoding_key(),
            issuer: issuer.into(),
            audience: audience.into(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for expiry checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Verify `token` and extract the caller identity.
    pub fn verify(&self, token: &str) -> Result<Identity> {
        let result = self.verify_inner(token);
        match &result {
            Ok(identity) => debug!(user = %identity.user_id, "Token verified"),
            Err(e) => warn!(kind = e.kind(), "Token verification failed: {}", e),
        }
        result
    }

    fn verify_inner(&self, token: &str) -> Result<Identity> {
        let unverified = peek_claims(token)?;

        if self.clock.now().timestamp() >= unverified.exp {
            return Err(AuthzError::TokenExpired);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = decode::<Claims>(token, &self.key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    AuthzError::TokenSignatureInvalid
                }
                _ => AuthzError::TokenMalformed,
            })?
            .claims;

        if claims.iss.as_deref() != Some(self.issuer.as_str()) {
            return Err(AuthzError::TokenIssuerMismatch);
        }
        if claims.aud.as_deref() != Some(self.audience.as_str()) {
            return Err(AuthzError::TokenAudienceMismatch);
        }

        let user_id = match claims.sub.as_deref().map(str::trim) {
            Some(sub) if !sub.is_empty() => sub.to_string(),
            _ => return Err(AuthzError::TokenNoSubject),
        };

        let expires_at =
            DateTime::from_timestamp(claims.exp, 0).ok_or(AuthzError::TokenMalformed)?;
        let issued_at = claims.iat.and_then(|iat| DateTime::from_timestamp(iat, 0));

        Ok(Identity {
            user_id,
            role: claims.role,
            permissions: parse_permissions(claims.permissions.as_deref()),
            issued_at,
            expires_at,
        })
    }
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

/// Decode the claims segment without checking the signature.
fn peek_claims(token: &str) -> Result<Claims> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(AuthzError::TokenMalformed);
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AuthzError::TokenMalformed)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthzError::TokenMalformed)
}

fn parse_permissions(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Signs gateway tokens with the same key material as the verifier.
///
/// Used by the operator CLI to mint development tokens and by tests. It is not
/// a login flow.
#[derive(Clone)]
pub struct TokenIssuer {
    key: EncodingKey,
    issuer: String,
    audience: String,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(key: &SigningKey, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            key: key.encoding_key(),
            issuer: issuer.into(),
            audience: audience.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Issue a token for `subject` valid for `ttl`.
    pub fn issue(
        &self,
        subject: &str,
        role: Option<&str>,
        permissions: &[&str],
        ttl: Duration,
    ) -> Result<String> {
        let now = self.clock.now().timestamp();
        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| AuthzError::Configuration("token ttl out of range".to_string()))?;
        let claims = Claims {
            sub: Some(subject.to_string()),
            iss: Some(self.issuer.clone()),
            aud: Some(self.audience.clone()),
            iat: Some(now),
            exp: now.saturating_add(ttl_secs),
            role: role.map(str::to_string),
            permissions: if permissions.is_empty() {
                None
            } else {
                Some(permissions.join(","))
            },
        };
        self.sign(&claims)
    }

    /// Sign arbitrary claims.
    pub fn sign(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.key)
            .map_err(|e| AuthzError::Internal(format!("failed to sign token: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ISSUER: &str = "audio-gateway";
    const AUDIENCE: &str = "audio-clients";

    fn secret() -> String {
        BASE64.encode([7u8; 32])
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    fn verifier(key: &SigningKey) -> TokenVerifier {
        TokenVerifier::new(key, ISSUER, AUDIENCE).with_clock(Arc::new(FixedClock(now())))
    }

    fn claims(sub: Option<&str>, exp_offset: i64) -> Claims {
        Claims {
            sub: sub.map(str::to_string),
            iss: Some(ISSUER.to_string()),
            aud: Some(AUDIENCE.to_string()),
            iat: Some(now().timestamp() - 10),
            exp: now().timestamp() + exp_offset,
            role: None,
            permissions: None,
        }
    }

    fn sign(key: &SigningKey, claims: &Claims) -> String {
        TokenIssuer::new(key, ISSUER, AUDIENCE).sign(claims).unwrap()
    }

    #[test]
    fn test_valid_token() {
        let key = SigningKey::from_secret(&secret());
        assert!(!key.is_generated());

        let mut c = claims(Some("alice"), 3600);
        c.role = Some("admin".to_string());
        c.permissions = Some("stream, download".to_string());
        let token = sign(&key, &c);

        let identity = verifier(&key).verify(&token).unwrap();
        assert_eq!(identity.user_id, "alice");
        assert_eq!(identity.role.as_deref(), Some("admin"));
        assert_eq!(identity.permissions, vec!["stream", "download"]);
        assert_eq!(identity.expires_at.timestamp(), now().timestamp() + 3600);
    }

    #[test]
    fn test_issuer_round_trip_with_clock() {
        let key = SigningKey::from_secret(&secret());
        let issuer =
            TokenIssuer::new(&key, ISSUER, AUDIENCE).with_clock(Arc::new(FixedClock(now())));
        let token = issuer
            .issue("bob", None, &["stream"], Duration::from_secs(60))
            .unwrap();

        let identity = verifier(&key).verify(&token).unwrap();
        assert_eq!(identity.user_id, "bob");
        assert_eq!(identity.role, None);
        assert!(identity.has_permission("stream"));
    }

    #[test]
    fn test_expired_token() {
        let key = SigningKey::from_secret(&secret());
        let token = sign(&key, &claims(Some("alice"), -1));
        assert_eq!(verifier(&key).verify(&token), Err(AuthzError::TokenExpired));
    }

    #[test]
    fn test_token_expiring_now_is_expired() {
        let key = SigningKey::from_secret(&secret());
        let token = sign(&key, &claims(Some("alice"), 0));
        assert_eq!(verifier(&key).verify(&token), Err(AuthzError::TokenExpired));
    }

    #[test]
    fn test_expired_token_with_bad_signature_is_expired() {
        let key = SigningKey::from_secret(&secret());
        let other = SigningKey::generate();
        let token = sign(&other, &claims(Some("alice"), -3600));
        assert_eq!(verifier(&key).verify(&token), Err(AuthzError::TokenExpired));
    }

    #[test]
    fn test_bad_signature() {
        let key = SigningKey::from_secret(&secret());
        let other = SigningKey::generate();
        let token = sign(&other, &claims(Some("alice"), 3600));
        assert_eq!(
            verifier(&key).verify(&token),
            Err(AuthzError::TokenSignatureInvalid)
        );
    }

    #[test]
    fn test_issuer_mismatch_with_valid_signature() {
        let key = SigningKey::from_secret(&secret());
        let mut c = claims(Some("alice"), 3600);
        c.iss = Some("someone-else".to_string());
        let token = sign(&key, &c);
        assert_eq!(
            verifier(&key).verify(&token),
            Err(AuthzError::TokenIssuerMismatch)
        );

        c.iss = None;
        let token = sign(&key, &c);
        assert_eq!(
            verifier(&key).verify(&token),
            Err(AuthzError::TokenIssuerMismatch)
        );
    }

    #[test]
    fn test_audience_mismatch_with_valid_signature() {
        let key = SigningKey::from_secret(&secret());
        let mut c = claims(Some("alice"), 3600);
        c.aud = Some("other-audience".to_string());
        let token = sign(&key, &c);
        assert_eq!(
            verifier(&key).verify(&token),
            Err(AuthzError::TokenAudienceMismatch)
        );
    }

    #[test]
    fn test_missing_or_empty_subject() {
        let key = SigningKey::from_secret(&secret());
        for sub in [None, Some(""), Some("   ")] {
            let token = sign(&key, &claims(sub, 3600));
            assert_eq!(
                verifier(&key).verify(&token),
                Err(AuthzError::TokenNoSubject),
                "sub={sub:?}"
            );
        }
    }

    #[test]
    fn test_malformed_tokens() {
        let key = SigningKey::from_secret(&secret());
        let v = verifier(&key);
        for token in ["", "abc", "a.b", "a.b.c.d", "a.!!!.c", "eyJhbGciOiJIUzI1NiJ9.bm90LWpzb24.sig"] {
            assert_eq!(v.verify(token), Err(AuthzError::TokenMalformed), "{token}");
        }
    }

    #[test]
    fn test_claims_without_exp_are_malformed() {
        let key = SigningKey::from_secret(&secret());
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"alice"}"#);
        let token = format!("eyJhbGciOiJIUzI1NiJ9.{payload}.sig");
        assert_eq!(
            verifier(&key).verify(&token),
            Err(AuthzError::TokenMalformed)
        );
    }

    #[test]
    fn test_invalid_secret_generates_key() {
        let short = SigningKey::from_secret(&BASE64.encode(b"too-short"));
        assert!(short.is_generated());

        let garbage = SigningKey::from_secret("not base64 at all!!");
        assert!(garbage.is_generated());
    }

    #[test]
    fn test_tokens_signed_with_configured_secret_fail_after_regeneration() {
        // Sign with the bytes an operator intended, then verify with a key
        // built from a malformed version of the same secret.
        let intended = SigningKey::from_secret(&secret());
        let token = sign(&intended, &claims(Some("alice"), 3600));

        let substituted = SigningKey::from_secret("%%%");
        assert!(substituted.is_generated());
        assert_eq!(
            verifier(&substituted).verify(&token),
            Err(AuthzError::TokenSignatureInvalid)
        );
    }

    #[test]
    fn test_signing_key_debug_is_redacted() {
        let key = SigningKey::from_secret(&secret());
        let debug = format!("{:?}", key);
        assert!(debug.contains("redacted"));
        assert!(!debug.contains("7, 7"));
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(extract_bearer("Bearer   "), None);
        assert_eq!(extract_bearer("Basic dXNlcjpwYXNz"), None);
        assert_eq!(extract_bearer("bearer abc"), None);
    }

    #[test]
    fn test_parse_permissions() {
        assert_eq!(parse_permissions(None), Vec::<String>::new());
        assert_eq!(parse_permissions(Some("a,b c")), vec!["a", "b", "c"]);
        assert_eq!(parse_permissions(Some(" , ")), Vec::<String>::new());
    }
}
