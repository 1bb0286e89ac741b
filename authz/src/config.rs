//! Gateway configuration.
//!
//! Values come from (lowest to highest priority) built-in defaults, an optional
//! YAML file, and environment variables. A `.env` file in the working
//! directory is loaded into the environment first.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::circuit_breaker::DEFAULT_THRESHOLD;
use crate::error::{AuthzError, Result};

/// Environment variable names.
pub struct EnvKeys;

impl EnvKeys {
    pub const JWT_SECRET: &'static str = "JWT_SECRET";
    pub const JWT_ISSUER: &'static str = "JWT_ISSUER";
    pub const JWT_AUDIENCE: &'static str = "JWT_AUDIENCE";
    pub const AUTHORITY_BASE_URL: &'static str = "AUTHORITY_BASE_URL";
    pub const AUTHORITY_TIMEOUT_MS: &'static str = "AUTHORITY_TIMEOUT_MS";
    pub const AUTHORITY_RETRY_ATTEMPTS: &'static str = "AUTHORITY_RETRY_ATTEMPTS";
    pub const AUTHORITY_RETRY_BASE_DELAY_MS: &'static str = "AUTHORITY_RETRY_BASE_DELAY_MS";
    pub const CIRCUIT_BREAKER_THRESHOLD: &'static str = "CIRCUIT_BREAKER_THRESHOLD";
}

/// Configuration consumed by the access gateway core.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Standard base64 HMAC secret (at least 32 decoded bytes)
    pub jwt_secret: String,
    /// Expected `iss` claim
    pub jwt_issuer: String,
    /// Expected `aud` claim
    pub jwt_audience: String,
    /// Base URL of the remote authorization authority
    pub authority_base_url: String,
    /// Per-call timeout for authority requests
    pub authority_timeout_ms: u64,
    /// Total attempts per access check (first call included)
    pub max_retry_attempts: u32,
    /// Backoff unit; attempt `n` (0-based) waits `base * (n + 1)` before the next
    pub retry_base_delay_ms: u64,
    /// Consecutive failures that open the circuit breaker
    pub circuit_breaker_threshold: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_issuer: "main-app".to_string(),
            jwt_audience: "audio-resource-provider".to_string(),
            authority_base_url: "https://main-app.com".to_string(),
            authority_timeout_ms: 5000,
            max_retry_attempts: 3,
            retry_base_delay_ms: 1000,
            circuit_breaker_threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl GatewayConfig {
    /// Defaults overridden by the process environment (after loading `.env`).
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Defaults, then the YAML file at `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides_from(|key| std::env::var(key).ok())?;
        config.validate()?;

        info!(
            authority = %config.authority_base_url,
            timeout_ms = config.authority_timeout_ms,
            retries = config.max_retry_attempts,
            threshold = config.circuit_breaker_threshold,
            "Gateway configuration loaded"
        );
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AuthzError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        debug!("Loaded gateway configuration file {}", path.display());
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| AuthzError::Configuration(format!("invalid YAML: {}", e)))
    }

    /// Apply overrides from a key lookup (normally the process environment).
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(EnvKeys::JWT_SECRET) {
            self.jwt_secret = v;
        }
        if let Some(v) = lookup(EnvKeys::JWT_ISSUER) {
            self.jwt_issuer = v;
        }
        if let Some(v) = lookup(EnvKeys::JWT_AUDIENCE) {
            self.jwt_audience = v;
        }
        if let Some(v) = lookup(EnvKeys::AUTHORITY_BASE_URL) {
            self.authority_base_url = v;
        }
        if let Some(v) = lookup(EnvKeys::AUTHORITY_TIMEOUT_MS) {
            self.authority_timeout_ms = parse_number(EnvKeys::AUTHORITY_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = lookup(EnvKeys::AUTHORITY_RETRY_ATTEMPTS) {
            self.max_retry_attempts = parse_number(EnvKeys::AUTHORITY_RETRY_ATTEMPTS, &v)?;
        }
        if let Some(v) = lookup(EnvKeys::AUTHORITY_RETRY_BASE_DELAY_MS) {
            self.retry_base_delay_ms = parse_number(EnvKeys::AUTHORITY_RETRY_BASE_DELAY_MS, &v)?;
        }
        if let Some(v) = lookup(EnvKeys::CIRCUIT_BREAKER_THRESHOLD) {
            self.circuit_breaker_threshold =
                parse_number(EnvKeys::CIRCUIT_BREAKER_THRESHOLD, &v)?;
        }
        Ok(())
    }

    /// Reject values the gateway cannot run with.
    ///
    /// A malformed `jwt_secret` is not an error here: the verifier replaces it
    /// with a generated key and logs a warning.
    pub fn validate(&self) -> Result<()> {
        if self.max_retry_attempts == 0 {
            return Err(AuthzError::Configuration(
                "max_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(AuthzError::Configuration(
                "circuit_breaker_threshold must be at least 1".to_string(),
            ));
        }
        if self.authority_timeout_ms == 0 {
            return Err(AuthzError::Configuration(
                "authority_timeout_ms must be positive".to_string(),
            ));
        }
        Url::parse(&self.authority_base_url).map_err(|e| {
            AuthzError::Configuration(format!(
                "invalid authority_base_url {:?}: {}",
                self.authority_base_url, e
            ))
        })?;
        Ok(())
    }

    pub fn authority_timeout(&self) -> Duration {
        Duration::from_millis(self.authority_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Copy with the secret replaced, safe to print.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.jwt_secret.is_empty() {
            copy.jwt_secret = "<redacted>".to_string();
        }
        copy
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("jwt_secret", &"<redacted>")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("authority_base_url", &self.authority_base_url)
            .field("authority_timeout_ms", &self.authority_timeout_ms)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("circuit_breaker_threshold", &self.circuit_breaker_threshold)
            .finish()
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AuthzError::Configuration(format!("{} must be a number, got {:?}", key, value)))
}
