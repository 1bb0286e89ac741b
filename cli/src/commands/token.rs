use anyhow::{bail, Context, Result};
use authz::{GatewayConfig, SigningKey, TokenIssuer};
use std::path::Path;
use std::time::Duration;

/// Mint a development token and print it to stdout
pub fn execute(
    config_file: Option<&Path>,
    subject: &str,
    role: Option<&str>,
    permissions: &[String],
    ttl_secs: u64,
) -> Result<bool> {
    if subject.trim().is_empty() {
        bail!("subject must not be empty");
    }

    let config = GatewayConfig::load(config_file).context("Failed to load gateway configuration")?;
    let key = SigningKey::from_secret(&config.jwt_secret);
    if key.is_generated() {
        bail!("JWT_SECRET is missing or invalid; a token signed with a random key would never verify");
    }

    let permissions: Vec<&str> = permissions.iter().map(String::as_str).collect();
    let token = TokenIssuer::new(&key, config.jwt_issuer, config.jwt_audience)
        .issue(subject, role, &permissions, Duration::from_secs(ttl_secs))?;

    println!("{}", token);
    Ok(true)
}
