use anyhow::{bail, Result};
use colored::*;
use serde_json::Value;
use std::time::Duration;

/// Reset the circuit breaker of a running gateway
pub async fn reset(base_url: &str, token: &str) -> Result<bool> {
    let endpoint = format!(
        "{}/api/admin/reset-circuit-breaker",
        base_url.trim_end_matches('/')
    );

    let response = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?
        .post(&endpoint)
        .bearer_auth(token)
        .send()
        .await?;

    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    match status.as_u16() {
        200 => {
            println!(
                "{} {}",
                "Circuit breaker reset.".green().bold(),
                body["message"].as_str().unwrap_or("")
            );
            println!(
                "Previous failure count: {}",
                body["previous_failures"].as_u64().unwrap_or(0)
            );
            Ok(true)
        }
        401 => bail!("token rejected by the gateway (401)"),
        403 => bail!("token lacks the admin role (403)"),
        code => bail!(
            "gateway returned {}: {}",
            code,
            body["error"]["message"].as_str().unwrap_or("no details")
        ),
    }
}
