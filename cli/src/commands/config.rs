use anyhow::{Context, Result};
use authz::{GatewayConfig, SigningKey};
use colored::*;
use std::path::Path;

/// Show the effective gateway configuration with the secret redacted
pub fn show(config_file: Option<&Path>, format: &str) -> Result<bool> {
    let config = GatewayConfig::load(config_file).context("Failed to load gateway configuration")?;
    let values = redacted_values(&config)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&values)?),
        "yaml" => print!("{}", serde_yaml::to_string(&values)?),
        _ => print_config_text(&values, secret_status(&config)),
    }

    Ok(true)
}

/// Configuration as a YAML mapping, safe to print
fn redacted_values(config: &GatewayConfig) -> Result<serde_yaml::Value> {
    Ok(serde_yaml::to_value(config.redacted())?)
}

/// Whether the configured secret will actually be used for verification
fn secret_status(config: &GatewayConfig) -> &'static str {
    if config.jwt_secret.is_empty() {
        "unset (a random key is generated at startup)"
    } else if SigningKey::from_secret(&config.jwt_secret).is_generated() {
        "invalid (a random key is generated at startup)"
    } else {
        "configured"
    }
}

fn print_config_text(values: &serde_yaml::Value, secret: &str) {
    println!("{}", "=== Audio Gateway Configuration ===".bold());
    println!();

    if let serde_yaml::Value::Mapping(map) = values {
        for (key, value) in map {
            let key = key.as_str().unwrap_or("?");
            println!("  {}: {}", key.cyan(), format_scalar(value));
        }
    }

    println!();
    println!("{}: {}", "Signing secret".bold(), secret.yellow());
}

fn format_scalar(value: &serde_yaml::Value) -> ColoredString {
    match value {
        serde_yaml::Value::Null => "null".white(),
        serde_yaml::Value::Bool(b) => b.to_string().blue(),
        serde_yaml::Value::Number(n) => n.to_string().magenta(),
        serde_yaml::Value::String(s) if s.contains('/') => s.green(),
        serde_yaml::Value::String(s) => s.yellow(),
        other => format!("{:?}", other).white(),
    }
}
