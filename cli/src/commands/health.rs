use anyhow::Result;
use colored::*;
use serde_json::{json, Value};
use std::time::Duration;

/// Execute the health check command
///
/// Returns `false` when the gateway is unreachable or reports anything other
/// than `UP`.
pub async fn execute(base_url: &str, format: &str) -> Result<bool> {
    let status = fetch_health(base_url).await;
    let healthy = status["status"].as_str() == Some("UP");

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&status)?),
        _ => print_health_status_text(&status),
    }

    Ok(healthy)
}

/// Query `{base_url}/health`, folding transport failures into the result
async fn fetch_health(base_url: &str) -> Value {
    let endpoint = format!("{}/health", base_url.trim_end_matches('/'));

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(client) => client,
        Err(e) => return offline(&endpoint, e.to_string()),
    };

    match client.get(&endpoint).send().await {
        Ok(response) if response.status().is_success() => match response.json::<Value>().await {
            Ok(mut body) => {
                body["endpoint"] = json!(endpoint);
                body
            }
            Err(e) => json!({
                "status": "UNKNOWN",
                "message": format!("Invalid health response: {}", e),
                "endpoint": endpoint,
            }),
        },
        Ok(response) => json!({
            "status": "DOWN",
            "message": format!("Gateway returned status: {}", response.status()),
            "endpoint": endpoint,
        }),
        Err(e) => offline(&endpoint, e.to_string()),
    }
}

fn offline(endpoint: &str, error: String) -> Value {
    json!({
        "status": "OFFLINE",
        "message": format!("Gateway is not running or not reachable: {}", error),
        "endpoint": endpoint,
    })
}

/// Print health status in a formatted text output
fn print_health_status_text(status: &Value) {
    println!("{}", "=== Audio Gateway Health Check ===".bold());
    println!();

    let overall = status["status"].as_str().unwrap_or("UNKNOWN");
    let overall_display = match overall {
        "UP" => overall.green().bold(),
        "DOWN" | "OFFLINE" => overall.red().bold(),
        _ => overall.yellow().bold(),
    };

    println!("Overall Status: {}", overall_display);
    println!("Endpoint: {}", status["endpoint"].as_str().unwrap_or(""));
    if let Some(message) = status["message"].as_str() {
        println!("  {}", message);
        return;
    }
    if let Some(version) = status["version"].as_str() {
        println!("Version: {}", version);
    }
    println!();

    println!("{}", "Authorization:".bold());
    println!("{}", "─".repeat(50));

    let connectivity = match status["main_app_connectivity"].as_bool() {
        Some(true) => "reachable".green(),
        Some(false) => "unreachable".red(),
        None => "unknown".white(),
    };
    println!("Authority: {}", connectivity);

    let breaker_state = status["circuit_breaker_state"].as_str().unwrap_or("unknown");
    let breaker_display = match breaker_state {
        "closed" => breaker_state.green(),
        "open" => breaker_state.red(),
        _ => breaker_state.white(),
    };
    println!(
        "Circuit breaker: {} ({} consecutive failures)",
        breaker_display,
        status["circuit_breaker_failures"].as_u64().unwrap_or(0)
    );

    if let Some(metrics) = status["metrics"].as_object() {
        println!();
        println!("{}", "Metrics:".bold());
        println!("{}", "─".repeat(50));
        for (name, value) in metrics {
            println!("  {}: {}", name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_health_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "UP",
                "main_app_connectivity": true,
                "circuit_breaker_failures": 0,
                "circuit_breaker_state": "closed",
            })))
            .mount(&server)
            .await;

        let status = fetch_health(&format!("{}/", server.uri())).await;

        assert_eq!(status["status"], "UP");
        assert_eq!(status["endpoint"], format!("{}/health", server.uri()));
    }

    #[tokio::test]
    async fn test_fetch_health_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let status = fetch_health(&server.uri()).await;

        assert_eq!(status["status"], "DOWN");
    }

    #[tokio::test]
    async fn test_fetch_health_offline() {
        // Nothing listens on port 9 (discard) in test environments
        let status = fetch_health("http://127.0.0.1:9").await;
        assert_eq!(status["status"], "OFFLINE");
    }
}
