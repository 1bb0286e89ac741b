use authz::{AccessGateway, AuthzError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::{create_router, AppState};

/// API server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Interface to bind
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Directory holding `{resource_id}.mp3` files
    pub audio_dir: PathBuf,
    /// Allowed CORS origins; `https://*.example.com` matches any subdomain and
    /// `*` any origin. Empty means same-origin only.
    pub cors_allowed_origins: Vec<String>,
    /// Audio stream requests per second, process wide
    pub audio_rate_limit_per_sec: u32,
    /// Requests per second on other rate-limited routes
    pub default_rate_limit_per_sec: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3030,
            audio_dir: PathBuf::from("audio-files"),
            cors_allowed_origins: Vec::new(),
            audio_rate_limit_per_sec: 5,
            default_rate_limit_per_sec: 10,
        }
    }
}

impl ApiConfig {
    /// Create a new API configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_audio_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.audio_dir = dir.into();
        self
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_allowed_origins = origins;
        self
    }

    pub fn with_rate_limits(mut self, audio_per_sec: u32, default_per_sec: u32) -> Self {
        self.audio_rate_limit_per_sec = audio_per_sec;
        self.default_rate_limit_per_sec = default_per_sec;
        self
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, AuthzError> {
        let mut config = Self::default();
        config.apply_overrides_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `HOST`, `PORT`, `AUDIO_DIR`, `CORS_ALLOWED_ORIGINS`,
    /// `AUDIO_RATE_LIMIT` and `DEFAULT_RATE_LIMIT` from a key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), AuthzError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = parse_env("PORT", &port)?;
        }
        if let Some(dir) = lookup("AUDIO_DIR") {
            self.audio_dir = PathBuf::from(dir);
        }
        if let Some(origins) = lookup("CORS_ALLOWED_ORIGINS") {
            self.cors_allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(rps) = lookup("AUDIO_RATE_LIMIT") {
            self.audio_rate_limit_per_sec = parse_env("AUDIO_RATE_LIMIT", &rps)?;
        }
        if let Some(rps) = lookup("DEFAULT_RATE_LIMIT") {
            self.default_rate_limit_per_sec = parse_env("DEFAULT_RATE_LIMIT", &rps)?;
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AuthzError> {
    value
        .trim()
        .parse()
        .map_err(|_| AuthzError::Configuration(format!("{} has invalid value {:?}", key, value)))
}

/// Bind the listener for `config`.
pub async fn bind(config: &ApiConfig) -> std::io::Result<TcpListener> {
    TcpListener::bind(config.bind_address()).await
}

/// Serve the router on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

/// Start the API server and run until Ctrl+C or SIGTERM
pub async fn start_server_with_config(
    gateway: Arc<AccessGateway>,
    config: ApiConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = bind(&config).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);
    info!("Swagger UI available at http://localhost:{}/api/swagger", addr.port());
    info!("Serving audio files from {}", config.audio_dir.display());

    let state = AppState::new(gateway, config);
    serve(listener, state, shutdown_signal()).await?;

    info!("API server stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
