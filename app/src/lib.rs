//! Process bootstrap for the audio gateway: environment, logging, the secure
//! audit chain, the access gateway and the HTTP server.

mod logging;

pub use logging::{init_logging, log_shutdown, LoggingGuards};

use api::ApiConfig;
use audit::{SecureLogConfig, SecureLogger};
use authz::{
    audit::{FanoutAuditSink, TracingAuditSink},
    AccessGateway, AuditSink, GatewayConfig,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Filesystem locations used by the running service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    /// Optional YAML file with gateway settings
    pub config_file: Option<PathBuf>,
    /// Directory for the rolling service and audit logs
    pub log_dir: PathBuf,
    /// Hash-chained audit file
    pub audit_chain_path: PathBuf,
}

impl Default for RuntimePaths {
    fn default() -> Self {
        Self {
            config_file: None,
            log_dir: PathBuf::from("logs"),
            audit_chain_path: PathBuf::from("logs/audit-chain.log"),
        }
    }
}

impl RuntimePaths {
    /// Load paths from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `GATEWAY_CONFIG`, `LOG_DIR` and `AUDIT_LOG_PATH` from a key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let log_dir = lookup("LOG_DIR").map(PathBuf::from);
        let audit_chain_path = match (lookup("AUDIT_LOG_PATH"), &log_dir) {
            (Some(path), _) => PathBuf::from(path),
            (None, Some(dir)) => dir.join("audit-chain.log"),
            (None, None) => defaults.audit_chain_path,
        };

        Self {
            config_file: lookup("GATEWAY_CONFIG").map(PathBuf::from),
            log_dir: log_dir.unwrap_or(defaults.log_dir),
            audit_chain_path,
        }
    }
}

/// Open the secure audit chain and build the gateway that writes to it and to
/// the `audit` tracing target.
pub fn build_gateway(
    config: GatewayConfig,
    paths: &RuntimePaths,
) -> Result<AccessGateway, Box<dyn std::error::Error>> {
    let secure_log = SecureLogger::new(SecureLogConfig {
        log_path: paths.audit_chain_path.clone(),
        ..SecureLogConfig::default()
    })?;

    let sinks: Vec<Arc<dyn AuditSink>> = vec![Arc::new(TracingAuditSink), Arc::new(secure_log)];
    let gateway = AccessGateway::builder(config)
        .audit_sink(Arc::new(FanoutAuditSink::new(sinks)))
        .build()?;
    Ok(gateway)
}

/// Startup options taken from the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    pub port: Option<u16>,
}

pub fn run(options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let mut paths = RuntimePaths::from_env();
    if options.config_file.is_some() {
        paths.config_file = options.config_file;
    }

    let _guards = init_logging(&paths.log_dir)?;

    tracing::info!("=== Audio gateway starting up ===");
    tracing::info!("  Log directory: {:?}", paths.log_dir);
    tracing::info!("  Audit chain: {:?}", paths.audit_chain_path);
    if let Some(file) = &paths.config_file {
        tracing::info!("  Configuration file: {:?}", file);
    }

    let gateway_config = GatewayConfig::load(paths.config_file.as_deref())?;
    let mut api_config = ApiConfig::from_env()?;
    if let Some(port) = options.port {
        api_config = api_config.with_port(port);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async {
        let gateway = Arc::new(build_gateway(gateway_config, &paths)?);
        api::start_server_with_config(gateway, api_config).await
    });

    if let Err(e) = &result {
        tracing::error!("Audio gateway stopped with error: {}", e);
    }
    log_shutdown();
    result
}
