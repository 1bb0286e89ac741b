use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{audit, breaker, config, health, token, validate};

/// Audio gateway CLI - operator tools for the audio access gateway
#[derive(Parser)]
#[command(name = "agw")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YAML file with gateway settings; environment variables override it
    #[arg(short, long, global = true, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query a running gateway's health endpoint
    Health {
        /// Gateway base URL
        #[arg(short, long, env = "AGW_URL", default_value = "http://localhost:3030")]
        url: String,

        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Mint a development token signed with the configured secret
    Token {
        /// User id placed in the `sub` claim
        #[arg(short, long)]
        subject: String,

        /// Optional role claim (e.g. "admin")
        #[arg(short, long)]
        role: Option<String>,

        /// Permission to include; repeat for several
        #[arg(short, long = "permission")]
        permissions: Vec<String>,

        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,
    },

    /// Reset the circuit breaker of a running gateway (admin token required)
    ResetBreaker {
        /// Admin bearer token
        #[arg(short, long, env = "AGW_TOKEN")]
        token: String,

        /// Gateway base URL
        #[arg(short, long, env = "AGW_URL", default_value = "http://localhost:3030")]
        url: String,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Check whether a resource id would be accepted
    Validate {
        /// Resource id to check
        resource_id: String,
    },

    /// Audit log commands
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective gateway configuration with secrets redacted
    Show {
        /// Output format (json, yaml, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
enum AuditAction {
    /// Verify the hash chain of an audit log file
    Verify {
        /// Audit chain file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    let success = match cli.command {
        Commands::Health { url, format } => health::execute(&url, &format).await?,
        Commands::Token {
            subject,
            role,
            permissions,
            ttl_secs,
        } => token::execute(
            cli.config.as_deref(),
            &subject,
            role.as_deref(),
            &permissions,
            ttl_secs,
        )?,
        Commands::ResetBreaker { token, url } => breaker::reset(&url, &token).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show { format } => config::show(cli.config.as_deref(), &format)?,
        },
        Commands::Validate { resource_id } => validate::execute(&resource_id),
        Commands::Audit { action } => match action {
            AuditAction::Verify { path } => audit::verify(&path)?,
        },
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
