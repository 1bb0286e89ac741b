use audio_gateway::RunOptions;
use clap::Parser;
use std::path::PathBuf;

/// Token-protected audio streaming service
#[derive(Parser)]
#[command(name = "audio-gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML file with gateway settings; environment variables override it
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

fn main() {
    let args = Args::parse();

    let options = RunOptions {
        config_file: args.config,
        port: args.port,
    };

    if let Err(e) = audio_gateway::run(options) {
        eprintln!("audio-gateway: {}", e);
        std::process::exit(1);
    }
}
