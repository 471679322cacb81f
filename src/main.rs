// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! cctv-coordinator — server-side coordinator for a CCTV monitoring
//! installation: TLS request/response server, metadata parser, serial
//! board time-sync, wired together by the supervisor.
//!
//! Usage:
//!   cctv-coordinator --env .env --config config.json

use std::path::PathBuf;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use coordinator::supervisor;

#[derive(Parser)]
#[command(name = "cctv-coordinator", about = "CCTV monitoring installation coordinator", version)]
struct Cli {
    /// Path to the `.env` file carrying camera/store credentials.
    #[arg(long, default_value = ".env")]
    env: PathBuf,

    /// Path to the `config.json` document.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Override the tracing log level (e.g. "debug", "info,coordinator=trace").
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level.clone()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = supervisor::run(&cli.env, &cli.config).await {
        error!(error = %e, "fatal startup failure");
        std::process::exit(1);
    }
}
