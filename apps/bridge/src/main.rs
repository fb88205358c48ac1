use anyhow::{Context, Result};
use clap::Parser;
use ollama_bridge::{
    Args, Config, LifecycleController,
    config::TunnelKind,
    credentials::{CredentialStore, resolve_credential},
    display,
};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Resolve the managed tunnel credential and build the run configuration
fn prepare(args: Args) -> Result<Config> {
    let credential = if args.authtoken.is_some() || args.tunnel == TunnelKind::Managed {
        match CredentialStore::open_default() {
            Ok(store) => resolve_credential(&store, args.authtoken.clone())
                .context("Failed to resolve the managed tunnel authtoken")?,
            Err(e) => {
                warn!("{}; the authtoken will not be persisted", e);
                args.authtoken.clone()
            }
        }
    } else {
        None
    };

    Config::from_args(args, credential).context("Invalid command line")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let default_filter = if args.verbose {
        "ollama_bridge=debug,ollama_bridge_common=debug,info"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Ollama Bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = match prepare(args) {
        Ok(config) => config,
        Err(e) => {
            display::print_fatal(&format!("{:#}", e));
            return ExitCode::FAILURE;
        }
    };

    ExitCode::from(LifecycleController::new(config).run().await)
}
