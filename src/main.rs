//! graphauth command-line entry point.
//!
//! Each invocation is one "page load": configuration is resolved and the
//! identity client constructed once, then a single command runs.

#![deny(clippy::all)]

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use graphauth::config::{Config, InjectedValues};
use graphauth::identity::public_client::PublicClientLibrary;
use graphauth::identity::IdentityLibrary;
use graphauth::overrides::{FileOverrideStore, MemoryOverrideStore, OverrideStore};
use graphauth::{settings, AdapterError, AuthConfigAdapter};

use cli::Cli;

fn main() -> ExitCode {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        // .env file is optional - only log if it's not a "file not found" error
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging.level);
    info!("Starting graphauth v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn OverrideStore> = match settings::overrides_path(&config.app) {
        Ok(path) => Arc::new(FileOverrideStore::new(path)),
        Err(e) => {
            warn!("{}, saved client ids will not persist", e);
            Arc::new(MemoryOverrideStore::new())
        }
    };

    let library = PublicClientLibrary::new(settings::token_cache_path(&config.app).ok());
    let library: Option<&dyn IdentityLibrary> = if cli.offline { None } else { Some(&library) };

    let adapter = AuthConfigAdapter::initialize(
        library,
        &config.auth,
        &InjectedValues::from_env(),
        store,
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(cli::run(&adapter, cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            match e.downcast_ref::<AdapterError>() {
                Some(adapter_error) => eprintln!("{}", adapter_error.user_message()),
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing/logging.
fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}
