//! trackstream daemon
//!
//! Listens for streamed sequence records and persists them into a directory
//! of experiment files until Ctrl-C.

use std::env;
use std::path::Path;

use trackstream::config::AppConfig;
use trackstream::error::{Error, Result};
use trackstream::storage::FileStore;
use trackstream::streaming::StreamServer;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `trackstream <path>` (positional)
/// - `trackstream --config <path>` (flag-based)
/// - `trackstream -c <path>` (short flag)
///
/// Returns `None` when no path is given; built-in defaults are used then.
fn parse_config_path() -> Option<String> {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return Some(args[1].clone());
    }

    None
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let config = match &config_path {
        Some(path) => AppConfig::from_file(Path::new(path))?,
        None => AppConfig::default(),
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("trackstream v{} starting...", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => log::info!("Using config: {}", path),
        None => log::info!("No config given, using defaults"),
    }

    let store = FileStore::open(&config.storage.path)?;
    log::info!("Persisting experiments to {}", store.base_path().display());

    let mut server = StreamServer::new(&config.datastream, store)?;
    let handle = server.handle();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        handle.request_stop();
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    log::info!(
        "Datastream {:?} on {} ({:?}). Press Ctrl-C to stop.",
        config.datastream.kind,
        config.datastream.server_address,
        config.datastream.wire_format
    );
    server.start(true)?;

    log::info!("trackstream stopped");
    Ok(())
}
