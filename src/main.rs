// src/main.rs

//! The main entry point for the region server.

use anyhow::Result;
use regiond::config::Config;
use regiond::server;
use std::env;
use tracing::error;

fn print_usage() {
    eprintln!("Usage: regiond start [--bind host:port] [--config /path/to/regiond.toml]");
    eprintln!("       regiond --version");
    eprintln!();
    eprintln!("Stop a running server with a signal or your daemon script; there is no stop verb.");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Define version information.
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    // Collect command-line arguments to decide the execution mode.
    let args: Vec<String> = env::args().collect();

    // Handle the --version flag.
    if args.contains(&"--version".to_string()) {
        println!("regiond version {VERSION}");
        return Ok(());
    }

    match args.get(1).map(|s| s.as_str()) {
        Some("start") => {}
        Some("stop") => {
            // Operators stop via signal; the verb only explains itself.
            print_usage();
            std::process::exit(0);
        }
        _ => {
            print_usage();
            std::process::exit(0);
        }
    }

    // Determine the configuration path. It can be provided via a --config
    // flag; without one, a missing default file falls back to built-in
    // defaults (the master's startup answer may still override them).
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let mut config = match config_path {
        Some(path) => match Config::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load configuration from \"{path}\": {e}");
                std::process::exit(-1);
            }
        },
        None => match Config::from_file("regiond.toml") {
            Ok(cfg) => cfg,
            Err(_) => Config::default(),
        },
    };

    // Override the bind address if provided as a command-line argument.
    if let Some(bind_index) = args.iter().position(|arg| arg == "--bind") {
        if let Some(bind) = args.get(bind_index + 1) {
            match bind.parse() {
                Ok(address) => config.address = address,
                Err(_) => {
                    eprintln!("Invalid bind address: {bind}");
                    std::process::exit(-1);
                }
            }
        } else {
            eprintln!("--bind flag requires a value");
            std::process::exit(-1);
        }
    }

    // Setup logging with the compact format; RUST_LOG wins over the
    // configured level.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .with_ansi(true)
        .init();

    if let Err(e) = server::run(config).await {
        error!("Region server runtime error: {}", e);
        std::process::exit(-1);
    }

    Ok(())
}
