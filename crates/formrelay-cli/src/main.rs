#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod commands;
mod config;

use std::process;

use crate::config::Cli;

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "formrelay_cli::startup";
pub const TRACING_TARGET_CONFIG: &str = "formrelay_cli::config";
pub const TRACING_TARGET_COMMAND: &str = "formrelay_cli::command";

#[tokio::main]
async fn main() {
    let error = match run().await {
        Ok(true) => process::exit(0),
        Ok(false) => {
            tracing::warn!(
                target: TRACING_TARGET_COMMAND,
                "one or more deliveries failed"
            );
            process::exit(1);
        }
        Err(error) => error,
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_COMMAND,
            error = %format!("{error:#}"),
            "command failed"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(2);
}

/// Main application entry point.
async fn run() -> anyhow::Result<bool> {
    let cli = Cli::init();

    Cli::init_tracing();
    log_startup_info();
    cli.log_config();

    commands::execute(cli).await
}

/// Logs startup information.
fn log_startup_info() {
    tracing::debug!(
        target: TRACING_TARGET_STARTUP,
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        arch = std::env::consts::ARCH,
        os = std::env::consts::OS,
        features = ?enabled_features(),
        "starting formrelay"
    );
}

/// Returns a list of enabled compile-time features.
fn enabled_features() -> Vec<&'static str> {
    [cfg!(feature = "dotenv").then_some("dotenv")]
        .into_iter()
        .flatten()
        .collect()
}
