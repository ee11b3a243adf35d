//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── transport: TransportConfig  # Per-attempt timeout, user agent, backoff
//! ├── manager: ManagerConfig      # Overall per-integration send timeout
//! └── command: Command            # providers | dispatch | test
//! ```
//!
//! All configuration can be provided via CLI arguments or environment variables.

mod input;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use formrelay_dispatch::ManagerConfig;
use formrelay_webhook::TransportConfig;
pub use input::{load_event, load_integrations};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

use crate::TRACING_TARGET_CONFIG;

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "formrelay")]
#[command(about = "Deliver form events to their connected integrations")]
#[command(version)]
pub struct Cli {
    /// HTTP delivery transport configuration.
    #[clap(flatten)]
    pub transport: TransportConfig,

    /// Integration manager configuration.
    #[clap(flatten)]
    pub manager: ManagerConfig,

    /// Operation to run.
    #[clap(subcommand)]
    pub command: Command,
}

/// Operator commands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the built-in provider descriptors as JSON
    Providers,

    /// Dispatch one event to every matching integration
    Dispatch {
        /// JSON file with an array of integration configs
        #[arg(long, env = "FORMRELAY_INTEGRATIONS")]
        integrations: PathBuf,

        /// JSON file with the event payload
        #[arg(long)]
        event: PathBuf,
    },

    /// Run the connectivity check of one integration
    Test {
        /// JSON file with an array of integration configs
        #[arg(long, env = "FORMRELAY_INTEGRATIONS")]
        integrations: PathBuf,

        /// Id of the integration to check
        #[arg(long)]
        id: Uuid,
    },
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    /// Loads environment variables from .env file if the dotenv feature is enabled.
    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    /// No-op when dotenv feature is disabled.
    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Initializes tracing with environment-based filtering.
    ///
    /// Logs go to stderr so command output on stdout stays valid JSON.
    pub fn init_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    /// Logs the effective configuration.
    pub fn log_config(&self) {
        tracing::debug!(
            target: TRACING_TARGET_CONFIG,
            attempt_timeout_secs = self.transport.attempt_timeout().as_secs(),
            user_agent = %self.transport.effective_user_agent(),
            initial_backoff_ms = self.transport.initial_backoff_ms,
            max_backoff_ms = self.transport.max_backoff_ms,
            send_timeout_secs = self.manager.send_timeout().as_secs(),
            "configuration"
        );
    }
}
