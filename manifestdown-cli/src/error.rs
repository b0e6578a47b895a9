//! CLI error type.

use std::process;

use manifestdown::config::ConfigError;
use manifestdown::download::RunError;
use manifestdown::logging::LoggingError;
use manifestdown::provider::{HttpFailure, ManifestError};
use thiserror::Error;

/// Errors surfaced to the user by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error("failed to set up logging: {0}")]
    Logging(#[from] LoggingError),

    #[error("prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("failed to create HTTP client: {0}")]
    Http(#[from] HttpFailure),

    #[error("failed to retrieve manifest from {location}: {reason}")]
    ManifestFetch { location: String, reason: String },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("failed to set signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("{failed} of {total} files failed")]
    Incomplete { failed: usize, total: usize },

    #[error("download cancelled")]
    Cancelled,
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Incomplete { .. } => 2,
            CliError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Print the error and exit the process.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);
        process::exit(self.exit_code())
    }
}
