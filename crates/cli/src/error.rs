//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// The destination the run publishes to is not declared
    #[error("Destination `{destination}` is not declared in the configuration")]
    UnknownDestination { destination: String },

    /// Bus could not be brought up
    #[error("Failed to start the bus: {message}")]
    Startup { message: String },

    /// Dispatcher workers failed fatally
    #[error("Dispatcher reported {count} fatal worker error(s): {message}")]
    WorkerFailure { count: usize, message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn unknown_destination(destination: impl Into<String>) -> Self {
        Self::UnknownDestination {
            destination: destination.into(),
        }
    }

    pub fn startup(message: impl Into<String>) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }
}
