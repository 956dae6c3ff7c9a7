//! Error types for matrix-cli

use clap::error::ErrorKind;
use matrix_core::report::{EXIT_CONFIG, EXIT_INFRASTRUCTURE, EXIT_SUCCESS};

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Errors that end the invocation before a report is printed
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Error from matrix-core
    #[error(transparent)]
    Core(#[from] matrix_core::Error),

    #[error(transparent)]
    Parse(#[from] matrix_core::ParseError),

    #[error(transparent)]
    Selection(#[from] matrix_core::SelectionError),

    #[error(transparent)]
    Provision(#[from] matrix_core::ProvisionError),

    /// Error from matrix-fs
    #[error(transparent)]
    Fs(#[from] matrix_fs::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// User-facing error with a message
    #[error("{message}")]
    User { message: String },
}

impl CliError {
    /// Create a new user error with the given message
    pub fn user(message: impl Into<String>) -> Self {
        Self::User {
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    ///
    /// Anything wrong with the declaration, the selection or the arguments is
    /// a configuration error; the rest is infrastructure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Core(
                matrix_core::Error::Parse(_)
                | matrix_core::Error::Selection(_)
                | matrix_core::Error::DeclarationNotFound { .. },
            )
            | Self::Parse(_)
            | Self::Selection(_)
            | Self::User { .. } => EXIT_CONFIG,
            _ => EXIT_INFRASTRUCTURE,
        }
    }
}

/// Exit code for an argument parsing outcome.
///
/// `--help` and `--version` succeed; every other usage error is a
/// configuration error.
pub fn usage_exit_code(error: &clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_SUCCESS,
        _ => EXIT_CONFIG,
    }
}
