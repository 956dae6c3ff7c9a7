//! Error types for matrix-core
//!
//! Only [`ParseError`] and [`SelectionError`] abort a run. Resolution and
//! provisioning errors are per-environment and end up inside that
//! environment's `ExecutionResult`.

use std::path::PathBuf;

/// Result type for matrix-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort an invocation before any environment runs
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Declaration file not found at the expected path
    #[error("Declaration not found at {path}")]
    DeclarationNotFound { path: PathBuf },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Fs(#[from] matrix_fs::Error),
}

/// Malformed declaration. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Failed to parse declaration {path}: {message}")]
    Syntax { path: PathBuf, message: String },

    #[error("Environment '{name}' is declared more than once")]
    DuplicateEnvironment { name: String },

    #[error("Environment '{env}' extends unknown template '{template}'")]
    UnknownTemplate { env: String, template: String },

    #[error("Environment '{env}' command #{index} is malformed: {reason}")]
    MalformedCommand {
        env: String,
        index: usize,
        reason: String,
    },

    #[error("Environment '{env}' has no interpreter (set it in the environment or in [defaults])")]
    MissingInterpreter { env: String },

    #[error("Invalid environment name: {0}")]
    InvalidName(#[source] matrix_fs::Error),

    #[error("Invalid envlist entry '{entry}': {reason}")]
    InvalidEnvlist { entry: String, reason: String },

    #[error("Invalid setting {key} = '{value}': {reason}")]
    InvalidSetting {
        key: String,
        value: String,
        reason: String,
    },
}

/// A selection referring to environments that cannot run. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("Unknown environment '{name}' (use --list to see declared environments)")]
    UnknownEnvironment { name: String },

    #[error("CI mapping for interpreter {interpreter} names unknown environment '{name}'")]
    UnknownCiEnvironment { interpreter: String, name: String },

    #[error("Environment '{name}' is selected but declares no commands")]
    NoCommands { name: String },

    #[error("No environments selected")]
    Empty,
}

/// Dependency merge failure for one environment.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("Conflicting exact pins for '{package}' in {origin}: =={first} vs =={second}")]
    ConflictingPins {
        package: String,
        origin: String,
        first: String,
        second: String,
    },

    #[error("Cannot read dependency file {path}: {source}")]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid requirement '{line}' in {origin}: {reason}")]
    InvalidRequirement {
        line: String,
        origin: String,
        reason: String,
    },

    #[error("Dependency file include cycle at {path}")]
    IncludeCycle { path: PathBuf },
}

/// Failure to obtain a usable isolated context, or to run an undeclared tool.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Interpreter '{requested}' not available (tried: {})", tried.join(", "))]
    InterpreterUnavailable {
        requested: String,
        tried: Vec<String>,
    },

    #[error("Invalid interpreter request '{requested}': {reason}")]
    InvalidInterpreter { requested: String, reason: String },

    #[error("Failed to create context at {path}: {message}")]
    ContextCreation { path: PathBuf, message: String },

    #[error("Dependency installation failed (exit code {code:?}): {output}")]
    InstallFailed { code: Option<i32>, output: String },

    #[error("Required tool '{tool}' not found on PATH")]
    ToolNotFound { tool: String },

    #[error("'{program}' is not installed in the environment and not listed in whitelist_externals")]
    UnwhitelistedExternal { program: String },

    #[error("Executable '{program}' not found")]
    ExecutableNotFound { program: String },

    #[error(transparent)]
    Fs(#[from] matrix_fs::Error),
}

impl ProvisionError {
    /// Whether this error means the requested interpreter is missing.
    pub fn is_missing_interpreter(&self) -> bool {
        matches!(self, Self::InterpreterUnavailable { .. })
    }
}
