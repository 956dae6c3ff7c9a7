//! The `ContextBackend` seam between the provisioner and a concrete
//! isolation tool

use std::path::PathBuf;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use matrix_fs::NormalizedPath;
use serde::Serialize;
use tokio::process::Command;

use crate::deps::DependencySet;
use crate::error::ProvisionError;

/// A located, validated interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interpreter {
    /// The declared request it satisfies (`3.6`, `pypy3`, ...)
    pub request: String,
    pub path: PathBuf,
    pub version: semver::Version,
}

/// Creates and populates isolated contexts.
///
/// Implementations must be usable from several environments at once; the
/// provisioner serializes work on a single context.
#[async_trait]
pub trait ContextBackend: Send + Sync {
    /// Short identifier, part of every fingerprint
    fn id(&self) -> &str;

    /// Find an interpreter satisfying `request`.
    async fn locate_interpreter(&self, request: &str) -> Result<Interpreter, ProvisionError>;

    /// Create an empty context at `location` using `interpreter`.
    async fn create(
        &self,
        interpreter: &Interpreter,
        location: &NormalizedPath,
    ) -> Result<(), ProvisionError>;

    /// Install `deps` into the context at `location`.
    async fn install(
        &self,
        location: &NormalizedPath,
        deps: &DependencySet,
    ) -> Result<(), ProvisionError>;

    /// Whether the context at `location` is still usable.
    async fn verify(&self, location: &NormalizedPath) -> bool;

    /// Directory holding the context's executables.
    fn bin_dir(&self, location: &NormalizedPath) -> NormalizedPath {
        bin_dir(location)
    }
}

/// Platform executable directory of a virtual environment.
pub fn bin_dir(location: &NormalizedPath) -> NormalizedPath {
    if cfg!(windows) {
        location.join("Scripts")
    } else {
        location.join("bin")
    }
}

/// The interpreter inside a virtual environment.
pub fn context_python(location: &NormalizedPath) -> NormalizedPath {
    if cfg!(windows) {
        bin_dir(location).join("python.exe")
    } else {
        bin_dir(location).join("python")
    }
}

/// Run a tool to completion, capturing its output.
///
/// A spawn failure means the tool itself is missing.
pub(crate) async fn run_tool(command: &mut Command, tool: &str) -> Result<Output, ProvisionError> {
    tracing::debug!(?command, "running tool");
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|_| ProvisionError::ToolNotFound {
            tool: tool.to_string(),
        })
}

/// Last lines of a tool's combined output, for error messages.
pub(crate) fn output_tail(output: &Output) -> String {
    const MAX_LINES: usize = 20;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let start = lines.len().saturating_sub(MAX_LINES);
    lines[start..].join("\n")
}

/// Check that a context's interpreter still starts.
pub(crate) async fn python_runs(location: &NormalizedPath) -> bool {
    let python = context_python(location);
    if !python.is_file() {
        return false;
    }
    Command::new(python.to_native())
        .args(["-c", "import sys"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}
