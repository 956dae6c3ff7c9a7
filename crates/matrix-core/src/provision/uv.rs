//! Contexts built with uv

use std::process::Stdio;

use async_trait::async_trait;
use matrix_fs::NormalizedPath;
use tokio::process::Command;

use super::backend::{ContextBackend, Interpreter, context_python, output_tail, python_runs, run_tool};
use super::interpreter::{self, InterpreterRequest};
use crate::deps::DependencySet;
use crate::error::ProvisionError;

/// Backend using `uv venv` and `uv pip install`.
///
/// Interpreters are discovered on PATH first; when that fails, uv is asked
/// for one of its managed interpreters.
#[derive(Debug, Default)]
pub struct UvBackend;

impl UvBackend {
    pub fn new() -> Self {
        Self
    }

    async fn check_uv_available(&self) -> bool {
        Command::new("uv")
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// The request to forward to `uv python find`.
    ///
    /// Single-bound requests are forwarded as written; ranges (`>=3.8,<3.12`)
    /// are not.
    fn python_request_arg(request: &str) -> Option<String> {
        let trimmed = request.trim();
        let specifier_count = trimmed
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .count();
        if specifier_count == 1 {
            Some(trimmed.to_string())
        } else {
            None
        }
    }

    async fn find_managed(&self, request: &str) -> Option<Interpreter> {
        let arg = Self::python_request_arg(request)?;
        let output = run_tool(Command::new("uv").args(["python", "find", arg.as_str()]), "uv")
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let (path, version) = interpreter::inspect(&found).await?;
        let parsed = InterpreterRequest::parse(request).ok()?;
        parsed.accepts(&version).then(|| Interpreter {
            request: request.to_string(),
            path,
            version,
        })
    }
}

#[async_trait]
impl ContextBackend for UvBackend {
    fn id(&self) -> &str {
        "uv"
    }

    async fn locate_interpreter(&self, request: &str) -> Result<Interpreter, ProvisionError> {
        match interpreter::discover(request).await {
            Ok(found) => Ok(found),
            Err(ProvisionError::InterpreterUnavailable { requested, mut tried }) => {
                if let Some(found) = self.find_managed(request).await {
                    tracing::debug!(request, path = %found.path.display(), "using uv-managed interpreter");
                    return Ok(found);
                }
                tried.push("uv python find".into());
                Err(ProvisionError::InterpreterUnavailable { requested, tried })
            }
            Err(other) => Err(other),
        }
    }

    async fn create(
        &self,
        interpreter: &Interpreter,
        location: &NormalizedPath,
    ) -> Result<(), ProvisionError> {
        if !self.check_uv_available().await {
            return Err(ProvisionError::ToolNotFound { tool: "uv".into() });
        }

        let output = run_tool(
            Command::new("uv")
                .arg("venv")
                .arg("--python")
                .arg(&interpreter.path)
                .arg(location.to_native()),
            "uv",
        )
        .await?;

        if !output.status.success() {
            return Err(ProvisionError::ContextCreation {
                path: location.to_native(),
                message: output_tail(&output),
            });
        }
        tracing::debug!(location = %location, "uv environment created");
        Ok(())
    }

    async fn install(
        &self,
        location: &NormalizedPath,
        deps: &DependencySet,
    ) -> Result<(), ProvisionError> {
        if deps.is_empty() {
            return Ok(());
        }
        let output = run_tool(
            Command::new("uv")
                .args(["pip", "install", "--python"])
                .arg(context_python(location).to_native())
                .args(deps.lines()),
            "uv",
        )
        .await?;

        if !output.status.success() {
            return Err(ProvisionError::InstallFailed {
                code: output.status.code(),
                output: output_tail(&output),
            });
        }
        tracing::debug!(location = %location, packages = deps.len(), "dependencies installed");
        Ok(())
    }

    async fn verify(&self, location: &NormalizedPath) -> bool {
        python_runs(location).await
    }
}
