//! Contexts built with Python's own `venv` module and `pip`

use async_trait::async_trait;
use matrix_fs::NormalizedPath;
use tokio::process::Command;

use super::backend::{ContextBackend, Interpreter, context_python, output_tail, python_runs, run_tool};
use super::interpreter;
use crate::deps::DependencySet;
use crate::error::ProvisionError;

/// Backend using `python -m venv` and `python -m pip install`.
#[derive(Debug, Default)]
pub struct VenvBackend;

impl VenvBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContextBackend for VenvBackend {
    fn id(&self) -> &str {
        "venv"
    }

    async fn locate_interpreter(&self, request: &str) -> Result<Interpreter, ProvisionError> {
        interpreter::discover(request).await
    }

    async fn create(
        &self,
        interpreter: &Interpreter,
        location: &NormalizedPath,
    ) -> Result<(), ProvisionError> {
        let tool = interpreter.path.to_string_lossy().into_owned();
        let output = run_tool(
            Command::new(&interpreter.path)
                .args(["-m", "venv"])
                .arg(location.to_native()),
            &tool,
        )
        .await?;

        if !output.status.success() {
            return Err(ProvisionError::ContextCreation {
                path: location.to_native(),
                message: output_tail(&output),
            });
        }
        tracing::debug!(location = %location, "virtual environment created");
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
        let python = context_python(location);
        let output = run_tool(
            Command::new(python.to_native())
                .args(["-m", "pip", "install", "--disable-pip-version-check"])
                .args(deps.lines()),
            "pip",
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
