//! Per-environment execution results

use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::provision::{IsolatedContext, ProvisionAction};

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Terminal status of one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Succeeded,
    Failed,
    Skipped,
}

/// The furthest stage an environment reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvPhase {
    Pending,
    Resolving,
    Provisioning,
    Executing,
}

/// Why an environment did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// The dependency declaration could not be merged
    Resolution { message: String },
    /// The context could not be built, or an undeclared tool was invoked
    Provision { message: String },
    /// Interpreter unavailable with `skip_missing_interpreters` set
    MissingInterpreter { message: String },
    /// A command exited non-zero; later commands did not run
    Command {
        index: usize,
        command: String,
        exit_code: Option<i32>,
    },
    /// The run was interrupted before this environment finished
    Cancelled,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolution { message } => write!(f, "dependency resolution failed: {message}"),
            Self::Provision { message } => write!(f, "provisioning failed: {message}"),
            Self::MissingInterpreter { message } => write!(f, "skipped: {message}"),
            Self::Command {
                index,
                command,
                exit_code: Some(code),
            } => write!(f, "command #{index} '{command}' exited with code {code}"),
            Self::Command { index, command, .. } => {
                write!(f, "command #{index} '{command}' was terminated by a signal")
            }
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome category used for the aggregate exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Success,
    /// Intentionally skipped (missing interpreter)
    Skipped,
    CommandFailure,
    /// Resolution, provisioning or cancellation
    InfrastructureFailure,
}

/// One executed (or attempted) command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandRecord {
    /// 1-based position in the environment's command list
    pub index: usize,
    pub command: String,
    pub exit_code: Option<i32>,
    /// Exit status was not checked (`-` prefix)
    pub ignored: bool,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

/// Where the environment's context came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextSummary {
    pub location: String,
    pub fingerprint: String,
    pub interpreter_version: String,
    pub action: ProvisionAction,
}

impl From<&IsolatedContext> for ContextSummary {
    fn from(context: &IsolatedContext) -> Self {
        Self {
            location: context.location.to_string(),
            fingerprint: context.fingerprint.clone(),
            interpreter_version: context.interpreter_version.clone(),
            action: context.action,
        }
    }
}

/// The result of running one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub env: String,
    pub status: Status,
    pub phase: EnvPhase,
    pub failure: Option<Failure>,
    pub commands: Vec<CommandRecord>,
    pub context: Option<ContextSummary>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn succeeded(env: &str, context: ContextSummary, commands: Vec<CommandRecord>) -> Self {
        Self {
            env: env.to_string(),
            status: Status::Succeeded,
            phase: EnvPhase::Executing,
            failure: None,
            commands,
            context: Some(context),
            duration: Duration::ZERO,
        }
    }

    pub fn failed(env: &str, phase: EnvPhase, failure: Failure) -> Self {
        Self {
            env: env.to_string(),
            status: Status::Failed,
            phase,
            failure: Some(failure),
            commands: Vec::new(),
            context: None,
            duration: Duration::ZERO,
        }
    }

    pub fn skipped(env: &str, phase: EnvPhase, failure: Failure) -> Self {
        Self {
            status: Status::Skipped,
            ..Self::failed(env, phase, failure)
        }
    }

    pub fn cancelled(env: &str, phase: EnvPhase) -> Self {
        Self::skipped(env, phase, Failure::Cancelled)
    }

    pub fn with_context(mut self, context: ContextSummary) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_commands(mut self, commands: Vec<CommandRecord>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Skipped on purpose, which does not fail the run.
    pub fn is_intentional_skip(&self) -> bool {
        self.status == Status::Skipped
            && matches!(self.failure, Some(Failure::MissingInterpreter { .. }))
    }

    pub fn classification(&self) -> Classification {
        match (&self.status, &self.failure) {
            (Status::Succeeded, _) => Classification::Success,
            _ if self.is_intentional_skip() => Classification::Skipped,
            (_, Some(Failure::Command { .. })) => Classification::CommandFailure,
            _ => Classification::InfrastructureFailure,
        }
    }

    /// Captured output of all commands, for failure reports.
    pub fn combined_output(&self) -> String {
        let mut out = String::new();
        for record in &self.commands {
            out.push_str(&format!("$ {}\n", record.command));
            out.push_str(&record.stdout);
            out.push_str(&record.stderr);
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}
