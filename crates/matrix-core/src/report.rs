//! Aggregating results into a verdict and an exit code

use std::time::Duration;

use serde::Serialize;

use crate::result::{Classification, ExecutionResult, Status};

/// Every environment succeeded or was skipped on purpose
pub const EXIT_SUCCESS: i32 = 0;
/// At least one command failed
pub const EXIT_TEST_FAILURE: i32 = 1;
/// Resolution, provisioning or cancellation failure
pub const EXIT_INFRASTRUCTURE: i32 = 2;
/// The declaration or selection is unusable
pub const EXIT_CONFIG: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    Failure,
}

/// One line of the per-environment breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvSummary {
    pub env: String,
    pub status: Status,
    pub classification: Classification,
    /// Failure description, if any
    pub detail: Option<String>,
    /// Captured command output, only for environments that failed
    pub output: Option<String>,
    #[serde(skip)]
    pub duration: Duration,
}

/// Overall outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub verdict: Verdict,
    pub exit_code: i32,
    pub environments: Vec<EnvSummary>,
}

impl Summary {
    pub fn is_success(&self) -> bool {
        self.verdict == Verdict::Success
    }

    pub fn count(&self, status: Status) -> usize {
        self.environments.iter().filter(|e| e.status == status).count()
    }
}

/// Reduce results to a verdict.
///
/// Success iff every environment succeeded or was intentionally skipped.
/// Infrastructure failures outrank command failures in the exit code.
pub fn summarize(results: &[ExecutionResult]) -> Summary {
    let environments: Vec<EnvSummary> = results
        .iter()
        .map(|result| {
            let classification = result.classification();
            let failed = matches!(
                classification,
                Classification::CommandFailure | Classification::InfrastructureFailure
            );
            EnvSummary {
                env: result.env.clone(),
                status: result.status,
                classification,
                detail: result.failure.as_ref().map(ToString::to_string),
                output: (failed && !result.commands.is_empty()).then(|| result.combined_output()),
                duration: result.duration,
            }
        })
        .collect();

    let has = |wanted: Classification| environments.iter().any(|e| e.classification == wanted);
    let exit_code = if has(Classification::InfrastructureFailure) {
        EXIT_INFRASTRUCTURE
    } else if has(Classification::CommandFailure) {
        EXIT_TEST_FAILURE
    } else {
        EXIT_SUCCESS
    };

    Summary {
        verdict: if exit_code == EXIT_SUCCESS {
            Verdict::Success
        } else {
            Verdict::Failure
        },
        exit_code,
        environments,
    }
}
