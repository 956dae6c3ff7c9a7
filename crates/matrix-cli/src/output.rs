//! Human and JSON rendering of run results

use std::time::Duration;

use colored::{ColoredString, Colorize};
use matrix_core::provision::{ContextRecord, ProvisionAction};
use matrix_core::{EnvironmentSpec, ExecutionResult, Status, Summary};
use matrix_fs::checksum::short_digest;
use serde::Serialize;

/// One environment in `list --json` output.
#[derive(Debug, Serialize)]
pub struct EnvRow<'a> {
    pub name: &'a str,
    pub interpreter: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    pub commands: Vec<String>,
    /// Fingerprint of the provisioned context, if one is cached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<&'a str>,
}

impl<'a> EnvRow<'a> {
    pub fn new(spec: &'a EnvironmentSpec, record: Option<&'a ContextRecord>) -> Self {
        Self {
            name: &spec.name,
            interpreter: &spec.interpreter,
            description: spec.description.as_deref(),
            commands: spec.commands.iter().map(|c| c.display()).collect(),
            cached: record.map(|r| r.fingerprint.as_str()),
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    summary: &'a Summary,
    results: &'a [ExecutionResult],
}

/// Print the full report as a single JSON document.
pub fn print_json(results: &[ExecutionResult], summary: &Summary) -> serde_json::Result<()> {
    let report = JsonReport { summary, results };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Print the per-environment breakdown followed by the verdict.
pub fn print_report(results: &[ExecutionResult], summary: &Summary) {
    for (result, line) in results.iter().zip(&summary.environments) {
        let context = result
            .context
            .as_ref()
            .map(|c| {
                format!(
                    " [{} {} {}]",
                    action_label(c.action),
                    c.interpreter_version,
                    short_digest(&c.fingerprint, 8)
                )
            })
            .unwrap_or_default();
        println!(
            "{:<24} {} {}{}",
            result.env.cyan(),
            status_label(result.status),
            format_duration(result.duration).dimmed(),
            context.dimmed()
        );
        if let Some(detail) = &line.detail {
            println!("    {detail}");
        }
        if let Some(output) = &line.output {
            for text in output.lines() {
                println!("    {} {}", "|".dimmed(), text);
            }
        }
    }

    println!();
    let counts = format!(
        "{} succeeded, {} failed, {} skipped",
        summary.count(Status::Succeeded),
        summary.count(Status::Failed),
        summary.count(Status::Skipped)
    );
    if summary.is_success() {
        println!("{} {}", "OK".green().bold(), counts);
    } else {
        println!("{} {}", "FAILED".red().bold(), counts);
    }
}

fn status_label(status: Status) -> ColoredString {
    match status {
        Status::Succeeded => "succeeded".green(),
        Status::Failed => "failed".red().bold(),
        Status::Skipped => "skipped".yellow(),
    }
}

fn action_label(action: ProvisionAction) -> &'static str {
    match action {
        ProvisionAction::Reused => "reused",
        ProvisionAction::Created => "created",
        ProvisionAction::Rebuilt => "rebuilt",
    }
}

fn format_duration(duration: Duration) -> String {
    format!("({:.2}s)", duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations_render_with_two_decimals() {
        assert_eq!(format_duration(Duration::from_millis(1234)), "(1.23s)");
        assert_eq!(format_duration(Duration::ZERO), "(0.00s)");
    }

    #[test]
    fn test_env_row_includes_cached_fingerprint_only_when_present() {
        let registry = matrix_core::Registry::parse(
            "[[env]]\nname = \"unit\"\ninterpreter = \"3.6\"\ncommands = [[\"pytest\"]]\n",
            matrix_fs::config::Format::Toml,
            matrix_fs::NormalizedPath::new("/project"),
        )
        .unwrap();
        let spec = registry.get("unit").unwrap();
        let record = ContextRecord {
            version: "1".into(),
            env: "unit".into(),
            fingerprint: "sha256:0123456789abcdef".into(),
            backend: "venv".into(),
            interpreter_request: "3.6".into(),
            interpreter_path: "/usr/bin/python3.6".into(),
            interpreter_version: "3.6.15".into(),
            packages: Vec::new(),
            created_at: chrono::Utc::now(),
        };

        let fresh = serde_json::to_value(EnvRow::new(spec, None)).unwrap();
        assert!(fresh.get("cached").is_none());

        let cached = serde_json::to_value(EnvRow::new(spec, Some(&record))).unwrap();
        assert_eq!(cached["cached"], "sha256:0123456789abcdef");
        assert_eq!(cached["commands"][0], "pytest");
    }

    #[test]
    fn test_json_report_flattens_summary() {
        let results = vec![ExecutionResult::cancelled(
            "unit",
            matrix_core::result::EnvPhase::Pending,
        )];
        let summary = matrix_core::summarize(&results);
        let report = JsonReport {
            summary: &summary,
            results: &results,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["exit_code"], summary.exit_code);
        assert_eq!(value["results"][0]["env"], "unit");
        assert!(value["environments"].is_array());
    }
}
