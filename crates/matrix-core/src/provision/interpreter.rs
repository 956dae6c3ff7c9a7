//! Interpreter discovery
//!
//! A declared interpreter is either a version (`3.6`, `py36`, `python3.6`,
//! `>=3.8`), a path, or a bare command name such as `pypy3`. Versions are
//! matched against what the candidate reports, using semver prefix rules.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use semver::{Version, VersionReq};
use tokio::process::Command;

use super::backend::Interpreter;
use crate::error::ProvisionError;

const PROBE_SCRIPT: &str =
    "import sys; print(sys.executable); print('.'.join(map(str, sys.version_info[:3])))";

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// A parsed interpreter declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpreterRequest {
    /// A version requirement. `prefix` holds the literal components for
    /// `3.6`-style requests and is empty for operator ranges.
    Version { req: VersionReq, prefix: Vec<u64> },
    Path(PathBuf),
    Command(String),
}

impl InterpreterRequest {
    pub fn parse(raw: &str) -> Result<Self, ProvisionError> {
        let raw = raw.trim();
        let invalid = |reason: &str| ProvisionError::InvalidInterpreter {
            requested: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("empty interpreter"));
        }
        if raw.contains('/') || raw.contains('\\') {
            return Ok(Self::Path(PathBuf::from(raw)));
        }
        if raw.starts_with(['>', '<', '=', '~', '^']) {
            let req = VersionReq::parse(raw).map_err(|e| invalid(&e.to_string()))?;
            return Ok(Self::Version {
                req,
                prefix: Vec::new(),
            });
        }

        let version_part = raw
            .strip_prefix("python")
            .or_else(|| raw.strip_prefix("py"))
            .unwrap_or(raw);

        if let Some(prefix) = parse_prefix(version_part) {
            let literal: Vec<String> = prefix.iter().map(u64::to_string).collect();
            let req = VersionReq::parse(&format!("={}", literal.join(".")))
                .map_err(|e| invalid(&e.to_string()))?;
            return Ok(Self::Version { req, prefix });
        }

        if raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Ok(Self::Command(raw.to_string()));
        }
        Err(invalid("expected a version, a path or a command name"))
    }

    /// Programs to inspect, most specific first.
    pub fn candidates(&self) -> Vec<String> {
        match self {
            Self::Version { prefix, .. } => {
                let mut names = Vec::new();
                if prefix.len() >= 2 {
                    names.push(format!("python{}.{}", prefix[0], prefix[1]));
                }
                match prefix.first() {
                    Some(major) => names.push(format!("python{major}")),
                    None => names.push("python3".into()),
                }
                names.push("python".into());
                names
            }
            Self::Path(path) => vec![path.to_string_lossy().into_owned()],
            Self::Command(name) => vec![name.clone()],
        }
    }

    /// Whether a reported version satisfies the request.
    pub fn accepts(&self, version: &Version) -> bool {
        match self {
            Self::Version { req, .. } => req.matches(version),
            Self::Path(_) | Self::Command(_) => true,
        }
    }
}

/// `3`, `3.6`, `3.6.1`, or the compact `36`/`310` form.
fn parse_prefix(value: &str) -> Option<Vec<u64>> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    if value.contains('.') {
        let parts: Option<Vec<u64>> = value.split('.').map(|p| p.parse().ok()).collect();
        return parts.filter(|p| (1..=3).contains(&p.len()));
    }
    let (major, minor) = value.split_at(1);
    let major = major.parse().ok()?;
    if minor.is_empty() {
        Some(vec![major])
    } else {
        Some(vec![major, minor.parse().ok()?])
    }
}

/// Run `program` and ask it for its executable path and version.
pub async fn inspect(program: &str) -> Option<(PathBuf, Version)> {
    let mut command = Command::new(program);
    command
        .args(["-c", PROBE_SCRIPT])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = tokio::time::timeout(PROBE_TIMEOUT, command.output())
        .await
        .ok()?
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = stdout.lines();
    let executable = PathBuf::from(lines.next()?.trim());
    let version = Version::parse(lines.next()?.trim()).ok()?;
    Some((executable, version))
}

/// Locate an interpreter for a declared request.
pub async fn discover(request: &str) -> Result<Interpreter, ProvisionError> {
    let parsed = InterpreterRequest::parse(request)?;
    let mut tried = Vec::new();

    for candidate in parsed.candidates() {
        match inspect(&candidate).await {
            Some((path, version)) if parsed.accepts(&version) => {
                tracing::debug!(request, candidate = %candidate, %version, "interpreter found");
                return Ok(Interpreter {
                    request: request.to_string(),
                    path,
                    version,
                });
            }
            Some((_, version)) => {
                tracing::debug!(request, candidate = %candidate, %version, "interpreter version rejected");
            }
            None => tracing::trace!(request, candidate = %candidate, "candidate not runnable"),
        }
        tried.push(candidate);
    }

    Err(ProvisionError::InterpreterUnavailable {
        requested: request.to_string(),
        tried,
    })
}
