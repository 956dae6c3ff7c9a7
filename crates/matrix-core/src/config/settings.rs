//! Orchestrator settings with layered overrides
//!
//! Settings are merged from these sources (later sources override earlier):
//!
//! 1. Built-in defaults
//! 2. The declaration's `[settings]` table
//! 3. Environment variables (`MATRIX_WORK_DIR`, `MATRIX_PARALLEL`, `MATRIX_BACKEND`)
//! 4. Command-line flags

use matrix_fs::NormalizedPath;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

const DEFAULT_WORK_DIR: &str = ".matrix";

pub const ENV_WORK_DIR: &str = "MATRIX_WORK_DIR";
pub const ENV_PARALLEL: &str = "MATRIX_PARALLEL";
pub const ENV_BACKEND: &str = "MATRIX_BACKEND";

/// Which tool creates contexts and installs dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// `python -m venv` + `pip install`
    #[default]
    Venv,
    /// `uv venv` + `uv pip install`
    Uv,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "venv" => Ok(Self::Venv),
            "uv" => Ok(Self::Uv),
            other => Err(format!("unknown backend '{other}', expected 'venv' or 'uv'")),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Venv => "venv",
            Self::Uv => "uv",
        })
    }
}

/// `[settings]` as written in the declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsSection {
    pub work_dir: Option<String>,
    pub backend: Option<BackendKind>,
    pub parallel: Option<usize>,
    pub skip_missing_interpreters: Option<bool>,
}

/// Partial settings from the environment or the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    pub work_dir: Option<String>,
    pub backend: Option<BackendKind>,
    pub parallel: Option<usize>,
    pub skip_missing_interpreters: Option<bool>,
}

impl SettingsOverrides {
    /// Read overrides through a variable lookup function.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ParseError> {
        let parallel = match lookup(ENV_PARALLEL) {
            Some(raw) => Some(parse_parallel(ENV_PARALLEL, &raw)?),
            None => None,
        };
        let backend = match lookup(ENV_BACKEND) {
            Some(raw) => Some(raw.parse().map_err(|reason| ParseError::InvalidSetting {
                key: ENV_BACKEND.into(),
                value: raw.clone(),
                reason,
            })?),
            None => None,
        };
        Ok(Self {
            work_dir: lookup(ENV_WORK_DIR).filter(|v| !v.is_empty()),
            backend,
            parallel,
            skip_missing_interpreters: None,
        })
    }

    /// Read overrides from the process environment.
    pub fn from_process_env() -> Result<Self, ParseError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }
}

fn parse_parallel(key: &str, raw: &str) -> Result<usize, ParseError> {
    match raw.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(ParseError::InvalidSetting {
            key: key.into(),
            value: raw.into(),
            reason: "expected a positive integer".into(),
        }),
        Ok(n) => Ok(n),
    }
}

/// Effective settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Where isolated contexts live
    pub work_dir: NormalizedPath,
    pub backend: BackendKind,
    /// Maximum environments in flight; 1 means sequential
    pub parallel: usize,
    /// Treat a missing interpreter as an intentional skip
    pub skip_missing_interpreters: bool,
}

impl Settings {
    /// Merge all layers. Relative work dirs resolve against `root`.
    pub fn resolve(
        root: &NormalizedPath,
        declared: &SettingsSection,
        layers: &[&SettingsOverrides],
    ) -> Result<Self, ParseError> {
        let mut work_dir = declared
            .work_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_WORK_DIR.to_string());
        let mut backend = declared.backend.unwrap_or_default();
        let mut parallel = declared.parallel.unwrap_or(1);
        let mut skip_missing = declared.skip_missing_interpreters.unwrap_or(false);

        for layer in layers {
            if let Some(dir) = &layer.work_dir {
                work_dir = dir.clone();
            }
            if let Some(kind) = layer.backend {
                backend = kind;
            }
            if let Some(n) = layer.parallel {
                parallel = n;
            }
            if let Some(skip) = layer.skip_missing_interpreters {
                skip_missing = skip;
            }
        }

        if parallel == 0 {
            return Err(ParseError::InvalidSetting {
                key: "parallel".into(),
                value: "0".into(),
                reason: "expected a positive integer".into(),
            });
        }

        tracing::debug!(%work_dir, %backend, parallel, skip_missing, "resolved settings");
        Ok(Self {
            work_dir: root.resolve(&work_dir),
            backend,
            parallel,
            skip_missing_interpreters: skip_missing,
        })
    }
}
