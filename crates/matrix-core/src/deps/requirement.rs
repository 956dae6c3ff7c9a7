//! Single requirement lines (`name[extras]<spec>; marker`)

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::ResolutionError;

static REQUIREMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[(?P<extras>[^\]]*)\])?\s*(?P<spec>[^;]*?)\s*(?:;\s*(?P<marker>.*?))?\s*$",
    )
    .expect("requirement pattern is valid")
});

static CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(===|==|!=|<=|>=|~=|<|>)\s*([A-Za-z0-9.*+!_-]+)$").expect("clause pattern is valid")
});

/// Normalize a package name for comparison: lowercase, runs of `_`, `.` and
/// `-` collapsed to a single `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_sep = true;
        } else {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// The version part of a requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// No version constraint
    Any,
    /// A single `==X` pin without wildcards
    Exact(String),
    /// Any other specifier clauses, kept sorted
    Constraints(BTreeSet<String>),
    /// Direct reference (`name @ url`)
    Url(String),
}

impl VersionSpec {
    fn parse(spec: &str) -> Result<Self, String> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(Self::Any);
        }
        if let Some(url) = spec.strip_prefix('@') {
            let url = url.trim();
            if url.is_empty() {
                return Err("empty direct reference".into());
            }
            return Ok(Self::Url(url.to_string()));
        }

        let mut clauses = BTreeSet::new();
        for raw in spec.split(',') {
            let raw = raw.trim();
            let caps = CLAUSE
                .captures(raw)
                .ok_or_else(|| format!("invalid version specifier '{raw}'"))?;
            clauses.insert(format!("{}{}", &caps[1], &caps[2]));
        }

        if clauses.len() == 1 {
            if let Some(only) = clauses.iter().next() {
                if let Some(version) = only.strip_prefix("==") {
                    if !version.starts_with('=') && !version.contains('*') {
                        return Ok(Self::Exact(version.to_string()));
                    }
                }
            }
        }
        Ok(Self::Constraints(clauses))
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_) | Self::Url(_))
    }

    /// Combine two specs for the same package within one layer.
    ///
    /// Exact pins (and direct references) must agree; they win over any
    /// constraint. Constraints accumulate.
    fn combine(self, other: Self) -> Result<Self, (String, String)> {
        match (self, other) {
            (Self::Any, other) | (other, Self::Any) => Ok(other),
            (Self::Exact(a), Self::Exact(b)) if a == b => Ok(Self::Exact(a)),
            (Self::Url(a), Self::Url(b)) if a == b => Ok(Self::Url(a)),
            (a, b) if a.is_exact() && b.is_exact() => Err((a.to_string(), b.to_string())),
            (exact, Self::Constraints(_)) | (Self::Constraints(_), exact) if exact.is_exact() => {
                Ok(exact)
            }
            (Self::Constraints(mut a), Self::Constraints(b)) => {
                a.extend(b);
                Ok(Self::Constraints(a))
            }
            (a, _) => Ok(a),
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => Ok(()),
            Self::Exact(version) => write!(f, "=={version}"),
            Self::Constraints(clauses) => {
                let joined: Vec<&str> = clauses.iter().map(String::as_str).collect();
                write!(f, "{}", joined.join(","))
            }
            Self::Url(url) => write!(f, " @ {url}"),
        }
    }
}

/// A parsed requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Normalized package name
    pub name: String,
    pub extras: BTreeSet<String>,
    pub spec: VersionSpec,
    /// Alternative environment markers; empty means unconditional
    pub markers: BTreeSet<String>,
}

impl Requirement {
    /// Parse one requirement line. `origin` names where it came from for
    /// error messages.
    pub fn parse(line: &str, origin: &str) -> Result<Self, ResolutionError> {
        let invalid = |reason: String| ResolutionError::InvalidRequirement {
            line: line.trim().to_string(),
            origin: origin.to_string(),
            reason,
        };

        let caps = REQUIREMENT
            .captures(line.trim())
            .ok_or_else(|| invalid("expected 'name[extras] <specifier>'".into()))?;

        let name = normalize_name(&caps["name"]);
        let extras = caps
            .name("extras")
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(normalize_name)
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let spec = VersionSpec::parse(caps.name("spec").map_or("", |m| m.as_str())).map_err(invalid)?;
        let markers = caps
            .name("marker")
            .map(|m| m.as_str().trim().to_string())
            .filter(|m| !m.is_empty())
            .into_iter()
            .collect();

        Ok(Self {
            name,
            extras,
            spec,
            markers,
        })
    }

    /// Build a requirement from a `pins` table entry.
    ///
    /// A bare version (`0.470`) is an exact pin; a value starting with an
    /// operator (`<2`, `>=1.0`) is used as written; `*` means unconstrained.
    pub fn from_pin(name: &str, value: &str, origin: &str) -> Result<Self, ResolutionError> {
        let value = value.trim();
        let line = if value.is_empty() || value == "*" {
            name.to_string()
        } else if value.starts_with(['<', '>', '=', '!', '~', '@']) {
            format!("{name}{value}")
        } else {
            format!("{name}=={value}")
        };
        Self::parse(&line, origin)
    }

    /// Merge another requirement for the same package from the same layer.
    pub(crate) fn absorb(&mut self, other: Requirement, origin: &str) -> Result<(), ResolutionError> {
        let spec = std::mem::replace(&mut self.spec, VersionSpec::Any);
        self.spec = spec
            .combine(other.spec)
            .map_err(|(first, second)| ResolutionError::ConflictingPins {
                package: self.name.clone(),
                origin: origin.to_string(),
                first: first.trim_start_matches("==").to_string(),
                second: second.trim_start_matches("==").to_string(),
            })?;
        self.extras.extend(other.extras);

        // An unconditional entry makes the package unconditional
        if self.markers.is_empty() || other.markers.is_empty() {
            self.markers.clear();
        } else {
            self.markers.extend(other.markers);
        }
        Ok(())
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            let extras: Vec<&str> = self.extras.iter().map(String::as_str).collect();
            write!(f, "[{}]", extras.join(","))?;
        }
        write!(f, "{}", self.spec)?;
        match self.markers.len() {
            0 => {}
            1 => {
                let marker = self.markers.iter().next().map_or("", String::as_str);
                write!(f, "; {marker}")?;
            }
            _ => {
                let alternatives: Vec<String> =
                    self.markers.iter().map(|m| format!("({m})")).collect();
                write!(f, "; {}", alternatives.join(" or "))?;
            }
        }
        Ok(())
    }
}

impl Serialize for Requirement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
