//! Raw declaration model, deserialized straight from the document

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::settings::SettingsSection;

/// The whole declaration document as written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Declaration {
    /// Default selection, in run order. Entries may use brace expansion.
    #[serde(default)]
    pub envlist: Vec<String>,

    /// Orchestrator settings
    #[serde(default)]
    pub settings: SettingsSection,

    /// Base section inherited by every environment
    #[serde(default)]
    pub defaults: Section,

    /// Additional named base sections, selected with `extends`
    #[serde(default)]
    pub templates: BTreeMap<String, Section>,

    /// Environment sections, in declaration order
    #[serde(default, rename = "env")]
    pub environments: Vec<EnvironmentSection>,

    /// Outer-CI integration
    #[serde(default)]
    pub ci: CiSection,
}

/// Inheritable fields shared by `[defaults]` and templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Section {
    pub description: Option<String>,
    pub interpreter: Option<String>,
    pub deps: Option<Vec<String>>,
    pub deps_files: Option<Vec<String>>,
    pub commands: Option<Vec<CommandDecl>>,
    pub setenv: Option<BTreeMap<String, String>>,
    pub passenv: Option<Vec<String>>,
    pub whitelist_externals: Option<Vec<String>>,
    pub changedir: Option<String>,
}

impl Section {
    /// Overlay `other` on top of `self`, replacing whole fields.
    ///
    /// `deps` is not touched here; dependency layers are tracked separately.
    pub fn overlay(&self, other: &Section) -> Section {
        Section {
            description: other.description.clone().or_else(|| self.description.clone()),
            interpreter: other.interpreter.clone().or_else(|| self.interpreter.clone()),
            deps: None,
            deps_files: other.deps_files.clone().or_else(|| self.deps_files.clone()),
            commands: other.commands.clone().or_else(|| self.commands.clone()),
            setenv: other.setenv.clone().or_else(|| self.setenv.clone()),
            passenv: other.passenv.clone().or_else(|| self.passenv.clone()),
            whitelist_externals: other
                .whitelist_externals
                .clone()
                .or_else(|| self.whitelist_externals.clone()),
            changedir: other.changedir.clone().or_else(|| self.changedir.clone()),
        }
    }
}

/// One `[[env]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentSection {
    pub name: String,

    /// Template to layer between `[defaults]` and this entry
    pub extends: Option<String>,

    /// Set to `false` to drop inherited deps and deps_files
    #[serde(default = "default_true")]
    pub inherit_deps: bool,

    /// Explicit version pins, e.g. `mypy = "0.470"`
    #[serde(default)]
    pub pins: BTreeMap<String, String>,

    pub description: Option<String>,
    pub interpreter: Option<String>,
    pub deps: Option<Vec<String>>,
    pub deps_files: Option<Vec<String>>,
    pub commands: Option<Vec<CommandDecl>>,
    pub setenv: Option<BTreeMap<String, String>>,
    pub passenv: Option<Vec<String>>,
    pub whitelist_externals: Option<Vec<String>>,
    pub changedir: Option<String>,
}

fn default_true() -> bool {
    true
}

impl EnvironmentSection {
    /// The inheritable part of this entry.
    pub fn section(&self) -> Section {
        Section {
            description: self.description.clone(),
            interpreter: self.interpreter.clone(),
            deps: self.deps.clone(),
            deps_files: self.deps_files.clone(),
            commands: self.commands.clone(),
            setenv: self.setenv.clone(),
            passenv: self.passenv.clone(),
            whitelist_externals: self.whitelist_externals.clone(),
            changedir: self.changedir.clone(),
        }
    }
}

/// A command as written: either an argv array or a whitespace-split line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandDecl {
    Argv(Vec<String>),
    Line(String),
}

impl CommandDecl {
    pub fn to_argv(&self) -> Vec<String> {
        match self {
            Self::Argv(argv) => argv.clone(),
            Self::Line(line) => line.split_whitespace().map(String::from).collect(),
        }
    }
}

/// `[ci]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CiSection {
    /// Outer-CI interpreter version -> environments to run on it
    #[serde(default)]
    pub interpreters: BTreeMap<String, Vec<String>>,
}
