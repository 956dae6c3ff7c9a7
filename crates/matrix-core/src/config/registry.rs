//! The normalized environment registry

use matrix_fs::config::Format;
use matrix_fs::{ConfigStore, NormalizedPath, validate_identifier};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::declaration::{Declaration, EnvironmentSection, Section};
use super::settings::SettingsSection;
use crate::error::{Error, ParseError, Result};

/// One command: an executable plus arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Written with a leading `-`: the exit status is not checked
    pub ignore_exit: bool,
}

impl CommandSpec {
    fn from_argv(env: &str, index: usize, argv: Vec<String>) -> std::result::Result<Self, ParseError> {
        let mut parts = argv.into_iter();
        let Some(first) = parts.next() else {
            return Err(ParseError::MalformedCommand {
                env: env.to_string(),
                index,
                reason: "command has no elements".into(),
            });
        };

        let (ignore_exit, program) = match first.strip_prefix('-') {
            Some(rest) if !rest.is_empty() && !rest.starts_with('-') => (true, rest.to_string()),
            _ => (false, first),
        };

        if program.trim().is_empty() || program.trim() == "-" {
            return Err(ParseError::MalformedCommand {
                env: env.to_string(),
                index,
                reason: "empty executable name".into(),
            });
        }

        Ok(Self {
            program,
            args: parts.collect(),
            ignore_exit,
        })
    }

    /// Space-joined form for display.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A named list of inherited requirement lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyLayer {
    pub origin: String,
    pub entries: Vec<String>,
}

/// An environment's dependency declaration before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyDecl {
    /// Shared dependency files, relative to the declaration directory
    pub files: Vec<String>,
    /// Inherited inline deps, lowest precedence first
    pub inherited: Vec<DependencyLayer>,
    /// The environment's own inline deps
    pub inline: Vec<String>,
    /// The environment's explicit pins (package -> version or specifier)
    pub pins: BTreeMap<String, String>,
}

/// A fully merged environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentSpec {
    pub name: String,
    pub description: Option<String>,
    pub interpreter: String,
    pub commands: Vec<CommandSpec>,
    pub setenv: BTreeMap<String, String>,
    pub passenv: Vec<String>,
    pub whitelist_externals: BTreeSet<String>,
    pub changedir: Option<String>,
    pub deps: DependencyDecl,
}

/// All declared environments, keyed by name, plus document-level settings.
#[derive(Debug, Clone)]
pub struct Registry {
    root: NormalizedPath,
    envlist: Vec<String>,
    environments: Vec<EnvironmentSpec>,
    index: HashMap<String, usize>,
    settings: SettingsSection,
    ci_interpreters: BTreeMap<String, Vec<String>>,
}

impl Registry {
    /// Load a declaration file. Relative paths inside it resolve against its
    /// directory.
    pub fn load(path: &NormalizedPath) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::DeclarationNotFound {
                path: path.to_native(),
            });
        }
        let root = path
            .parent()
            .unwrap_or_else(|| NormalizedPath::new("."));
        tracing::debug!(%path, "loading declaration");

        let declaration: Declaration = ConfigStore::new().load(path).map_err(|e| match e {
            matrix_fs::Error::ConfigParse { path, message, .. } => {
                Error::Parse(ParseError::Syntax { path, message })
            }
            other => Error::Fs(other),
        })?;
        Ok(Self::from_declaration(declaration, root)?)
    }

    /// Parse declaration text in the given format.
    pub fn parse(content: &str, format: Format, root: NormalizedPath) -> Result<Self> {
        let source = root.join("<inline>");
        let declaration: Declaration = ConfigStore::new()
            .parse(&source, format, content)
            .map_err(|e| match e {
                matrix_fs::Error::ConfigParse { path, message, .. } => {
                    Error::Parse(ParseError::Syntax { path, message })
                }
                other => Error::Fs(other),
            })?;
        Ok(Self::from_declaration(declaration, root)?)
    }

    /// Normalize a raw declaration.
    pub fn from_declaration(
        declaration: Declaration,
        root: NormalizedPath,
    ) -> std::result::Result<Self, ParseError> {
        let mut environments = Vec::with_capacity(declaration.environments.len());
        let mut index = HashMap::new();

        for section in &declaration.environments {
            validate_identifier(&section.name).map_err(ParseError::InvalidName)?;
            if index.contains_key(&section.name) {
                return Err(ParseError::DuplicateEnvironment {
                    name: section.name.clone(),
                });
            }
            let spec = build_environment(&declaration, section)?;
            index.insert(spec.name.clone(), environments.len());
            environments.push(spec);
        }

        let mut envlist = Vec::new();
        for entry in &declaration.envlist {
            for name in super::selection::expand_braces(entry)? {
                if !envlist.contains(&name) {
                    envlist.push(name);
                }
            }
        }

        tracing::debug!(
            environments = environments.len(),
            envlist = envlist.len(),
            "registry loaded"
        );

        Ok(Self {
            root,
            envlist,
            environments,
            index,
            settings: declaration.settings,
            ci_interpreters: declaration.ci.interpreters,
        })
    }

    /// Directory the declaration lives in
    pub fn root(&self) -> &NormalizedPath {
        &self.root
    }

    /// Expanded default selection, possibly empty
    pub fn envlist(&self) -> &[String] {
        &self.envlist
    }

    pub fn settings(&self) -> &SettingsSection {
        &self.settings
    }

    pub fn ci_interpreters(&self) -> &BTreeMap<String, Vec<String>> {
        &self.ci_interpreters
    }

    pub fn get(&self, name: &str) -> Option<&EnvironmentSpec> {
        self.index.get(name).map(|&i| &self.environments[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Environments in declaration order
    pub fn environments(&self) -> &[EnvironmentSpec] {
        &self.environments
    }

    pub fn len(&self) -> usize {
        self.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

fn build_environment(
    declaration: &Declaration,
    env: &EnvironmentSection,
) -> std::result::Result<EnvironmentSpec, ParseError> {
    let defaults = &declaration.defaults;
    let template = match &env.extends {
        Some(name) => Some(declaration.templates.get(name).ok_or_else(|| {
            ParseError::UnknownTemplate {
                env: env.name.clone(),
                template: name.clone(),
            }
        })?),
        None => None,
    };

    let own = env.section();
    let base = match template {
        Some(template) => defaults.overlay(template),
        None => defaults.overlay(&Section::default()),
    };
    let merged = base.overlay(&own);

    let interpreter = merged
        .interpreter
        .clone()
        .filter(|i| !i.trim().is_empty())
        .ok_or_else(|| ParseError::MissingInterpreter {
            env: env.name.clone(),
        })?;

    let commands = merged
        .commands
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, decl)| CommandSpec::from_argv(&env.name, i + 1, decl.to_argv()))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut inherited = Vec::new();
    if env.inherit_deps {
        if let Some(deps) = &defaults.deps {
            inherited.push(DependencyLayer {
                origin: "[defaults]".into(),
                entries: deps.clone(),
            });
        }
        if let (Some(name), Some(template)) = (&env.extends, template) {
            if let Some(deps) = &template.deps {
                inherited.push(DependencyLayer {
                    origin: format!("[templates.{name}]"),
                    entries: deps.clone(),
                });
            }
        }
    }

    let files = if env.inherit_deps {
        merged.deps_files.unwrap_or_default()
    } else {
        own.deps_files.unwrap_or_default()
    };

    Ok(EnvironmentSpec {
        name: env.name.clone(),
        description: merged.description,
        interpreter,
        commands,
        setenv: merged.setenv.unwrap_or_default(),
        passenv: merged.passenv.unwrap_or_default(),
        whitelist_externals: merged
            .whitelist_externals
            .unwrap_or_default()
            .into_iter()
            .collect(),
        changedir: merged.changedir,
        deps: DependencyDecl {
            files,
            inherited,
            inline: env.deps.clone().unwrap_or_default(),
            pins: env.pins.clone(),
        },
    })
}
