//! Deterministic backend for tests
//!
//! Builds contexts as plain directories, with shell-script stand-ins for
//! installed tools, so the whole pipeline runs without a real Python.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use matrix_fs::NormalizedPath;
use matrix_fs::io::write_atomic;

use crate::deps::DependencySet;
use crate::error::ProvisionError;
use crate::provision::backend::{ContextBackend, Interpreter, bin_dir, context_python};

/// File listing what `install` was asked to install
pub const INSTALLED_FILE: &str = "installed.txt";

/// A backend that records calls instead of running installers.
#[derive(Debug, Default)]
pub struct FakeBackend {
    interpreters: BTreeSet<String>,
    failing_packages: BTreeSet<String>,
    tools: BTreeMap<String, String>,
    creates: AtomicUsize,
    installs: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an interpreter request (e.g. `3.6`) available.
    pub fn with_interpreter(mut self, request: &str) -> Self {
        self.interpreters.insert(request.to_string());
        self
    }

    /// Fail any install that includes `package`.
    pub fn with_failing_package(mut self, package: &str) -> Self {
        self.failing_packages.insert(package.to_string());
        self
    }

    /// Place an executable `name` running the shell `body` in every context.
    pub fn with_tool(mut self, name: &str, body: &str) -> Self {
        self.tools.insert(name.to_string(), body.to_string());
        self
    }

    /// Number of contexts created so far
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of install calls so far
    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    fn write_script(path: &NormalizedPath, body: &str) -> Result<(), ProvisionError> {
        write_atomic(path, format!("#!/bin/sh\n{body}\n").as_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let native = path.to_native();
            std::fs::set_permissions(&native, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| matrix_fs::Error::io(&native, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ContextBackend for FakeBackend {
    fn id(&self) -> &str {
        "fake"
    }

    async fn locate_interpreter(&self, request: &str) -> Result<Interpreter, ProvisionError> {
        let request = request.trim();
        if !self.interpreters.contains(request) {
            return Err(ProvisionError::InterpreterUnavailable {
                requested: request.to_string(),
                tried: vec![format!("python{request}")],
            });
        }

        let mut parts: Vec<u64> = request.split('.').filter_map(|p| p.parse().ok()).collect();
        parts.resize(3, 0);
        Ok(Interpreter {
            request: request.to_string(),
            path: format!("/fake/bin/python{request}").into(),
            version: semver::Version::new(parts[0], parts[1], parts[2]),
        })
    }

    async fn create(
        &self,
        _interpreter: &Interpreter,
        location: &NormalizedPath,
    ) -> Result<(), ProvisionError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let bin = bin_dir(location);
        Self::write_script(&context_python(location), "exit 0")?;
        for (name, body) in &self.tools {
            Self::write_script(&bin.join(name), body)?;
        }
        Ok(())
    }

    async fn install(
        &self,
        location: &NormalizedPath,
        deps: &DependencySet,
    ) -> Result<(), ProvisionError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        if let Some(bad) = deps.iter().find(|r| self.failing_packages.contains(&r.name)) {
            return Err(ProvisionError::InstallFailed {
                code: Some(1),
                output: format!("No matching distribution found for {}", bad.name),
            });
        }
        let listing = deps.lines().join("\n");
        write_atomic(&location.join(INSTALLED_FILE), listing.as_bytes())?;
        Ok(())
    }

    async fn verify(&self, location: &NormalizedPath) -> bool {
        context_python(location).is_file()
    }
}
