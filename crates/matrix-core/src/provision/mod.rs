//! Isolation provisioning
//!
//! Maps an environment and its resolved dependency set to a usable isolated
//! context, reusing the cached one when its fingerprint still matches.

pub mod backend;
pub mod cache;
pub mod fingerprint;
pub mod interpreter;
pub mod uv;
pub mod venv;

use std::sync::Arc;

use chrono::Utc;
use matrix_fs::NormalizedPath;
use serde::Serialize;

pub use backend::{ContextBackend, Interpreter};
pub use cache::{ContextCache, ContextRecord};
pub use fingerprint::fingerprint;
pub use uv::UvBackend;
pub use venv::VenvBackend;

use crate::config::{BackendKind, EnvironmentSpec};
use crate::deps::DependencySet;
use crate::error::ProvisionError;

const RECORD_VERSION: &str = "1";

/// What provisioning did to obtain the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionAction {
    /// Fingerprint matched; nothing was installed
    Reused,
    /// No previous context existed
    Created,
    /// A stale, corrupt or force-recreated context was replaced
    Rebuilt,
}

/// A ready-to-use context bound to one environment's dependency set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IsolatedContext {
    pub env: String,
    pub location: NormalizedPath,
    pub bin_dir: NormalizedPath,
    pub fingerprint: String,
    pub interpreter_version: String,
    pub action: ProvisionAction,
}

/// Build the backend for a configured kind.
pub fn backend_for(kind: BackendKind) -> Arc<dyn ContextBackend> {
    match kind {
        BackendKind::Venv => Arc::new(VenvBackend::new()),
        BackendKind::Uv => Arc::new(UvBackend::new()),
    }
}

/// Provisions contexts through a backend into a cache.
#[derive(Clone)]
pub struct Provisioner {
    backend: Arc<dyn ContextBackend>,
    cache: ContextCache,
    recreate: bool,
}

impl Provisioner {
    pub fn new(backend: Arc<dyn ContextBackend>, cache: ContextCache) -> Self {
        Self {
            backend,
            cache,
            recreate: false,
        }
    }

    /// Rebuild every context regardless of its fingerprint.
    pub fn with_recreate(mut self, recreate: bool) -> Self {
        self.recreate = recreate;
        self
    }

    pub fn cache(&self) -> &ContextCache {
        &self.cache
    }

    /// Obtain a usable context for `env`.
    ///
    /// The environment's build lock is held from the reuse check until the
    /// record is written, so concurrent invocations never build the same
    /// context twice.
    pub async fn provision(
        &self,
        env: &EnvironmentSpec,
        deps: &DependencySet,
    ) -> Result<IsolatedContext, ProvisionError> {
        let name = env.name.as_str();
        let fingerprint = fingerprint(self.backend.id(), &env.interpreter, deps);
        let location = self.cache.context_dir(name);
        let bin_dir = self.backend.bin_dir(&location);

        let _lock = self.cache.lock(name).await?;

        let previous = self.cache.record(name);
        let marked = self.cache.is_marked(name);

        if !self.recreate && !marked {
            if let Some(record) = previous.as_ref().filter(|r| r.fingerprint == fingerprint) {
                if self.backend.verify(&location).await {
                    tracing::info!(env = name, "reusing context");
                    return Ok(IsolatedContext {
                        env: name.to_string(),
                        location,
                        bin_dir,
                        fingerprint,
                        interpreter_version: record.interpreter_version.clone(),
                        action: ProvisionAction::Reused,
                    });
                }
                tracing::warn!(env = name, "cached context failed verification, rebuilding");
            }
        }

        let action = if previous.is_some() || marked || location.exists() {
            ProvisionAction::Rebuilt
        } else {
            ProvisionAction::Created
        };
        if marked {
            tracing::warn!(env = name, "previous build was interrupted, rebuilding");
        }

        let interpreter = self.backend.locate_interpreter(&env.interpreter).await?;

        self.cache.reset(name)?;
        self.cache.mark(name)?;

        tracing::info!(env = name, backend = self.backend.id(), ?action, "creating context");
        self.backend.create(&interpreter, &location).await?;
        tracing::info!(env = name, packages = deps.len(), "installing dependencies");
        self.backend.install(&location, deps).await?;

        let record = ContextRecord {
            version: RECORD_VERSION.to_string(),
            env: name.to_string(),
            fingerprint: fingerprint.clone(),
            backend: self.backend.id().to_string(),
            interpreter_request: env.interpreter.clone(),
            interpreter_path: interpreter.path.to_string_lossy().into_owned(),
            interpreter_version: interpreter.version.to_string(),
            packages: deps.lines(),
            created_at: Utc::now(),
        };
        self.cache.save_record(&record)?;
        self.cache.unmark(name)?;

        Ok(IsolatedContext {
            env: name.to_string(),
            location,
            bin_dir,
            fingerprint,
            interpreter_version: record.interpreter_version,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Registry;
    use crate::deps::resolve;
    use crate::testing::FakeBackend;
    use matrix_fs::config::Format;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn registry(deps: &str) -> Registry {
        Registry::parse(
            &format!(
                "[[env]]\nname = \"unit\"\ninterpreter = \"3.6\"\ncommands = [[\"run-tests\"]]\ndeps = [{deps}]\n"
            ),
            Format::Toml,
            NormalizedPath::new("/project"),
        )
        .unwrap()
    }

    async fn provision(
        provisioner: &Provisioner,
        registry: &Registry,
    ) -> Result<IsolatedContext, ProvisionError> {
        let env = registry.get("unit").unwrap();
        let deps = resolve(env, registry).unwrap();
        provisioner.provision(env, &deps).await
    }

    fn setup(dir: &TempDir) -> (Arc<FakeBackend>, Provisioner) {
        let backend = Arc::new(FakeBackend::new().with_interpreter("3.6"));
        let cache = ContextCache::open(&NormalizedPath::new(dir.path().join("work"))).unwrap();
        let provisioner = Provisioner::new(backend.clone(), cache);
        (backend, provisioner)
    }

    #[tokio::test]
    async fn test_unchanged_fingerprint_reuses_without_installing() {
        let dir = TempDir::new().unwrap();
        let (backend, provisioner) = setup(&dir);
        let registry = registry("\"pytest\"");

        let first = provision(&provisioner, &registry).await.unwrap();
        assert_eq!(first.action, ProvisionAction::Created);
        assert_eq!((backend.creates(), backend.installs()), (1, 1));

        let second = provision(&provisioner, &registry).await.unwrap();
        assert_eq!(second.action, ProvisionAction::Reused);
        assert_eq!(second.fingerprint, first.fingerprint);
        assert_eq!((backend.creates(), backend.installs()), (1, 1));
    }

    #[tokio::test]
    async fn test_changed_dependencies_rebuild() {
        let dir = TempDir::new().unwrap();
        let (backend, provisioner) = setup(&dir);

        let first = provision(&provisioner, &registry("\"mypy==0.460\""))
            .await
            .unwrap();
        let second = provision(&provisioner, &registry("\"mypy==0.470\""))
            .await
            .unwrap();

        assert_ne!(first.fingerprint, second.fingerprint);
        assert_eq!(second.action, ProvisionAction::Rebuilt);
        assert_eq!(backend.creates(), 2);
    }

    #[tokio::test]
    async fn test_recreate_forces_rebuild() {
        let dir = TempDir::new().unwrap();
        let (backend, provisioner) = setup(&dir);
        let registry = registry("");

        provision(&provisioner, &registry).await.unwrap();
        let provisioner = provisioner.with_recreate(true);
        let again = provision(&provisioner, &registry).await.unwrap();

        assert_eq!(again.action, ProvisionAction::Rebuilt);
        assert_eq!(backend.creates(), 2);
    }

    #[tokio::test]
    async fn test_leftover_marker_forces_rebuild() {
        let dir = TempDir::new().unwrap();
        let (backend, provisioner) = setup(&dir);
        let registry = registry("");

        provision(&provisioner, &registry).await.unwrap();
        provisioner.cache().mark("unit").unwrap();

        let again = provision(&provisioner, &registry).await.unwrap();
        assert_eq!(again.action, ProvisionAction::Rebuilt);
        assert!(!provisioner.cache().is_marked("unit"));
        assert_eq!(backend.creates(), 2);
    }

    #[tokio::test]
    async fn test_failed_install_leaves_marker_and_no_record() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(
            FakeBackend::new()
                .with_interpreter("3.6")
                .with_failing_package("broken"),
        );
        let cache = ContextCache::open(&NormalizedPath::new(dir.path().join("work"))).unwrap();
        let provisioner = Provisioner::new(backend, cache);

        let err = provision(&provisioner, &registry("\"broken\"")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::InstallFailed { .. }));
        assert!(provisioner.cache().is_marked("unit"));
        assert!(provisioner.cache().record("unit").is_none());
    }

    #[tokio::test]
    async fn test_unavailable_interpreter_fails() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new());
        let cache = ContextCache::open(&NormalizedPath::new(dir.path().join("work"))).unwrap();
        let provisioner = Provisioner::new(backend.clone(), cache);

        let err = provision(&provisioner, &registry("")).await.unwrap_err();
        assert!(err.is_missing_interpreter());
        assert_eq!(backend.creates(), 0);
    }
}
