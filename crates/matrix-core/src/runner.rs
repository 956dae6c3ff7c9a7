//! The matrix runner
//!
//! Drives each selected environment through
//! `Pending -> Resolving -> Provisioning -> Executing` and collects one
//! [`ExecutionResult`] per environment, in selection order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cancel::CancelSignal;
use crate::config::{MatrixSelection, Registry};
use crate::deps::resolve;
use crate::exec::Executor;
use crate::provision::{ContextBackend, ContextCache, Provisioner};
use crate::result::{ContextSummary, EnvPhase, ExecutionResult, Failure};

/// Lifecycle of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Running = 1,
    Completed = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Completed,
        }
    }
}

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum environments in flight; 1 runs sequentially
    pub parallel: usize,
    /// Rebuild every context
    pub recreate: bool,
    /// Turn an unavailable interpreter into an intentional skip
    pub skip_missing_interpreters: bool,
    /// Extra arguments substituted for `{posargs}`
    pub posargs: Vec<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            parallel: 1,
            recreate: false,
            skip_missing_interpreters: false,
            posargs: Vec::new(),
        }
    }
}

struct Shared {
    registry: Arc<Registry>,
    provisioner: Provisioner,
    executor: Executor,
    skip_missing_interpreters: bool,
}

/// Runs a selection of environments with fault isolation.
pub struct MatrixRunner {
    shared: Arc<Shared>,
    parallel: usize,
    state: AtomicU8,
}

impl MatrixRunner {
    pub fn new(
        registry: Arc<Registry>,
        backend: Arc<dyn ContextBackend>,
        cache: ContextCache,
        options: RunOptions,
    ) -> Self {
        Self::with_executor(
            registry.clone(),
            backend,
            cache,
            Executor::new(registry.root().clone(), options.posargs.clone()),
            options,
        )
    }

    /// Like [`MatrixRunner::new`] with a fixed host environment for commands.
    pub fn with_host_env(
        registry: Arc<Registry>,
        backend: Arc<dyn ContextBackend>,
        cache: ContextCache,
        options: RunOptions,
        host_env: BTreeMap<String, String>,
    ) -> Self {
        let executor =
            Executor::new(registry.root().clone(), options.posargs.clone()).with_host_env(host_env);
        Self::with_executor(registry, backend, cache, executor, options)
    }

    fn with_executor(
        registry: Arc<Registry>,
        backend: Arc<dyn ContextBackend>,
        cache: ContextCache,
        executor: Executor,
        options: RunOptions,
    ) -> Self {
        let provisioner = Provisioner::new(backend, cache).with_recreate(options.recreate);
        Self {
            shared: Arc::new(Shared {
                registry,
                provisioner,
                executor,
                skip_missing_interpreters: options.skip_missing_interpreters,
            }),
            parallel: options.parallel.max(1),
            state: AtomicU8::new(RunState::Idle as u8),
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Run every selected environment and return their results in selection
    /// order. Always completes; failures are reported, never raised.
    pub async fn run(
        &self,
        selection: &MatrixSelection,
        cancel: &CancelSignal,
    ) -> Vec<ExecutionResult> {
        self.state.store(RunState::Running as u8, Ordering::SeqCst);
        tracing::info!(
            environments = selection.len(),
            parallel = self.parallel,
            "matrix run started"
        );

        let results = if self.parallel <= 1 {
            let mut results = Vec::with_capacity(selection.len());
            for name in selection.iter() {
                results.push(run_environment(&self.shared, name, cancel).await);
            }
            results
        } else {
            self.run_parallel(selection, cancel).await
        };

        self.state.store(RunState::Completed as u8, Ordering::SeqCst);
        tracing::info!("matrix run completed");
        results
    }

    async fn run_parallel(
        &self,
        selection: &MatrixSelection,
        cancel: &CancelSignal,
    ) -> Vec<ExecutionResult> {
        let semaphore = Arc::new(Semaphore::new(self.parallel));
        let mut tasks = JoinSet::new();

        for (slot, name) in selection.iter().enumerate() {
            let shared = Arc::clone(&self.shared);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let name = name.to_string();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    () = cancel.cancelled() => None,
                };
                let result = match permit {
                    Some(_permit) => run_environment(&shared, &name, &cancel).await,
                    None => ExecutionResult::cancelled(&name, EnvPhase::Pending),
                };
                (slot, result)
            });
        }

        let mut slots: Vec<Option<ExecutionResult>> =
            (0..selection.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, result)) => slots[slot] = Some(result),
                Err(e) => tracing::error!(error = %e, "environment task failed"),
            }
        }

        slots
            .into_iter()
            .zip(selection.iter())
            .map(|(slot, name)| {
                slot.unwrap_or_else(|| {
                    ExecutionResult::failed(
                        name,
                        EnvPhase::Pending,
                        Failure::Provision {
                            message: "environment task aborted".into(),
                        },
                    )
                })
            })
            .collect()
    }
}

/// Run one environment through every phase. A failing phase ends it.
async fn run_environment(shared: &Shared, name: &str, cancel: &CancelSignal) -> ExecutionResult {
    let started = Instant::now();
    let result = run_phases(shared, name, cancel).await;
    tracing::info!(
        env = name,
        status = ?result.status,
        phase = ?result.phase,
        "environment finished"
    );
    result.with_duration(started.elapsed())
}

async fn run_phases(shared: &Shared, name: &str, cancel: &CancelSignal) -> ExecutionResult {
    if cancel.is_cancelled() {
        return ExecutionResult::cancelled(name, EnvPhase::Pending);
    }
    let Some(spec) = shared.registry.get(name) else {
        return ExecutionResult::failed(
            name,
            EnvPhase::Pending,
            Failure::Resolution {
                message: format!("environment '{name}' is not declared"),
            },
        );
    };

    tracing::info!(env = name, "resolving dependencies");
    let deps = match resolve(spec, &shared.registry) {
        Ok(deps) => deps,
        Err(e) => {
            return ExecutionResult::failed(
                name,
                EnvPhase::Resolving,
                Failure::Resolution {
                    message: e.to_string(),
                },
            );
        }
    };

    if cancel.is_cancelled() {
        return ExecutionResult::cancelled(name, EnvPhase::Resolving);
    }

    tracing::info!(env = name, "provisioning");
    let provisioned = tokio::select! {
        provisioned = shared.provisioner.provision(spec, &deps) => provisioned,
        () = cancel.cancelled() => return ExecutionResult::cancelled(name, EnvPhase::Provisioning),
    };
    let context = match provisioned {
        Ok(context) => context,
        Err(e) if e.is_missing_interpreter() && shared.skip_missing_interpreters => {
            tracing::warn!(env = name, error = %e, "skipping environment");
            return ExecutionResult::skipped(
                name,
                EnvPhase::Provisioning,
                Failure::MissingInterpreter {
                    message: e.to_string(),
                },
            );
        }
        Err(e) => {
            return ExecutionResult::failed(
                name,
                EnvPhase::Provisioning,
                Failure::Provision {
                    message: e.to_string(),
                },
            );
        }
    };

    if cancel.is_cancelled() {
        return ExecutionResult::cancelled(name, EnvPhase::Provisioning)
            .with_context(ContextSummary::from(&context));
    }

    shared.executor.run(spec, &context, cancel).await
}
