//! Core orchestration for the matrix test runner
//!
//! # Architecture
//!
//! ```text
//! declaration ──► Registry ──► MatrixSelection
//!                    │               │
//!                    ▼               ▼
//!               deps::resolve ─► Provisioner ─► Executor ─► ExecutionResult
//!                                    │                            │
//!                              ContextCache                  report::summarize
//! ```
//!
//! [`MatrixRunner`] drives every selected environment through these stages,
//! sequentially or with bounded parallelism. Only declaration and selection
//! errors abort a run; everything else is recorded per environment.

pub mod cancel;
pub mod config;
pub mod deps;
pub mod error;
pub mod exec;
pub mod provision;
pub mod report;
pub mod result;
pub mod runner;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use cancel::CancelSignal;
pub use config::{EnvironmentSpec, MatrixSelection, Registry, Settings};
pub use deps::{DependencySet, resolve};
pub use error::{Error, ParseError, ProvisionError, ResolutionError, Result, SelectionError};
pub use provision::{ContextBackend, ContextCache, IsolatedContext, ProvisionAction, Provisioner};
pub use report::{Summary, Verdict, summarize};
pub use result::{ExecutionResult, Failure, Status};
pub use runner::{MatrixRunner, RunOptions, RunState};
