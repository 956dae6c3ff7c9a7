//! Shared test utilities for the matrix workspace.
//!
//! A dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`project`]: [`project::TestProject`] builder for a throwaway project
//!   directory with a declaration and helper files

pub mod project;
