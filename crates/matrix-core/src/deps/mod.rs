//! Dependency resolution
//!
//! Turns an environment's layered dependency declaration into one canonical
//! [`DependencySet`]. Nothing is fetched or installed here; version solving is
//! left to the installer.

pub mod requirement;
pub mod requirements_file;
pub mod resolver;

pub use requirement::{Requirement, VersionSpec, normalize_name};
pub use requirements_file::{RequirementLine, read_requirements};
pub use resolver::{DependencySet, resolve};
