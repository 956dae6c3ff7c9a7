//! Declaration parsing, the environment registry and selection
//!
//! A declaration is read once into the raw [`Declaration`] model, then
//! normalized into a [`Registry`] where every environment already carries the
//! fields it inherited from `[defaults]` and its template.
//!
//! # Inheritance
//!
//! Fields merge in this order (later wins, whole-field replacement):
//!
//! 1. `[defaults]`
//! 2. `[templates.<name>]` named by the environment's `extends`
//! 3. the `[[env]]` entry itself
//!
//! `deps` is the exception: inherited dependency lists are kept as separate
//! layers so the resolver can apply its own precedence rules, and they are
//! dropped entirely when an environment sets `inherit_deps = false`.

mod declaration;
mod registry;
mod selection;
mod settings;

pub use declaration::{CiSection, CommandDecl, Declaration, EnvironmentSection, Section};
pub use registry::{CommandSpec, DependencyDecl, DependencyLayer, EnvironmentSpec, Registry};
pub use selection::{MatrixSelection, expand_braces, expand_env_names};
pub use settings::{BackendKind, Settings, SettingsOverrides, SettingsSection};
