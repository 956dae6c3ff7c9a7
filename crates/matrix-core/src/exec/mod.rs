//! Command execution inside isolated contexts

pub mod command;
pub mod environment;
pub mod executor;

pub use command::Substitutions;
pub use environment::{DEFAULT_PASSENV, build_child_env, find_in_dir, find_on_path};
pub use executor::Executor;
