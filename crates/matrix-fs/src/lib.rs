//! Filesystem primitives for the matrix orchestrator
//!
//! Provides normalized paths, canonical checksums, locked atomic writes and
//! format-agnostic loading of declaration files.

pub mod checksum;
pub mod config;
pub mod error;
pub mod io;
pub mod lock;
pub mod path;

pub use config::ConfigStore;
pub use error::{Error, Result};
pub use lock::FileLock;
pub use path::{NormalizedPath, validate_identifier};
