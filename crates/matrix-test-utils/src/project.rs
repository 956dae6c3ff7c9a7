//! [`TestProject`] builder for orchestrator test scenarios.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// File name used by [`TestProject::write_declaration`]
pub const DECLARATION: &str = "matrix.toml";

/// A temporary project directory.
///
/// # Example
///
/// ```rust,no_run
/// use matrix_test_utils::project::TestProject;
///
/// let project = TestProject::new();
/// project.write_declaration(r#"
/// [[env]]
/// name = "unit"
/// interpreter = "3.6"
/// commands = [["pytest"]]
/// "#);
/// project.assert_file_exists("matrix.toml");
/// ```
pub struct TestProject {
    temp_dir: TempDir,
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

impl TestProject {
    /// Create an empty temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    /// Root path of the project.
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Absolute path of `relative` inside the project.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }

    /// Write `matrix.toml` and return its path.
    pub fn write_declaration(&self, content: &str) -> PathBuf {
        self.write_file(DECLARATION, content)
    }

    /// Write a file, creating parent directories, and return its path.
    ///
    /// # Panics
    /// Panics if the filesystem operations fail.
    pub fn write_file(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .unwrap_or_else(|e| panic!("write_file: cannot create {}: {e}", parent.display()));
        }
        fs::write(&path, content)
            .unwrap_or_else(|e| panic!("write_file: cannot write {}: {e}", path.display()));
        path
    }

    /// Write an executable shell script running `body`.
    ///
    /// # Panics
    /// Panics if the filesystem operations fail.
    #[cfg(unix)]
    pub fn write_script(&self, relative: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.write_file(relative, &format!("#!/bin/sh\n{body}\n"));
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .unwrap_or_else(|e| panic!("write_script: cannot chmod {}: {e}", path.display()));
        path
    }

    /// Assert that `relative` exists.
    ///
    /// # Panics
    /// Panics with a descriptive message if the path does not exist.
    pub fn assert_file_exists(&self, relative: &str) {
        let full_path = self.path(relative);
        assert!(
            full_path.exists(),
            "Expected file to exist: {}",
            full_path.display()
        );
    }

    /// Assert that `relative` does **not** exist.
    ///
    /// # Panics
    /// Panics with a descriptive message if the path exists.
    pub fn assert_file_not_exists(&self, relative: &str) {
        let full_path = self.path(relative);
        assert!(
            !full_path.exists(),
            "Expected file NOT to exist: {}",
            full_path.display()
        );
    }

    /// Read a file inside the project.
    ///
    /// # Panics
    /// Panics if the file cannot be read.
    pub fn read(&self, relative: &str) -> String {
        let full_path = self.path(relative);
        fs::read_to_string(&full_path)
            .unwrap_or_else(|_| panic!("Could not read file: {}", full_path.display()))
    }
}
