//! Child process environment and executable lookup

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::EnvironmentSpec;
use crate::provision::IsolatedContext;

/// Host variables passed to every command.
pub const DEFAULT_PASSENV: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "LC_ALL",
    "TMPDIR",
    "TERM",
    "USER",
    "SYSTEMROOT",
    "PATHEXT",
    "COMSPEC",
];

/// Does `name` match a passenv pattern (`NAME` or `PREFIX*`)?
fn passes(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

/// Build the environment a command runs with.
///
/// Starts empty and adds, in increasing precedence: the default pass-through
/// variables and `passenv` from `host`, `VIRTUAL_ENV` with the context's bin
/// directory prepended to `PATH`, and finally `setenv`.
pub fn build_child_env(
    spec: &EnvironmentSpec,
    context: &IsolatedContext,
    host: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = host
        .iter()
        .filter(|(name, _)| {
            DEFAULT_PASSENV.contains(&name.as_str())
                || spec.passenv.iter().any(|pattern| passes(pattern, name))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    env.insert("VIRTUAL_ENV".into(), context.location.to_native().display().to_string());

    let bin = context.bin_dir.to_native();
    let mut paths = vec![bin];
    if let Some(existing) = host.get("PATH") {
        paths.extend(std::env::split_paths(existing));
    }
    match std::env::join_paths(&paths) {
        Ok(joined) => {
            env.insert("PATH".into(), joined.to_string_lossy().into_owned());
        }
        Err(e) => tracing::warn!(env = %spec.name, error = %e, "cannot extend PATH"),
    }

    for (key, value) in &spec.setenv {
        env.insert(key.clone(), value.clone());
    }
    env
}

/// Find an executable named `name` directly inside `dir`.
pub fn find_in_dir(dir: &Path, name: &str) -> Option<PathBuf> {
    let candidate = dir.join(name);
    if is_executable(&candidate) {
        return Some(candidate);
    }
    if cfg!(windows) {
        for ext in ["exe", "bat", "cmd"] {
            let candidate = dir.join(format!("{name}.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Resolve `name` against a `PATH` value.
pub fn find_on_path(name: &str, path: Option<&str>) -> Option<PathBuf> {
    let path = path?;
    std::env::split_paths(path).find_map(|dir| find_in_dir(&dir, name))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
