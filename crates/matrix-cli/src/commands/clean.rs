//! Clean command implementation

use colored::Colorize;
use matrix_core::ContextCache;
use matrix_core::config::expand_env_names;
use matrix_fs::validate_identifier;

use super::Session;
use crate::error::{CliError, Result};

/// Remove cached contexts for the named environments, or all of them.
///
/// Names need not be declared, so contexts of removed environments can still
/// be cleaned up.
pub fn run_clean(session: &Session, env: &[String]) -> Result<i32> {
    let cache = ContextCache::open(&session.settings.work_dir)?;

    if env.is_empty() {
        let removed = cache.clear()?;
        println!(
            "{} Removed {} context(s) from {}",
            "OK".green().bold(),
            removed,
            cache.work_dir()
        );
        return Ok(0);
    }

    let names = expand_env_names(env)?;
    for name in &names {
        validate_identifier(name)
            .map_err(|e| CliError::user(format!("Cannot clean '{name}': {e}")))?;
    }

    for name in names {
        if cache.destroy(&name)? {
            println!("{} Removed context for {}", "OK".green().bold(), name.cyan());
        } else {
            println!("{} No context for {}", "--".dimmed(), name.cyan());
        }
    }
    Ok(0)
}
