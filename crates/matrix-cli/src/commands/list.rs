//! List command implementation

use std::collections::BTreeMap;

use colored::Colorize;
use matrix_core::ContextCache;
use matrix_core::provision::ContextRecord;
use matrix_fs::checksum::short_digest;

use super::Session;
use crate::cli::SelectArgs;
use crate::error::Result;
use crate::output;

/// Print the environments a run would execute, in order, with the
/// fingerprint of any context already provisioned for them.
pub fn run_list(session: &Session, args: &SelectArgs) -> Result<i32> {
    let selection = session.select(args)?;
    let cached = cached_records(session)?;

    if args.json {
        let rows: Vec<_> = selection
            .iter()
            .filter_map(|name| session.registry.get(name))
            .map(|spec| output::EnvRow::new(spec, cached.get(&spec.name)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(0);
    }

    println!("{}", "Selected environments:".bold());
    for name in selection.iter() {
        let Some(spec) = session.registry.get(name) else {
            continue;
        };
        let mut line = format!("  {:<24} {}", name.cyan(), spec.interpreter.dimmed());
        if let Some(description) = &spec.description {
            line.push(' ');
            line.push_str(description);
        }
        if let Some(record) = cached.get(name) {
            let tag = format!("[cached {}]", short_digest(&record.fingerprint, 8));
            line.push(' ');
            line.push_str(&tag.dimmed().to_string());
        }
        println!("{line}");
    }
    Ok(0)
}

/// Context records keyed by environment. Listing never creates the work dir.
fn cached_records(session: &Session) -> Result<BTreeMap<String, ContextRecord>> {
    let work_dir = &session.settings.work_dir;
    if !work_dir.is_dir() {
        return Ok(BTreeMap::new());
    }
    let cache = ContextCache::open(work_dir)?;
    Ok(cache
        .records()
        .into_iter()
        .map(|record| (record.env.clone(), record))
        .collect())
}
