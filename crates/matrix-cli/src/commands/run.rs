//! Run command implementation

use std::time::Duration;

use matrix_core::provision::backend_for;
use matrix_core::{CancelSignal, ContextCache, MatrixRunner, RunOptions, summarize};

use super::{Session, list::run_list};
use crate::cli::RunArgs;
use crate::error::Result;
use crate::output;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Provision and run every selected environment, then report.
pub fn run_matrix(session: Session, args: RunArgs) -> Result<i32> {
    if args.list {
        return run_list(&session, &args.select);
    }

    let selection = session.select(&args.select)?;
    let settings = &session.settings;
    tracing::info!(
        environments = selection.len(),
        parallel = settings.parallel,
        "starting run"
    );

    let cache = ContextCache::open(&settings.work_dir)?;
    let options = RunOptions {
        parallel: settings.parallel,
        recreate: args.recreate,
        skip_missing_interpreters: settings.skip_missing_interpreters,
        posargs: args.posargs,
    };
    let runner = MatrixRunner::new(
        session.registry.clone(),
        backend_for(settings.backend),
        cache,
        options,
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let results = runtime.block_on(async {
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling run");
                trigger.cancel();
            }
        });
        runner.run(&selection, &cancel).await
    });
    // Tasks still pending after an interrupt are abandoned, not awaited
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    let summary = summarize(&results);
    if args.select.json {
        output::print_json(&results, &summary)?;
    } else {
        output::print_report(&results, &summary);
    }
    Ok(summary.exit_code)
}
