//! Command implementations for matrix CLI

mod clean;
mod list;
mod run;

use std::sync::Arc;

use matrix_core::config::SettingsOverrides;
use matrix_core::{MatrixSelection, Registry, Settings};
use matrix_fs::NormalizedPath;

use crate::cli::{Cli, Commands, SelectArgs};
use crate::error::Result;

pub use clean::run_clean;
pub use list::run_list;
pub use run::run_matrix;

/// Environment variable naming the CI interpreter version
pub const ENV_CI_INTERPRETER: &str = "MATRIX_CI_INTERPRETER";

/// Dispatch a parsed command line. Returns the process exit code.
pub fn execute(cli: Cli) -> Result<i32> {
    let session = Session::open(&cli)?;
    match cli.command {
        Commands::Run(args) => run_matrix(session, args),
        Commands::List(args) => run_list(&session, &args.select),
        Commands::Clean { env } => run_clean(&session, &env),
    }
}

/// Loaded declaration plus the effective settings for this invocation.
pub struct Session {
    pub registry: Arc<Registry>,
    pub settings: Settings,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self> {
        let path = if cli.config.is_absolute() {
            cli.config.clone()
        } else {
            std::env::current_dir()?.join(&cli.config)
        };
        let registry = Registry::load(&NormalizedPath::new(path))?;

        let env_layer = SettingsOverrides::from_process_env()?;
        let mut cli_layer = SettingsOverrides {
            work_dir: cli.work_dir.clone(),
            ..Default::default()
        };
        if let Commands::Run(args) = &cli.command {
            cli_layer.parallel = args.parallel;
            cli_layer.skip_missing_interpreters = args.skip_missing_interpreters.then_some(true);
        }

        let settings = Settings::resolve(
            registry.root(),
            registry.settings(),
            &[&env_layer, &cli_layer],
        )?;
        tracing::debug!(
            work_dir = %settings.work_dir,
            backend = %settings.backend,
            parallel = settings.parallel,
            "settings resolved"
        );

        Ok(Self {
            registry: Arc::new(registry),
            settings,
        })
    }

    /// Build the selection from `--env`/`MATRIX_ENV` and the CI interpreter.
    pub fn select(&self, args: &SelectArgs) -> Result<MatrixSelection> {
        let explicit = (!args.env.is_empty()).then_some(args.env.as_slice());
        let ci = std::env::var(ENV_CI_INTERPRETER)
            .ok()
            .filter(|v| !v.trim().is_empty());
        Ok(MatrixSelection::build(
            &self.registry,
            explicit,
            ci.as_deref(),
        )?)
    }
}
