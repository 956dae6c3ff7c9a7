//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// matrix - run a test suite across isolated interpreter/dependency environments
#[derive(Parser, Debug)]
#[command(name = "matrix")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Declaration file
    #[arg(
        short = 'c',
        long = "config",
        global = true,
        env = "MATRIX_CONFIG",
        default_value = "matrix.toml"
    )]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding isolated contexts (overrides MATRIX_WORK_DIR and [settings])
    #[arg(long, global = true)]
    pub work_dir: Option<String>,

    /// The command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the selected environments
    ///
    /// Examples:
    ///   matrix run                       # the envlist, or every environment
    ///   matrix run -e lint,py36-unit     # only these
    ///   matrix run -p 4 -- -k fast       # 4 at a time, extra args for {posargs}
    Run(RunArgs),

    /// List the selected environments (same as `run --list`)
    List(ListArgs),

    /// Delete cached contexts so they are rebuilt on the next run
    Clean {
        /// Environments to clean (comma separated); all when omitted
        #[arg(short, long)]
        env: Vec<String>,
    },
}

/// Selection flags shared by `run` and `list`
#[derive(Args, Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectArgs {
    /// Environments to select (comma separated, brace expansion allowed)
    #[arg(short, long, env = "MATRIX_ENV")]
    pub env: Vec<String>,

    /// Output as JSON for scripting
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ListArgs {
    #[command(flatten)]
    pub select: SelectArgs,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct RunArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Maximum environments run concurrently
    #[arg(short, long)]
    pub parallel: Option<usize>,

    /// Print the selection and exit without running
    #[arg(long)]
    pub list: bool,

    /// Rebuild every selected context
    #[arg(long)]
    pub recreate: bool,

    /// Skip environments whose interpreter is not installed
    #[arg(long)]
    pub skip_missing_interpreters: bool,

    /// Extra arguments substituted for {posargs}
    #[arg(last = true)]
    pub posargs: Vec<String>,
}
