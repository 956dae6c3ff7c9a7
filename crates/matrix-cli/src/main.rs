//! matrix CLI - run a test suite across a matrix of isolated environments
//!
//! Exit codes: 0 when every selected environment succeeded or was
//! intentionally skipped, 1 when a test command failed, 2 on provisioning or
//! infrastructure failure, 3 when the declaration, the selection or the
//! arguments are unusable.

mod cli;
mod commands;
mod error;
mod logging;
mod output;

use clap::Parser;
use colored::Colorize;

use cli::Cli;
use error::Result;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            std::process::exit(e.exit_code());
        }
    }
}

fn run() -> Result<i32> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap already formats usage errors; only the exit code is ours
            let _ = e.print();
            return Ok(error::usage_exit_code(&e));
        }
    };
    logging::init(cli.verbose);
    commands::execute(cli)
}
