//! Runs an environment's commands in its isolated context

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use matrix_fs::NormalizedPath;
use tokio::process::Command;

use super::command::Substitutions;
use super::environment::{build_child_env, find_in_dir, find_on_path};
use crate::cancel::CancelSignal;
use crate::config::EnvironmentSpec;
use crate::error::ProvisionError;
use crate::provision::IsolatedContext;
use crate::result::{CommandRecord, ContextSummary, EnvPhase, ExecutionResult, Failure};

/// Executes command lists. Never returns an error: every outcome is an
/// [`ExecutionResult`].
#[derive(Debug, Clone)]
pub struct Executor {
    root: NormalizedPath,
    posargs: Vec<String>,
    host_env: Arc<BTreeMap<String, String>>,
}

impl Executor {
    /// `root` is the declaration directory, the default working directory.
    pub fn new(root: NormalizedPath, posargs: Vec<String>) -> Self {
        Self {
            root,
            posargs,
            host_env: Arc::new(std::env::vars().collect()),
        }
    }

    /// Replace the host environment snapshot commands inherit from.
    pub fn with_host_env(mut self, host_env: BTreeMap<String, String>) -> Self {
        self.host_env = Arc::new(host_env);
        self
    }

    pub async fn run(
        &self,
        spec: &EnvironmentSpec,
        context: &IsolatedContext,
        cancel: &CancelSignal,
    ) -> ExecutionResult {
        let started = Instant::now();
        let name = spec.name.as_str();
        let summary = ContextSummary::from(context);
        let substitutions = Substitutions {
            posargs: self.posargs.clone(),
            envdir: context.location.to_native().display().to_string(),
            envbindir: context.bin_dir.to_native().display().to_string(),
            rootdir: self.root.to_native().display().to_string(),
            envname: spec.name.clone(),
        };
        let child_env = build_child_env(spec, context, &self.host_env);
        let cwd = match &spec.changedir {
            Some(dir) => self.root.resolve(dir),
            None => self.root.clone(),
        };

        let mut records = Vec::with_capacity(spec.commands.len());
        let finish = |result: ExecutionResult, records: Vec<CommandRecord>| {
            result
                .with_context(summary.clone())
                .with_commands(records)
                .with_duration(started.elapsed())
        };

        for (i, command) in spec.commands.iter().enumerate() {
            let index = i + 1;
            if cancel.is_cancelled() {
                return finish(ExecutionResult::cancelled(name, EnvPhase::Executing), records);
            }

            let (program, args) = substitutions.expand(command);
            let cmdline = std::iter::once(program.as_str())
                .chain(args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ");

            let executable = match self.resolve_program(&program, spec, context, &cwd) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(env = name, command = %cmdline, error = %e, "command refused");
                    let failure = Failure::Provision {
                        message: e.to_string(),
                    };
                    return finish(
                        ExecutionResult::failed(name, EnvPhase::Executing, failure),
                        records,
                    );
                }
            };

            tracing::info!(env = name, index, command = %cmdline, "running command");
            let command_started = Instant::now();
            let child = Command::new(&executable)
                .args(&args)
                .env_clear()
                .envs(&child_env)
                .current_dir(cwd.to_native())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn();
            let child = match child {
                Ok(child) => child,
                Err(e) => {
                    let failure = Failure::Provision {
                        message: format!("cannot start '{cmdline}': {e}"),
                    };
                    return finish(
                        ExecutionResult::failed(name, EnvPhase::Executing, failure),
                        records,
                    );
                }
            };

            let output = tokio::select! {
                output = child.wait_with_output() => output,
                () = cancel.cancelled() => {
                    tracing::info!(env = name, command = %cmdline, "command killed by cancellation");
                    return finish(ExecutionResult::cancelled(name, EnvPhase::Executing), records);
                }
            };
            let output = match output {
                Ok(output) => output,
                Err(e) => {
                    let failure = Failure::Provision {
                        message: format!("lost '{cmdline}': {e}"),
                    };
                    return finish(
                        ExecutionResult::failed(name, EnvPhase::Executing, failure),
                        records,
                    );
                }
            };

            let exit_code = output.status.code();
            let success = output.status.success();
            records.push(CommandRecord {
                index,
                command: cmdline.clone(),
                exit_code,
                ignored: command.ignore_exit,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                duration: command_started.elapsed(),
            });

            if !success {
                if command.ignore_exit {
                    tracing::debug!(env = name, index, ?exit_code, "ignoring exit status");
                    continue;
                }
                tracing::info!(env = name, index, ?exit_code, "command failed");
                let failure = Failure::Command {
                    index,
                    command: cmdline,
                    exit_code,
                };
                return finish(
                    ExecutionResult::failed(name, EnvPhase::Executing, failure),
                    records,
                );
            }
        }

        let result = ExecutionResult::succeeded(name, summary.clone(), Vec::new());
        finish(result, records)
    }

    /// Classify and locate a program.
    ///
    /// Programs inside the context are internal. Anything else must be
    /// whitelisted by name, by path, or with `*`, and is never spawned
    /// otherwise.
    fn resolve_program(
        &self,
        program: &str,
        spec: &EnvironmentSpec,
        context: &IsolatedContext,
        cwd: &NormalizedPath,
    ) -> Result<PathBuf, ProvisionError> {
        let whitelist = &spec.whitelist_externals;
        let whitelisted =
            |candidate: &str| whitelist.contains("*") || whitelist.contains(candidate);

        let is_path = program.contains('/') || (cfg!(windows) && program.contains('\\'));
        if is_path {
            let path = canonical_parent(&cwd.resolve(program));
            let location = NormalizedPath::canonicalize(context.location.to_native())
                .unwrap_or_else(|_| context.location.clone());

            if !location.contains(&path) && !whitelisted(program) && !whitelisted(path.as_str()) {
                return Err(ProvisionError::UnwhitelistedExternal {
                    program: program.to_string(),
                });
            }
            if !path.is_file() {
                return Err(ProvisionError::ExecutableNotFound {
                    program: program.to_string(),
                });
            }
            return Ok(path.to_native());
        }

        if let Some(found) = find_in_dir(&context.bin_dir.to_native(), program) {
            return Ok(found);
        }

        match find_on_path(program, self.host_env.get("PATH").map(String::as_str)) {
            Some(found) if whitelisted(program) || whitelisted(&found.to_string_lossy()) => {
                tracing::debug!(program, path = %found.display(), "using whitelisted external");
                Ok(found)
            }
            Some(_) => Err(ProvisionError::UnwhitelistedExternal {
                program: program.to_string(),
            }),
            None => Err(ProvisionError::ExecutableNotFound {
                program: program.to_string(),
            }),
        }
    }
}

/// Canonicalize the directory part of `path`, keeping the final component.
///
/// Context executables are often symlinks to the host interpreter, so the
/// file itself must not be followed.
fn canonical_parent(path: &NormalizedPath) -> NormalizedPath {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => NormalizedPath::canonicalize(parent.to_native())
            .map(|dir| dir.join(name))
            .unwrap_or_else(|_| path.clone()),
        _ => path.clone(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::CommandSpec;
    use crate::provision::ProvisionAction;
    use crate::result::Status;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: NormalizedPath,
        context: IsolatedContext,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = NormalizedPath::new(dir.path());
        let location = root.join("work/unit/env");
        let bin_dir = location.join("bin");
        std::fs::create_dir_all(bin_dir.to_native()).unwrap();
        Fixture {
            _dir: dir,
            root,
            context: IsolatedContext {
                env: "unit".into(),
                location,
                bin_dir,
                fingerprint: "sha256:00".into(),
                interpreter_version: "3.6.15".into(),
                action: ProvisionAction::Created,
            },
        }
    }

    fn tool(fixture: &Fixture, name: &str, body: &str) {
        let path = fixture.context.bin_dir.join(name).to_native();
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn spec(commands: &[&[&str]], whitelist: &[&str]) -> EnvironmentSpec {
        EnvironmentSpec {
            name: "unit".into(),
            description: None,
            interpreter: "3.6".into(),
            commands: commands
                .iter()
                .map(|argv| {
                    let (ignore_exit, program) = match argv[0].strip_prefix('-') {
                        Some(rest) => (true, rest.to_string()),
                        None => (false, argv[0].to_string()),
                    };
                    CommandSpec {
                        program,
                        args: argv[1..].iter().map(|a| a.to_string()).collect(),
                        ignore_exit,
                    }
                })
                .collect(),
            setenv: BTreeMap::new(),
            passenv: vec![],
            whitelist_externals: whitelist.iter().map(|w| w.to_string()).collect(),
            changedir: None,
            deps: Default::default(),
        }
    }

    fn executor(fixture: &Fixture, posargs: &[&str]) -> Executor {
        Executor::new(
            fixture.root.clone(),
            posargs.iter().map(|a| a.to_string()).collect(),
        )
        .with_host_env(BTreeMap::from([(
            "PATH".to_string(),
            "/usr/bin:/bin".to_string(),
        )]))
    }

    #[tokio::test]
    async fn test_runs_commands_in_order_and_captures_output() {
        let fixture = fixture();
        tool(&fixture, "greet", "echo \"hello $1\"; echo oops >&2");
        let spec = spec(&[&["greet", "{posargs}"], &["greet", "again"]], &[]);

        let result = executor(&fixture, &["world"])
            .run(&spec, &fixture.context, &CancelSignal::new())
            .await;

        assert_eq!(result.status, Status::Succeeded);
        assert_eq!(result.commands.len(), 2);
        assert_eq!(result.commands[0].stdout, "hello world\n");
        assert_eq!(result.commands[0].stderr, "oops\n");
        assert_eq!(result.commands[1].command, "greet again");
    }

    #[tokio::test]
    async fn test_first_failure_stops_the_environment() {
        let fixture = fixture();
        tool(&fixture, "fail", "exit 3");
        tool(&fixture, "never", "exit 0");
        let spec = spec(&[&["fail"], &["never"]], &[]);

        let result = executor(&fixture, &[])
            .run(&spec, &fixture.context, &CancelSignal::new())
            .await;

        assert_eq!(result.status, Status::Failed);
        assert_eq!(result.commands.len(), 1);
        assert_eq!(
            result.failure,
            Some(Failure::Command {
                index: 1,
                command: "fail".into(),
                exit_code: Some(3),
            })
        );
    }

    #[tokio::test]
    async fn test_ignored_exit_status_continues() {
        let fixture = fixture();
        tool(&fixture, "fail", "exit 3");
        tool(&fixture, "ok", "exit 0");
        let spec = spec(&[&["-fail"], &["ok"]], &[]);

        let result = executor(&fixture, &[])
            .run(&spec, &fixture.context, &CancelSignal::new())
            .await;

        assert_eq!(result.status, Status::Succeeded);
        assert!(result.commands[0].ignored);
        assert_eq!(result.commands.len(), 2);
    }

    #[tokio::test]
    async fn test_unwhitelisted_external_is_never_spawned() {
        let fixture = fixture();
        let marker = fixture.root.join("spawned").to_native();
        let script = format!("touch {}", marker.display());
        let spec = spec(&[&["sh", "-c", script.as_str()]], &[]);

        let result = executor(&fixture, &[])
            .run(&spec, &fixture.context, &CancelSignal::new())
            .await;

        assert_eq!(result.status, Status::Failed);
        assert!(matches!(result.failure, Some(Failure::Provision { .. })));
        assert!(result.commands.is_empty());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_symlinked_context_interpreter_is_internal() {
        let fixture = fixture();
        let python = fixture.context.bin_dir.join("python").to_native();
        std::os::unix::fs::symlink("/bin/sh", &python).unwrap();
        let spec = spec(
            &[&["python", "-c", "exit 0"], &["{envbindir}/python", "-c", "exit 0"]],
            &[],
        );

        let result = executor(&fixture, &[])
            .run(&spec, &fixture.context, &CancelSignal::new())
            .await;

        assert_eq!(result.status, Status::Succeeded, "{:?}", result.failure);
        assert_eq!(result.commands.len(), 2);
    }

    #[tokio::test]
    async fn test_path_outside_context_still_needs_whitelist() {
        let fixture = fixture();
        let spec = spec(&[&["/bin/sh", "-c", "exit 0"]], &[]);

        let result = executor(&fixture, &[])
            .run(&spec, &fixture.context, &CancelSignal::new())
            .await;

        assert!(matches!(result.failure, Some(Failure::Provision { .. })));
        assert!(result.commands.is_empty());
    }

    #[tokio::test]
    async fn test_whitelisted_external_runs() {
        let fixture = fixture();
        for whitelist in ["sh", "*"] {
            let spec = spec(&[&["sh", "-c", "exit 0"]], &[whitelist]);
            let result = executor(&fixture, &[])
                .run(&spec, &fixture.context, &CancelSignal::new())
                .await;
            assert_eq!(result.status, Status::Succeeded, "whitelist {whitelist}");
        }
    }

    #[tokio::test]
    async fn test_missing_executable_fails_without_spawning() {
        let fixture = fixture();
        let spec = spec(&[&["no-such-tool-anywhere"]], &["*"]);
        let result = executor(&fixture, &[])
            .run(&spec, &fixture.context, &CancelSignal::new())
            .await;
        assert!(matches!(result.failure, Some(Failure::Provision { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_kills_the_running_command() {
        let fixture = fixture();
        tool(&fixture, "slow", "sleep 30");
        let spec = spec(&[&["slow"]], &[]);
        let cancel = CancelSignal::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = executor(&fixture, &[])
            .run(&spec, &fixture.context, &cancel)
            .await;

        assert_eq!(result.status, Status::Skipped);
        assert_eq!(result.failure, Some(Failure::Cancelled));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
