//! Argument substitution

use crate::config::CommandSpec;

/// Values for the `{...}` placeholders in command arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    /// Extra arguments given after `--` on the command line
    pub posargs: Vec<String>,
    pub envdir: String,
    pub envbindir: String,
    pub rootdir: String,
    pub envname: String,
}

impl Substitutions {
    fn replace(&self, arg: &str) -> String {
        arg.replace("{posargs}", &self.posargs.join(" "))
            .replace("{envdir}", &self.envdir)
            .replace("{envbindir}", &self.envbindir)
            .replace("{rootdir}", &self.rootdir)
            .replace("{envname}", &self.envname)
    }

    /// Expand a command into `(program, args)`.
    ///
    /// An argument that is exactly `{posargs}` becomes one argument per
    /// extra CLI argument, or disappears when there are none.
    pub fn expand(&self, command: &CommandSpec) -> (String, Vec<String>) {
        let program = self.replace(&command.program);
        let mut args = Vec::with_capacity(command.args.len());
        for arg in &command.args {
            if arg == "{posargs}" {
                args.extend(self.posargs.iter().cloned());
            } else {
                args.push(self.replace(arg));
            }
        }
        (program, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn command(program: &str, args: &[&str]) -> CommandSpec {
        CommandSpec {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            ignore_exit: false,
        }
    }

    fn subs(posargs: &[&str]) -> Substitutions {
        Substitutions {
            posargs: posargs.iter().map(|a| a.to_string()).collect(),
            envdir: "/w/unit/env".into(),
            envbindir: "/w/unit/env/bin".into(),
            rootdir: "/project".into(),
            envname: "unit".into(),
        }
    }

    #[test]
    fn test_posargs_expand_to_separate_arguments() {
        let (program, args) = subs(&["-k", "fast"]).expand(&command("pytest", &["{posargs}", "tests"]));
        assert_eq!(program, "pytest");
        assert_eq!(args, vec!["-k", "fast", "tests"]);
    }

    #[test]
    fn test_empty_posargs_disappear() {
        let (_, args) = subs(&[]).expand(&command("pytest", &["{posargs}"]));
        assert!(args.is_empty());
    }

    #[test]
    fn test_embedded_placeholders_are_replaced() {
        let (program, args) = subs(&["a", "b"]).expand(&command(
            "{envbindir}/python",
            &["--root={rootdir}", "{envname}:{envdir}", "x{posargs}"],
        ));
        assert_eq!(program, "/w/unit/env/bin/python");
        assert_eq!(args, vec!["--root=/project", "unit:/w/unit/env", "xa b"]);
    }
}
