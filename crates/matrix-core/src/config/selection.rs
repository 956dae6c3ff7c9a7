//! Matrix selection: which environments run, and in which order

use serde::Serialize;

use super::registry::Registry;
use crate::error::{ParseError, SelectionError};

/// Expand `{a,b}` groups in an envlist entry.
///
/// Multiple groups produce their cartesian product in written order:
/// `py{36,37}-{lint,unit}` yields `py36-lint`, `py36-unit`, `py37-lint`,
/// `py37-unit`.
pub fn expand_braces(entry: &str) -> Result<Vec<String>, ParseError> {
    let invalid = |reason: &str| ParseError::InvalidEnvlist {
        entry: entry.to_string(),
        reason: reason.to_string(),
    };

    let mut results = vec![String::new()];
    let mut rest = entry.trim();

    while !rest.is_empty() {
        match rest.find(['{', '}']) {
            None => {
                for r in &mut results {
                    r.push_str(rest);
                }
                rest = "";
            }
            Some(open) if rest[open..].starts_with('}') => {
                return Err(invalid("unbalanced '}'"));
            }
            Some(open) => {
                let prefix = &rest[..open];
                let after = &rest[open + 1..];
                let close = after.find('}').ok_or_else(|| invalid("unclosed '{'"))?;
                let group = &after[..close];
                if group.contains('{') {
                    return Err(invalid("nested braces are not supported"));
                }
                let alternatives: Vec<&str> = group.split(',').map(str::trim).collect();
                results = results
                    .iter()
                    .flat_map(|r| {
                        alternatives
                            .iter()
                            .map(move |alt| format!("{r}{prefix}{alt}"))
                    })
                    .collect();
                rest = &after[close + 1..];
            }
        }
    }

    let results: Vec<String> = results.into_iter().filter(|r| !r.is_empty()).collect();
    if results.is_empty() {
        return Err(invalid("expands to nothing"));
    }
    Ok(results)
}

/// The ordered, validated subset of environments for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatrixSelection {
    names: Vec<String>,
}

impl MatrixSelection {
    /// Build a selection.
    ///
    /// - `explicit` (from `--env` or `MATRIX_ENV`) wins when present.
    /// - Otherwise the registry's envlist is used, or every declared
    ///   environment when the envlist is empty.
    /// - `ci_interpreter` narrows a non-explicit selection to the environments
    ///   mapped for that interpreter in `[ci.interpreters]`.
    ///
    /// Every name must exist and declare at least one command.
    pub fn build(
        registry: &Registry,
        explicit: Option<&[String]>,
        ci_interpreter: Option<&str>,
    ) -> Result<Self, SelectionError> {
        let explicit = explicit.filter(|names| !names.is_empty());

        let mut names = match explicit {
            Some(entries) => expand_env_names(entries)?,
            None if !registry.envlist().is_empty() => registry.envlist().to_vec(),
            None => registry
                .environments()
                .iter()
                .map(|env| env.name.clone())
                .collect(),
        };

        for name in &names {
            if !registry.contains(name) {
                return Err(SelectionError::UnknownEnvironment { name: name.clone() });
            }
        }

        if explicit.is_none() {
            if let Some(interpreter) = ci_interpreter {
                names = narrow_for_ci(registry, names, interpreter)?;
            }
        }

        if names.is_empty() {
            return Err(SelectionError::Empty);
        }

        for name in &names {
            let has_commands = registry
                .get(name)
                .is_some_and(|env| !env.commands.is_empty());
            if !has_commands {
                return Err(SelectionError::NoCommands { name: name.clone() });
            }
        }

        tracing::debug!(selected = ?names, "matrix selection built");
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Expand `--env` style entries into distinct names, in first-seen order.
///
/// Each entry may hold several comma separated names and brace groups. A
/// malformed entry is reported as an unknown environment.
pub fn expand_env_names(entries: &[String]) -> Result<Vec<String>, SelectionError> {
    let mut names = Vec::new();
    for entry in entries {
        for part in split_top_level_commas(entry) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let expanded = expand_braces(part).map_err(|_| SelectionError::UnknownEnvironment {
                name: part.to_string(),
            })?;
            for name in expanded {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
    }
    Ok(names)
}

/// Split on commas that are not inside a brace group.
fn split_top_level_commas(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn narrow_for_ci(
    registry: &Registry,
    names: Vec<String>,
    interpreter: &str,
) -> Result<Vec<String>, SelectionError> {
    let mapping = registry.ci_interpreters();
    let interpreter = interpreter.trim();

    // "3.6.15" from the CI falls back to the "3.6" key, then "3"
    let mut key = interpreter;
    let mapped = loop {
        if let Some(mapped) = mapping.get(key) {
            break Some(mapped);
        }
        match key.rfind('.') {
            Some(idx) => key = &key[..idx],
            None => break None,
        }
    };

    let Some(mapped) = mapped else {
        tracing::warn!(interpreter, "no CI mapping for interpreter, selection unchanged");
        return Ok(names);
    };

    for name in mapped {
        if !registry.contains(name) {
            return Err(SelectionError::UnknownCiEnvironment {
                interpreter: interpreter.to_string(),
                name: name.clone(),
            });
        }
    }

    let narrowed: Vec<String> = names.into_iter().filter(|n| mapped.contains(n)).collect();
    tracing::debug!(interpreter, key, narrowed = ?narrowed, "selection narrowed for CI");
    Ok(narrowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_fs::NormalizedPath;
    use matrix_fs::config::Format;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn registry() -> Registry {
        Registry::parse(
            r#"
envlist = ["lintA", "unitA"]

[defaults]
interpreter = "3.6"
commands = [["run-tests"]]

[[env]]
name = "lintA"
commands = [["flake8", "ok-args"]]

[[env]]
name = "unitA"

[[env]]
name = "docs"
commands = []

[[env]]
name = "py37-unit"
interpreter = "3.7"

[ci.interpreters]
"3.6" = ["unitA"]
"3.7" = ["py37-unit"]
"2.7" = ["ghost"]
"#,
            Format::Toml,
            NormalizedPath::new("/project"),
        )
        .unwrap()
    }

    #[rstest]
    #[case("lint", vec!["lint"])]
    #[case("py{36,37}-unit", vec!["py36-unit", "py37-unit"])]
    #[case("py{2,3}-{a,b}", vec!["py2-a", "py2-b", "py3-a", "py3-b"])]
    fn test_brace_expansion(#[case] entry: &str, #[case] expected: Vec<&str>) {
        assert_eq!(expand_braces(entry).unwrap(), expected);
    }

    #[rstest]
    #[case("py{36")]
    #[case("py36}")]
    #[case("py{3{6}}")]
    fn test_malformed_braces_fail(#[case] entry: &str) {
        assert!(expand_braces(entry).is_err());
    }

    #[test]
    fn test_default_selection_is_envlist_in_order() {
        let selection = MatrixSelection::build(&registry(), None, None).unwrap();
        assert_eq!(selection.names(), &["lintA".to_string(), "unitA".to_string()]);
    }

    #[test]
    fn test_explicit_selection_restricts_to_named_envs() {
        let explicit = vec!["lintA".to_string()];
        let selection = MatrixSelection::build(&registry(), Some(&explicit), None).unwrap();
        assert_eq!(selection.names(), &["lintA".to_string()]);
    }

    #[test]
    fn test_explicit_selection_accepts_comma_lists() {
        let explicit = vec!["unitA,lintA".to_string(), "unitA".to_string()];
        let selection = MatrixSelection::build(&registry(), Some(&explicit), None).unwrap();
        assert_eq!(selection.names(), &["unitA".to_string(), "lintA".to_string()]);
    }

    #[test]
    fn test_unknown_environment_fails_fast() {
        let explicit = vec!["lintA,nope".to_string()];
        let err = MatrixSelection::build(&registry(), Some(&explicit), None).unwrap_err();
        assert!(matches!(err, SelectionError::UnknownEnvironment { ref name } if name == "nope"));
    }

    #[test]
    fn test_selected_env_without_commands_fails() {
        let explicit = vec!["docs".to_string()];
        let err = MatrixSelection::build(&registry(), Some(&explicit), None).unwrap_err();
        assert!(matches!(err, SelectionError::NoCommands { .. }));
    }

    #[test]
    fn test_ci_interpreter_narrows_envlist() {
        let selection = MatrixSelection::build(&registry(), None, Some("3.6.15")).unwrap();
        assert_eq!(selection.names(), &["unitA".to_string()]);
    }

    #[test]
    fn test_ci_mapping_never_adds_environments() {
        // py37-unit is mapped for 3.7 but is not in the envlist
        let err = MatrixSelection::build(&registry(), None, Some("3.7")).unwrap_err();
        assert!(matches!(err, SelectionError::Empty));
    }

    #[test]
    fn test_ci_mapping_to_unknown_env_fails() {
        let err = MatrixSelection::build(&registry(), None, Some("2.7")).unwrap_err();
        assert!(matches!(err, SelectionError::UnknownCiEnvironment { .. }));
    }

    #[test]
    fn test_unmapped_ci_interpreter_keeps_selection() {
        let selection = MatrixSelection::build(&registry(), None, Some("3.9")).unwrap();
        assert_eq!(selection.len(), 2);
    }

    #[test]
    fn test_explicit_selection_ignores_ci_mapping() {
        let explicit = vec!["lintA".to_string()];
        let selection = MatrixSelection::build(&registry(), Some(&explicit), Some("3.6")).unwrap();
        assert_eq!(selection.names(), &["lintA".to_string()]);
    }
}
