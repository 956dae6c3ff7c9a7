//! Requirements-file reading
//!
//! Supports `#` comments, blank lines, `\` continuations and
//! `-r`/`--requirement` includes resolved relative to the including file.
//! Other option lines are skipped.

use std::path::PathBuf;

use matrix_fs::NormalizedPath;

use crate::error::ResolutionError;

/// One requirement line with its `file:line` origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementLine {
    pub text: String,
    pub origin: String,
}

/// Read a requirements file and everything it includes, in file order.
pub fn read_requirements(path: &NormalizedPath) -> Result<Vec<RequirementLine>, ResolutionError> {
    let mut lines = Vec::new();
    let mut stack = Vec::new();
    read_into(path, &mut stack, &mut lines)?;
    Ok(lines)
}

fn read_into(
    path: &NormalizedPath,
    stack: &mut Vec<PathBuf>,
    out: &mut Vec<RequirementLine>,
) -> Result<(), ResolutionError> {
    let native = path.to_native();
    let content = std::fs::read_to_string(&native).map_err(|source| ResolutionError::UnreadableFile {
        path: native.clone(),
        source,
    })?;

    let identity = dunce_identity(&native);
    if stack.contains(&identity) {
        return Err(ResolutionError::IncludeCycle { path: native });
    }
    stack.push(identity);

    let base = path.parent().unwrap_or_else(|| NormalizedPath::new("."));

    for (number, line) in logical_lines(&content) {
        let origin = format!("{path}:{number}");

        if let Some(target) = include_target(&line) {
            if target.is_empty() {
                return Err(ResolutionError::InvalidRequirement {
                    line,
                    origin,
                    reason: "include without a file name".into(),
                });
            }
            tracing::debug!(from = %path, include = target, "following requirements include");
            read_into(&base.resolve(target), stack, out)?;
            continue;
        }

        if line.starts_with('-') {
            tracing::warn!(origin = %origin, line = %line, "ignoring unsupported requirements option");
            continue;
        }

        out.push(RequirementLine { text: line, origin });
    }

    stack.pop();
    Ok(())
}

/// Canonical identity for cycle detection; falls back to the literal path.
fn dunce_identity(path: &std::path::Path) -> PathBuf {
    NormalizedPath::canonicalize(path)
        .map(|p| p.to_native())
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Join continuations and strip comments, yielding `(first line number, text)`.
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut result = Vec::new();
    let mut pending = String::new();
    let mut start = 0;

    for (idx, raw) in content.lines().enumerate() {
        if pending.is_empty() {
            start = idx + 1;
        }
        let line = strip_comment(raw);
        match line.strip_suffix('\\') {
            Some(head) => {
                pending.push_str(head);
                pending.push(' ');
            }
            None => {
                pending.push_str(line);
                let text = pending.trim().to_string();
                if !text.is_empty() {
                    result.push((start, text));
                }
                pending.clear();
            }
        }
    }

    let text = pending.trim().to_string();
    if !text.is_empty() {
        result.push((start, text));
    }
    result
}

/// A `#` starts a comment at line start or after whitespace.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return line[..i].trim_end();
        }
    }
    line.trim_end()
}

fn include_target(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix("--requirement") {
        let rest = rest.strip_prefix('=').unwrap_or(rest);
        return Some(rest.trim());
    }
    line.strip_prefix("-r").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> NormalizedPath {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        NormalizedPath::new(path)
    }

    fn texts(lines: &[RequirementLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn test_comments_blanks_and_continuations() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "requirements.txt",
            "# header\n\npytest>=3  # inline\nsix \\\n  <2\nurl#frag\n",
        );

        let lines = read_requirements(&path).unwrap();
        assert_eq!(texts(&lines), vec!["pytest>=3", "six    <2", "url#frag"]);
        assert!(lines[1].origin.ends_with("requirements.txt:4"));
    }

    #[test]
    fn test_includes_are_relative_to_including_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "reqs/base.txt", "six\n");
        let path = write(
            &dir,
            "reqs/dev.txt",
            "-r base.txt\n--requirement=base.txt\npytest\n",
        );

        let lines = read_requirements(&path).unwrap();
        assert_eq!(texts(&lines), vec!["six", "six", "pytest"]);
    }

    #[test]
    fn test_include_cycle_is_an_error() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.txt", "-r b.txt\n");
        let path = write(&dir, "b.txt", "-r a.txt\n");

        let err = read_requirements(&path).unwrap_err();
        assert!(matches!(err, ResolutionError::IncludeCycle { .. }));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let path = NormalizedPath::new(dir.path().join("nope.txt"));
        let err = read_requirements(&path).unwrap_err();
        assert!(matches!(err, ResolutionError::UnreadableFile { .. }));
    }

    #[test]
    fn test_unsupported_options_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "requirements.txt",
            "--index-url https://pypi.example\n-e .\nrequests\n",
        );
        let lines = read_requirements(&path).unwrap();
        assert_eq!(texts(&lines), vec!["requests"]);
    }
}
