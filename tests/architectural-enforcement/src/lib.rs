//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce codebase rules:
//! - No sleep() calls in production code (wait on I/O, channels or timers)
//! - No direct printing from the core library (use `tracing`)
//!
//! Test modules (`#[cfg(test)]` blocks) are exempt.

use std::fs;
use std::path::{Path, PathBuf};

/// Workspace root, resolved from this package's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// A rule violation at a source location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Production lines of a source file: comments stripped, everything from
/// the first `#[cfg(test)]` onward dropped
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx + 1, line.split("//").next().unwrap_or(line)))
        .collect()
}

/// Scan every `.rs` file under `dir` (relative to the workspace root) and
/// report production lines for which `forbidden` returns true
pub fn scan_directory<F>(dir: &str, forbidden: F) -> Vec<Violation>
where
    F: Fn(&str) -> bool,
{
    let root = workspace_root().join(dir);
    assert!(root.exists(), "scanned directory missing: {}", root.display());

    let mut violations = Vec::new();
    for entry in walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("rs") {
            continue;
        }
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };
        for (line, code) in production_lines(&content) {
            if forbidden(code) {
                violations.push(Violation {
                    path: path.to_path_buf(),
                    line,
                    text: code.trim().to_string(),
                });
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let src = "fn a() {}\n// note\n#[cfg(test)]\nmod tests { fn b() {} }\n";
        let lines = production_lines(src);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], (1, "fn a() {}"));
        assert_eq!(lines[1], (2, ""));
    }
}
