//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No blocking sleeps or blocking HTTP in the relay crates
//! - No `unwrap()`/`expect()` outside test code
//! - The core crate stays free of server and terminal dependencies
//!
//! The helpers here walk the workspace sources; the rules live in `tests/`.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// A rule violation found in a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the violation was found in
    pub file: PathBuf,
    /// One-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.file.display(), self.line, self.text)
    }
}

/// Workspace root, two levels above this package
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Production source directories of the relay crates
pub fn production_source_dirs() -> Vec<PathBuf> {
    let root = workspace_root();
    vec![root.join("relay/core/src"), root.join("relay/daemon/src")]
}

/// All `.rs` files under a directory
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| path.extension().is_some_and(|ext| ext == "rs"))
        .collect()
}

/// Lines of a file that belong to production code
///
/// Everything from the first `#[cfg(test)]` onward is test code, and files
/// named `test_support.rs` are skipped entirely. Comment lines are dropped.
pub fn production_lines(path: &Path) -> Vec<(usize, String)> {
    if path.file_name().is_some_and(|name| name == "test_support.rs") {
        return Vec::new();
    }
    let Ok(source) = fs::read_to_string(path) else {
        return Vec::new();
    };

    source
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .filter(|(_, line)| !line.trim_start().starts_with("//"))
        .map(|(index, line)| (index + 1, line.to_string()))
        .collect()
}

/// Find production lines containing any of the given patterns
pub fn find_in_production(patterns: &[&str]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for dir in production_source_dirs() {
        for file in rust_files(&dir) {
            for (line, text) in production_lines(&file) {
                if patterns.iter().any(|pattern| text.contains(pattern)) {
                    violations.push(Violation {
                        file: file.clone(),
                        line,
                        text: text.trim().to_string(),
                    });
                }
            }
        }
    }
    violations
}

/// Render violations one per line for assertion messages
pub fn report(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
