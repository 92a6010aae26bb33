//! Integration Test: Blocking I/O Prohibition
//!
//! Production code in the relay crates MUST NOT block the async runtime or
//! panic on recoverable errors. Test code and `test_support.rs` are exempt.

use std::fs;

use architectural_enforcement::{
    find_in_production, production_lines, production_source_dirs, report, rust_files,
    workspace_root,
};

#[test]
fn test_sources_are_found() {
    for dir in production_source_dirs() {
        assert!(
            !rust_files(&dir).is_empty(),
            "no sources under {}",
            dir.display()
        );
    }
}

#[test]
fn no_blocking_sleep() {
    let violations = find_in_production(&["std::thread::sleep", "thread::sleep("]);
    assert!(
        violations.is_empty(),
        "blocking sleep in production code:\n{}",
        report(&violations)
    );
}

#[test]
fn no_blocking_http() {
    let violations = find_in_production(&["reqwest::blocking", "std::net::TcpStream"]);
    assert!(
        violations.is_empty(),
        "blocking I/O in production code:\n{}",
        report(&violations)
    );
}

#[test]
fn no_blocking_filesystem_in_core() {
    let core = workspace_root().join("relay/core/src");
    let mut offenders = Vec::new();
    // Configuration is read once at startup, before the runtime serves turns
    for file in rust_files(&core)
        .into_iter()
        .filter(|file| !file.components().any(|part| part.as_os_str() == "config"))
    {
        for (line, text) in production_lines(&file) {
            if text.contains("std::fs::") || text.contains("use std::fs") {
                offenders.push(format!("{}:{line}: {}", file.display(), text.trim()));
            }
        }
    }
    assert!(
        offenders.is_empty(),
        "core must use tokio::fs:\n{}",
        offenders.join("\n")
    );
}

#[test]
fn no_unwrap_or_expect_in_production() {
    let violations = find_in_production(&[".unwrap()", ".expect("]);
    assert!(
        violations.is_empty(),
        "unwrap/expect in production code:\n{}",
        report(&violations)
    );
}

#[test]
fn core_has_no_server_dependencies() {
    let manifest = fs::read_to_string(workspace_root().join("relay/core/Cargo.toml")).unwrap();
    for forbidden in ["axum", "clap", "tracing-subscriber"] {
        assert!(
            !manifest
                .lines()
                .any(|line| line.trim_start().starts_with(forbidden)),
            "relay-core must not depend on {forbidden}"
        );
    }
}
