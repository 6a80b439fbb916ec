//! Global subscriber tests for stowlog-logging
//!
//! A process can install only one global subscriber, so everything that
//! depends on it runs inside a single test.

use std::time::Duration;

use stowlog_logging::{
    DiagnosticsBuilder, FileConfig, LogConfig, LoggingError, RotationStrategy,
};
use tempfile::TempDir;

#[test]
fn test_debug_switch_controls_file_output() {
    let dir = TempDir::new().unwrap();
    let file = FileConfig {
        rotation: RotationStrategy::Never,
        ..FileConfig::new(dir.path())
    };

    let diagnostics = DiagnosticsBuilder::new()
        .with_config(LogConfig::testing())
        .with_console(false)
        .with_file_output(file)
        .with_env_override(false)
        .try_init()
        .unwrap();
    let switch = diagnostics.switch();
    assert_eq!(switch.base_directive(), "warn");

    tracing::info!("hidden before switch");
    tracing::warn!(code = -4010, "warn always visible");

    switch.set_debug(true).unwrap();
    tracing::debug!(bytes = 42, "debug while switched on");

    switch.set_debug(false).unwrap();
    tracing::debug!("hidden after switch");

    // A second global install is refused
    let second = DiagnosticsBuilder::new().try_init();
    assert!(matches!(second, Err(LoggingError::AlreadyInitialized)));

    drop(diagnostics);
    std::thread::sleep(Duration::from_millis(50));

    let contents = std::fs::read_to_string(dir.path().join("stowlog.log")).unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    let messages: Vec<&str> = lines
        .iter()
        .filter_map(|line| line["message"].as_str())
        .collect();
    assert_eq!(messages, vec!["warn always visible", "debug while switched on"]);
    assert_eq!(lines[0]["code"], -4010);
    assert_eq!(lines[1]["bytes"], 42);
}
