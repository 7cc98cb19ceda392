use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use mcp_conformance::mcp::transport::stdio::StdioSettings;

/// Path to the `mcp_test_server` binary.
///
/// Cargo sets `CARGO_BIN_EXE_mcp_test_server` for integration tests in the
/// same package.
#[allow(dead_code)]
pub fn test_server_exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mcp_test_server"))
}

/// Short bounds so a misbehaving test fails fast.
#[allow(dead_code)]
pub fn fast_settings() -> StdioSettings {
    StdioSettings {
        request_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_millis(500),
        ..StdioSettings::default()
    }
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
