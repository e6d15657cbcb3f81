//! Malformed configuration must stop startup rather than fall back.

use std::ffi::OsString;
use std::fs;

use ortho_config::OrthoConfig;
use tempfile::TempDir;

use ottoman_config::Config;

#[test]
fn malformed_host_version_is_rejected() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let path = temp_dir.path().join("ottoman.toml");
    fs::write(&path, "host_version = \"one.two\"\n").expect("write config");

    let args = vec![
        OsString::from("ottoman"),
        OsString::from("--config-path"),
        path.into_os_string(),
    ];
    let result = Config::load_from_iter(args);

    assert!(result.is_err(), "expected malformed version to fail loading");
}

#[test]
fn malformed_log_format_is_rejected() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let path = temp_dir.path().join("ottoman.toml");
    fs::write(&path, "log_format = \"xml\"\n").expect("write config");

    let args = vec![
        OsString::from("ottoman"),
        OsString::from("--config-path"),
        path.into_os_string(),
    ];

    assert!(Config::load_from_iter(args).is_err());
}
