use std::io::Write;

use govsync_cli::config::load_config;
use govsync_cli::manifest::Manifest;

#[test]
fn test_load_config_from_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        r#"
[api]
base_url = "https://graph.example.test"
api_version = "beta"
token_env = "GOVSYNC_TEST_TOKEN"

[engine]
settle_delay_ms = 500

[engine.retry]
max_attempts = 3

[engine.poller]
fail_on_timeout = true

[logging]
level = "debug"
"#
    )
    .unwrap();

    let cfg = load_config(Some(file.path())).unwrap();

    assert_eq!(cfg.api.http.base_url, "https://graph.example.test");
    assert_eq!(cfg.api.http.api_version, "beta");
    assert_eq!(cfg.api.http.timeout_ms, 30_000);
    assert_eq!(cfg.api.token_env.as_deref(), Some("GOVSYNC_TEST_TOKEN"));
    assert_eq!(cfg.engine.settle_delay_ms, 500);
    assert_eq!(cfg.engine.retry.max_attempts, 3);
    assert_eq!(cfg.engine.retry.initial_delay_ms, 2_000);
    assert!(cfg.engine.poller.fail_on_timeout);
    assert_eq!(cfg.logging.level, "debug");
}

#[test]
fn test_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(cfg.engine.retry.max_attempts, 6);
    assert_eq!(cfg.logging.level, "info");
}

#[test]
fn test_invalid_values_are_rejected() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(file, "[engine.retry]\nmax_attempts = 0\n").unwrap();

    let err = load_config(Some(file.path())).unwrap_err();
    assert!(err.contains("max_attempts"), "{err}");
}

#[test]
fn test_manifest_from_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        r#"
[[kind]]
name = "assignment"
collection = "assignments"
materialization = {{ mode = "async", request_collection = "assignmentRequests", status_field = "state", failed_states = ["denied"] }}

[[resource]]
handle = "a"
kind = "assignment"
name = "Alice"
"#
    )
    .unwrap();

    let manifest = Manifest::from_path(file.path()).unwrap();
    let kinds = manifest.kinds_by_name();
    let request = kinds["assignment"].async_request().unwrap();
    assert_eq!(request.request_collection, "assignmentRequests");
    assert_eq!(request.request_id_field, "id");
    assert_eq!(manifest.waves().unwrap(), vec![vec![0]]);
}

#[test]
fn test_missing_manifest_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.toml");
    let err = Manifest::from_path(&path).unwrap_err();
    assert!(format!("{err:#}").contains("nope.toml"));
}
