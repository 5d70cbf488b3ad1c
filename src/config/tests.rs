//! Config module tests

use std::io::Write;
use std::time::Duration;

use super::*;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("VIBEMAP_TEST_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${VIBEMAP_TEST_SIMPLE}\"").unwrap();
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("VIBEMAP_TEST_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("VIBEMAP_TEST_UNSET");
    let result = substitute_env_vars("value = \"${VIBEMAP_TEST_UNSET:-fallback}\"").unwrap();
    assert_eq!(result, "value = \"fallback\"");

    std::env::set_var("VIBEMAP_TEST_SET", "env_value");
    let result = substitute_env_vars("value = \"${VIBEMAP_TEST_SET:-fallback}\"").unwrap();
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("VIBEMAP_TEST_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("VIBEMAP_TEST_MISSING");
    let result = substitute_env_vars("value = \"${VIBEMAP_TEST_MISSING}\"").unwrap();
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_load_config_with_env_substitution() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::env::set_var("VIBEMAP_TEST_BROKER", "broker.local:1884");
    write!(
        file,
        r#"
[processing]
workers = ${{VIBEMAP_TEST_WORKERS:-4}}

[[connector]]
name = "edge"
address = "${{VIBEMAP_TEST_BROKER}}"
operation_timeout = "2s"
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.processing.workers, 4);
    assert_eq!(config.connector.len(), 1);
    assert_eq!(config.connector[0].address, "broker.local:1884");
    assert_eq!(config.connector[0].operation_timeout, Duration::from_secs(2));
    assert!(config.processing.send_inbound);

    std::env::remove_var("VIBEMAP_TEST_BROKER");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.processing.workers, 8);
    assert_eq!(config.log.level, "info");
    assert!(config.connector.is_empty());
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.processing.workers, 8);
    assert!(config.processing.send_inbound);
    assert!(config.processing.mappings_file.is_none());
}

#[test]
fn test_parse_connectors() {
    let config = Config::parse(
        r#"
[log]
level = "debug"

[processing]
send_inbound = false
mappings_file = "mappings.json"

[[connector]]
name = "edge"
address = "localhost:1883"
username = "bridge"
password = "secret"
keepalive = 30

[[connector]]
name = "cloud"
address = "cloud.example.com"
enabled = false
"#,
    )
    .unwrap();

    assert_eq!(config.log.level, "debug");
    assert!(!config.processing.send_inbound);
    assert_eq!(
        config.processing.mappings_file.as_deref(),
        Some(Path::new("mappings.json"))
    );
    assert_eq!(config.connector[0].keepalive, 30);
    assert_eq!(config.connector[0].username.as_deref(), Some("bridge"));
    assert!(config.connector[0].clean_session);
    assert_eq!(
        config.enabled_connectors().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        vec!["edge"]
    );
}

#[test]
fn test_validate_rejects_zero_workers() {
    let result = Config::parse("[processing]\nworkers = 0\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_validate_rejects_duplicate_connectors() {
    let result = Config::parse(
        r#"
[[connector]]
name = "edge"
address = "a:1883"

[[connector]]
name = "edge"
address = "b:1883"
"#,
    );
    match result {
        Err(ConfigError::Validation(msg)) => assert!(msg.contains("Duplicate")),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_validate_rejects_bad_connector() {
    let empty = Config::parse("[[connector]]\nname = \"a\"\naddress = \" \"\n");
    assert!(matches!(empty, Err(ConfigError::Validation(_))));

    let backoff = Config::parse(
        "[[connector]]\nname = \"a\"\naddress = \"h\"\nreconnect_interval = 30\nmax_reconnect_interval = 10\n",
    );
    assert!(matches!(backoff, Err(ConfigError::Validation(_))));
}

#[test]
fn test_parse_error() {
    assert!(matches!(
        Config::parse("[processing\nworkers = 1"),
        Err(ConfigError::Parse(_))
    ));
}
