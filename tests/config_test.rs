//! Tests for configuration loading

use std::io::Write;
use std::path::Path;

use freightline::config::Config;
use serial_test::serial;

#[test]
fn test_example_config_loads() {
    let config = Config::load(Some(Path::new("config.example.toml")))
        .expect("config.example.toml should load and validate");

    assert_eq!(config.server.bind_address.port(), 3000);
    assert_eq!(config.database.pool_size, 10);
    assert_eq!(config.cache.loads_ttl_secs, 60);
    assert_eq!(config.events.assignment_topic, "load.assigned");
    assert_eq!(config.events.worker_group, "load.assigned.worker");
    assert!(config.audit.database_url.is_none());
    assert_eq!(config.audit.url(&config.database), config.database.url);
}

#[test]
fn test_separate_audit_database() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[database]
url = "postgresql://records/freight"

[audit]
database_url = "postgresql://audit/freight"
"#
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.audit.url(&config.database), "postgresql://audit/freight");
}

#[test]
fn test_invalid_values_fail_load() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[server]
bind_address = "127.0.0.1:0"
"#
    )
    .unwrap();
    assert!(Config::load(Some(file.path())).is_err());

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[cache]\nloads_ttl_secs = 0").unwrap();
    assert!(Config::load(Some(file.path())).is_err());
}

#[test]
fn test_malformed_toml_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[database\nurl = ").unwrap();
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
#[serial]
fn test_env_overrides() {
    std::env::set_var("REDIS_URL", "redis://cache-host:6380");
    std::env::set_var("EVENTS_ASSIGNMENT_TOPIC", "dispatch.assigned");
    std::env::set_var("AUDIT_DATABASE_URL", "postgresql://audit-host/trail");
    std::env::set_var("FREIGHTLINE_LOG_FORMAT", "json");

    let config = Config::load(None).unwrap();
    assert_eq!(config.cache.url, "redis://cache-host:6380");
    assert_eq!(config.events.redis_url, "redis://cache-host:6380");
    assert_eq!(config.events.assignment_topic, "dispatch.assigned");
    assert_eq!(
        config.audit.database_url.as_deref(),
        Some("postgresql://audit-host/trail")
    );
    assert_eq!(config.logging.format, "json");

    for key in [
        "REDIS_URL",
        "EVENTS_ASSIGNMENT_TOPIC",
        "AUDIT_DATABASE_URL",
        "FREIGHTLINE_LOG_FORMAT",
    ] {
        std::env::remove_var(key);
    }
}
