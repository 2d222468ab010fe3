//! Settings file loading tests
//!
//! Covers what a user of the CLI sees: files on disk, password sources and
//! the errors reported for broken files.

use dyson_mqtt::{ConfigError, Settings, ValidationError};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn write_settings(contents: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{contents}").unwrap();
    temp_file
}

#[test]
fn test_settings_load_from_file() {
    let file = write_settings(
        r#"
[connection]
host = "192.168.1.100"
username = "475"
password = "secret"
topics = ["475/SERIAL/status/current"]
keepalive = 15

[client]
max_queue_size = 10
"#,
    );

    let settings = Settings::load_from_file(file.path()).unwrap();
    let config = settings.connection_config().unwrap();
    let options = settings.client_options().unwrap();

    assert_eq!(config.host(), "192.168.1.100");
    assert_eq!(config.mqtt_username(), "475");
    assert_eq!(config.port(), 1883);
    assert_eq!(config.keepalive(), 15);
    assert_eq!(options.max_queue_size.get(), 10);
}

#[test]
fn test_missing_client_table_uses_default_queue_size() {
    let file = write_settings(
        r#"
[connection]
host = "dyson.local"
username = "475"
password = "secret"
topics = ["475/SERIAL/status/current"]
"#,
    );

    let settings = Settings::load_from_file(file.path()).unwrap();

    assert_eq!(
        settings.client_options().unwrap().max_queue_size.get(),
        dyson_mqtt::DEFAULT_MAX_QUEUE_SIZE
    );
}

#[test]
fn test_password_from_environment() {
    let file = write_settings(
        r#"
[connection]
host = "dyson.local"
username = "475"
password_env = "DYSON_MQTT_TEST_PASSWORD_FROM_ENV"
topics = ["475/SERIAL/status/current"]
"#,
    );
    std::env::set_var("DYSON_MQTT_TEST_PASSWORD_FROM_ENV", "from-env");

    let config = Settings::load_from_file(file.path())
        .unwrap()
        .connection_config()
        .unwrap();

    assert_eq!(config.mqtt_password(), "from-env");
}

#[test]
fn test_missing_password_env_var() {
    let file = write_settings(
        r#"
[connection]
host = "dyson.local"
username = "475"
password_env = "DYSON_MQTT_TEST_PASSWORD_NEVER_SET"
topics = ["475/SERIAL/status/current"]
"#,
    );

    let result = Settings::load_from_file(file.path())
        .unwrap()
        .connection_config();

    match result {
        Err(ConfigError::EnvVarNotFound(name)) => {
            assert_eq!(name, "DYSON_MQTT_TEST_PASSWORD_NEVER_SET")
        }
        other => panic!("expected EnvVarNotFound, got {other:?}"),
    }
}

#[test]
fn test_invalid_values_surface_validation_errors() {
    let file = write_settings(
        r#"
[connection]
host = "dyson.local"
username = "475"
password = "secret"
topics = ["475/SERIAL/status/current"]
port = 70000
"#,
    );

    let result = Settings::load_from_file(file.path())
        .unwrap()
        .connection_config();

    assert!(matches!(
        result,
        Err(ConfigError::Validation(ValidationError::PortOutOfRange(70000)))
    ));
}

#[test]
fn test_zero_queue_size_is_rejected_at_load() {
    let file = write_settings(
        r#"
[connection]
host = "dyson.local"
username = "475"
password = "secret"
topics = ["t"]

[client]
max_queue_size = 0
"#,
    );

    let result = Settings::load_from_file(file.path());

    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_malformed_toml() {
    let file = write_settings("[connection\nhost = ");

    let result = Settings::load_from_file(file.path());

    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_file() {
    let result = Settings::load_from_file(Path::new("/nonexistent/dyson.toml"));

    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_redacted_settings_round_trip_without_secret() {
    let file = write_settings(
        r#"
[connection]
host = "dyson.local"
username = "475"
password = "super-secret"
topics = ["475/SERIAL/status/current"]
"#,
    );
    let settings = Settings::load_from_file(file.path()).unwrap();

    let shown = toml::to_string_pretty(&settings.redacted()).unwrap();
    assert!(!shown.contains("super-secret"));

    let reparsed = Settings::from_toml(&shown).unwrap();
    assert_eq!(reparsed.connection.host, "dyson.local");
    assert_eq!(reparsed.connection.topics, settings.connection.topics);
}
