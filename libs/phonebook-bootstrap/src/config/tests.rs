use super::*;
use std::fs;
use tempfile::tempdir;

fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("phonebook.yaml");
    fs::write(&path, body).expect("Failed to write config file");
    path
}

#[test]
fn test_default_config() {
    let config = AppConfig::default();

    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 7120);
    assert!(config.server.home_dir.is_empty());
    assert_eq!(config.server.worker_threads, None);
    assert_eq!(config.server.listen_address(), "127.0.0.1:7120");

    let logging = config.logging.as_ref().unwrap();
    let default = &logging["default"];
    assert_eq!(default.console_level, "info");
    assert_eq!(default.file, "logs/phonebook.log");

    assert!(config.providers.is_empty());
}

#[test]
fn test_yaml_serialization() {
    let yaml = AppConfig::default().to_yaml().expect("Failed to serialize to YAML");
    assert!(yaml.contains("server:"));
    assert!(yaml.contains("logging:"));
    assert!(yaml.contains("providers:"));
    assert!(!yaml.contains("worker_threads"));
}

#[test]
fn test_layered_loading_with_providers() {
    let temp_dir = tempdir().unwrap();
    let home = temp_dir.path().join("home");
    let body = format!(
        r#"
server:
  home_dir: "{}"
  host: "0.0.0.0"
  port: 9100
  worker_threads: 2

providers:
  - provider_id: 42
    config:
      phonebook:
        type: dummy
  - provider_id: 43
"#,
        home.display()
    );
    let path = write_config(temp_dir.path(), &body);

    let config = AppConfig::load_layered(&path).expect("Failed to load config");

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9100);
    assert_eq!(config.server.worker_threads, Some(2));
    assert_eq!(config.server.home_path(), home);
    assert!(home.is_dir(), "home_dir should be created on load");
    assert!(config.logging.is_none());

    assert_eq!(config.providers.len(), 2);
    assert_eq!(config.providers[0].provider_id, 42);
    assert_eq!(
        config.providers[0].config_json(),
        r#"{"phonebook":{"type":"dummy"}}"#
    );
    assert_eq!(config.providers[1].config_json(), "{}");
    config.validate().unwrap();
}

#[test]
fn test_missing_config_file_is_an_error() {
    let temp_dir = tempdir().unwrap();
    let err = AppConfig::load_layered(temp_dir.path().join("absent.yaml")).unwrap_err();
    assert!(err.to_string().contains("does not exist"), "{err}");
}

#[test]
fn test_unknown_fields_are_rejected() {
    let temp_dir = tempdir().unwrap();
    let body = format!(
        "server:\n  home_dir: \"{}\"\n  host: \"127.0.0.1\"\n  port: 7120\n  colour: blue\n",
        temp_dir.path().display()
    );
    let path = write_config(temp_dir.path(), &body);
    assert!(AppConfig::load_layered(&path).is_err());
}

#[test]
fn test_relative_home_dir_is_rejected() {
    let temp_dir = tempdir().unwrap();
    let path = write_config(
        temp_dir.path(),
        "server:\n  home_dir: \"relative/home\"\n  host: \"127.0.0.1\"\n  port: 7120\n",
    );
    let err = AppConfig::load_layered(&path).unwrap_err();
    assert!(format!("{err:#}").contains("absolute"), "{err:#}");
}

#[test]
fn test_cli_overrides() {
    let mut config = AppConfig::default();
    config.logging = None;

    let args = CliArgs {
        port: Some(7300),
        verbose: 1,
        ..CliArgs::default()
    };
    config.apply_cli_overrides(&args);
    assert_eq!(config.server.port, 7300);
    assert_eq!(config.logging.as_ref().unwrap()["default"].console_level, "debug");

    config.apply_cli_overrides(&CliArgs {
        verbose: 3,
        ..CliArgs::default()
    });
    assert_eq!(config.server.port, 7300);
    assert_eq!(config.logging.as_ref().unwrap()["default"].console_level, "trace");
}

#[test]
fn test_validation_rejects_duplicate_provider_ids() {
    let mut config = AppConfig::default();
    config.providers = vec![
        ProviderEntry {
            provider_id: 1,
            config: serde_json::Value::Null,
        },
        ProviderEntry {
            provider_id: 1,
            config: serde_json::json!({}),
        },
    ];
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("more than once"), "{err}");
}

#[test]
fn test_validation_rejects_bad_server_settings() {
    let mut config = AppConfig::default();
    config.server.host = "  ".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.server.worker_threads = Some(0);
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.providers = vec![ProviderEntry {
        provider_id: 3,
        config: serde_json::json!([1, 2]),
    }];
    assert!(config.validate().is_err());
}
