use challenge_sync::cli::{ClientConfig, ConfigDiscovery, ConfigError};
use challenge_sync::env;
use std::fs;
use tempfile::{NamedTempFile, TempDir};

#[test]
fn test_config_file_operations() {
    let mut original_config = ClientConfig::default();
    original_config.username = Some("alice".to_string());
    original_config.log_filter = Some("challenge_sync=debug".to_string());
    original_config.sync.end_timeout_ms = 1_500;

    let temp_file = NamedTempFile::new().expect("Should be able to create temporary file");
    let temp_path = temp_file.path();

    original_config
        .to_toml_file(temp_path)
        .expect("Should be able to save config to file");

    let content = fs::read_to_string(temp_path).expect("Should be able to read config file");
    assert!(content.contains("[sync]"), "Sync settings should be a table");
    assert!(content.contains("end_timeout_ms = 1500"));

    let loaded_config =
        ClientConfig::from_toml_file(temp_path).expect("Should be able to load config from file");
    assert_eq!(original_config, loaded_config);
    assert_eq!(loaded_config.log_filter(), "challenge_sync=debug");
}

#[test]
fn test_handwritten_config_parsing() {
    let toml_content = r#"
server_url = "wss://records.example.com/ws"
username = "Zezima"

[sync]
start_timeout_ms = 2000
start_retries = 4
"#;

    let temp_file = NamedTempFile::new().expect("Should be able to create temporary file");
    fs::write(temp_file.path(), toml_content).expect("Should be able to write config");

    let config =
        ClientConfig::from_toml_file(temp_file.path()).expect("Should parse handwritten config");
    assert_eq!(config.server_url, "wss://records.example.com/ws");
    assert_eq!(config.username.as_deref(), Some("Zezima"));
    assert_eq!(config.sync.start_timeout_ms, 2000);
    assert_eq!(config.sync.start_retries, 4);
    assert_eq!(config.sync.end_timeout_ms, env::defaults::END_TIMEOUT_MS);
    assert_eq!(
        config.sync.history_refresh_delay_ms,
        env::defaults::HISTORY_REFRESH_DELAY_MS
    );
}

#[test]
fn test_invalid_config_reports_path() {
    let temp_dir = TempDir::new().expect("Should be able to create temporary dir");
    let path = temp_dir.path().join("broken.toml");
    fs::write(&path, "[sync\nstart_retries = 1\n").expect("Should be able to write config");

    match ClientConfig::from_toml_file(&path) {
        Err(ConfigError::Parse { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("Expected a parse error, got {:?}", other),
    }

    fs::write(&path, "server_url = \"https://example.com\"\n")
        .expect("Should be able to write config");
    assert!(matches!(
        ClientConfig::from_toml_file(&path),
        Err(ConfigError::Invalid(_))
    ));

    assert!(matches!(
        ClientConfig::from_toml_file(temp_dir.path().join("missing.toml")),
        Err(ConfigError::Io { .. })
    ));
}

#[test]
fn test_init_config_writes_loadable_defaults() {
    let temp_dir = TempDir::new().expect("Should be able to create temporary dir");
    let path = env::local_config_file_path(temp_dir.path());

    assert!(
        ConfigDiscovery::write_default_config(&path).expect("Should write default config"),
        "First write should create the file"
    );
    assert!(path.exists());

    let loaded = ClientConfig::from_toml_file(&path).expect("Defaults should load");
    assert_eq!(loaded, ClientConfig::default());
}
