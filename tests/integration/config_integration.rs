//! Integration tests for Configuration System

use super::test_utils::with_xdg_env;
use tempfile::TempDir;
use unitary::cli::{ledger_registry, Balances, OpenAccount};
use unitary::config::{ConfigLoader, UnitaryConfig};
use unitary::repository::InMemoryAggregateStore;
use unitary::MessageProcessor;

#[test]
fn test_global_config_is_picked_up() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    let global = test_dir.path().join("unitary").join("config.toml");
    std::fs::create_dir_all(global.parent().unwrap()).unwrap();
    std::fs::write(&global, "[flush]\nmax_background_flushes = 3\n").unwrap();

    let config = with_xdg_env(&test_dir, || ConfigLoader::load(workspace.path()).unwrap());
    assert_eq!(config.flush.max_background_flushes, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn test_loaded_config_drives_processor() {
    let test_dir = TempDir::new().unwrap();
    let config_file = test_dir.path().join("unitary.toml");
    std::fs::write(
        &config_file,
        r#"
[flush]
parallel = false

[pipeline]
transactional = false
trace_messages = false

[logging]
level = "warn"
format = "json"
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert!(config.validate().is_ok());
    assert_ne!(config, UnitaryConfig::default());

    let store = InMemoryAggregateStore::shared();
    let processor = MessageProcessor::from_config(ledger_registry(&store), &config);
    processor
        .handle(OpenAccount {
            id: "dave".to_string(),
            owner: "Dave".to_string(),
        })
        .unwrap();
    assert_eq!(
        processor.execute(Balances).unwrap(),
        vec![("dave".to_string(), 0)]
    );
}

#[test]
fn test_invalid_file_is_an_error() {
    let test_dir = TempDir::new().unwrap();
    let config_file = test_dir.path().join("broken.toml");
    std::fs::write(&config_file, "[flush]\nmax_rounds = \"many\"\n").unwrap();
    assert!(ConfigLoader::load_from_file(&config_file).is_err());
}
