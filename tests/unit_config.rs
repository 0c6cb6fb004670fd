use std::fs;

use async_cosmos::{CliArgs, ConnectionMode, ConsistencyLevel, ServerConfig, StoreBackend};
use clap::Parser;
use serial_test::serial;

const EMULATOR_KEY: &str =
    "C2y6yDjf5/R+ob0N8A7Cgv30VRDJIWEHLM+4QDU5DE2nQ9nDuVTqobD4b8mGGyPMbIZnqyMsEcaGQy67XIw/Jw==";

fn parse(args: &[&str]) -> CliArgs {
    let mut argv = vec!["async-cosmos"];
    argv.extend_from_slice(args);
    CliArgs::parse_from(argv)
}

#[test]
#[serial]
fn defaults_apply_when_only_names_are_given() {
    let config =
        ServerConfig::from_args(parse(&["--database", "db", "--container", "projects"])).unwrap();

    assert_eq!(config.backend, StoreBackend::Cosmos);
    assert_eq!(config.database, "db");
    assert_eq!(config.container, "projects");
    assert_eq!(config.preferred_regions, vec!["East US 2".to_string()]);
    assert_eq!(config.consistency, ConsistencyLevel::Session);
    assert_eq!(config.connection_mode, ConnectionMode::Gateway);
    assert_eq!(config.throughput, Some(400));
    assert!(!config.automatic_indexing);
    assert_eq!(config.page_size, 100);
    assert_eq!(config.scan_cap, Some(100_000));
    assert_eq!(
        config.http_bind_address,
        "127.0.0.1:8080".parse().expect("default bind")
    );
    assert_eq!(config.shutdown_timeout_secs, 30);

    let provisioning = config.provisioning_options();
    assert_eq!(provisioning.throughput, Some(400));
    assert!(!provisioning.automatic_indexing);
}

#[test]
#[serial]
fn database_and_container_are_required() {
    let err = ServerConfig::from_args(parse(&["--container", "projects"])).unwrap_err();
    assert!(err.to_string().contains("database"));

    let err = ServerConfig::from_args(parse(&["--database", "db", "--container", "  "]))
        .unwrap_err();
    assert!(err.to_string().contains("container"));
}

#[test]
#[serial]
fn cli_overrides_config_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.yaml");
    fs::write(
        &path,
        "database: from-file\ncontainer: projects\nthroughput: 1000\npage_size: 25\n\
         consistency: eventual\npreferred_regions:\n  - West Europe\n  - North Europe\n",
    )
    .unwrap();

    let config = ServerConfig::from_args(parse(&[
        "--config",
        path.to_str().unwrap(),
        "--database",
        "from-cli",
        "--page-size",
        "10",
    ]))
    .unwrap();

    assert_eq!(config.database, "from-cli");
    assert_eq!(config.container, "projects");
    assert_eq!(config.throughput, Some(1000));
    assert_eq!(config.page_size, 10);
    assert_eq!(config.consistency, ConsistencyLevel::Eventual);
    assert_eq!(
        config.preferred_regions,
        vec!["West Europe".to_string(), "North Europe".to_string()]
    );
}

#[test]
#[serial]
fn json_config_is_accepted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.json");
    fs::write(
        &path,
        r#"{"backend": "memory", "database": "db", "container": "c", "scan_cap": 0, "throughput": 0}"#,
    )
    .unwrap();

    let config = ServerConfig::from_args(parse(&["--config", path.to_str().unwrap()])).unwrap();
    assert_eq!(config.backend, StoreBackend::Memory);
    assert_eq!(config.scan_cap, None);
    assert_eq!(config.throughput, None);
    assert_eq!(config.scan_options().result_cap, None);
    config.validate().expect("memory backend needs no credentials");
}

#[test]
#[serial]
fn unknown_config_extension_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.toml");
    fs::write(&path, "database = \"db\"\n").unwrap();

    let err = ServerConfig::from_args(parse(&["--config", path.to_str().unwrap()])).unwrap_err();
    assert!(err.to_string().contains("unsupported config extension"));

    let missing = dir.path().join("absent.yaml");
    let err = ServerConfig::from_args(parse(&["--config", missing.to_str().unwrap()])).unwrap_err();
    assert!(err.to_string().contains("does not exist"));
}

#[test]
#[serial]
fn environment_fills_unset_flags() {
    unsafe {
        std::env::set_var("ASYNC_COSMOS_DATABASE", "env-db");
        std::env::set_var("ASYNC_COSMOS_PREFERRED_REGIONS", "West US, East US,West US");
    }
    let result = ServerConfig::from_args(parse(&["--container", "projects"]));
    unsafe {
        std::env::remove_var("ASYNC_COSMOS_DATABASE");
        std::env::remove_var("ASYNC_COSMOS_PREFERRED_REGIONS");
    }

    let config = result.unwrap();
    assert_eq!(config.database, "env-db");
    assert_eq!(
        config.preferred_regions,
        vec!["West US".to_string(), "East US".to_string()]
    );
}

#[test]
#[serial]
fn cosmos_backend_requires_credentials() {
    let config =
        ServerConfig::from_args(parse(&["--database", "db", "--container", "c"])).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("endpoint"));

    let config = ServerConfig::from_args(parse(&[
        "--database",
        "db",
        "--container",
        "c",
        "--endpoint",
        "https://localhost:8081/",
    ]))
    .unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("key"));

    let config = ServerConfig::from_args(parse(&[
        "--database",
        "db",
        "--container",
        "c",
        "--endpoint",
        "ftp://localhost:8081/",
        "--key",
        EMULATOR_KEY,
    ]))
    .unwrap();
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn direct_mode_is_rejected() {
    let config = ServerConfig::from_args(parse(&[
        "--database",
        "db",
        "--container",
        "c",
        "--endpoint",
        "https://localhost:8081/",
        "--key",
        EMULATOR_KEY,
        "--connection-mode",
        "direct",
    ]))
    .unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("gateway"));
}

#[test]
#[serial]
fn key_never_appears_in_debug_output() {
    let config = ServerConfig::from_args(parse(&[
        "--database",
        "db",
        "--container",
        "c",
        "--endpoint",
        "https://localhost:8081/",
        "--key",
        EMULATOR_KEY,
    ]))
    .unwrap();
    config.validate().expect("valid cosmos config");

    let rendered = format!("{config:?}");
    assert!(!rendered.contains(EMULATOR_KEY));
    assert!(rendered.contains("<redacted>"));

    let options = config.connection_options().unwrap();
    assert_eq!(options.key.expose(), EMULATOR_KEY);
    assert_eq!(options.endpoint, "https://localhost:8081/");
}
