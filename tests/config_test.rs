//! Tests for configuration loading

use serial_test::serial;
use std::path::Path;
use tempfile::TempDir;

use harvester::config::Config;
use harvester::pool::{Credential, PoolSource, ResourcePool};
use harvester::rotation::{SelectionMode, StrategyKind};

const ENV_KEYS: &[&str] = &[
    "HARVESTER_POOL_FILE",
    "HARVESTER_BACKEND_URL",
    "HARVESTER_MAX_ITEMS",
    "HARVESTER_ROTATION_MODE",
    "HARVESTER_COOLDOWN_SECS",
    "HARVESTER_PROXY",
    "HARVESTER_EMAIL",
    "HARVESTER_USERNAME",
    "HARVESTER_PASSWORD",
    "HARVESTER_COOKIES_FILE",
    "HTTP_PROXY",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[test]
fn test_config_file_exists() {
    let config_path = Path::new("config.toml");
    assert!(
        config_path.exists(),
        "config.toml should exist in project root"
    );
}

#[test]
fn test_shipped_config_is_valid() {
    let config = Config::from_file(Path::new("config.toml")).unwrap();
    config.validate().unwrap();

    assert_eq!(config.rotation.max_uses_per_resource, 50);
    assert_eq!(config.rotation.cooldown_period_secs, 900);
    assert_eq!(config.rotation.duration_malus_secs, 10800);
    assert_eq!(config.rotation.strategy, StrategyKind::Uniform);
    assert_eq!(config.rotation.mode, None);
    assert_eq!(config.harvest.max_oldness_secs, 1800);
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("partial.toml");
    std::fs::write(
        &path,
        "[rotation]\nmode = \"session_duration\"\nrotation_duration_threshold_secs = 1200\n",
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.rotation.mode, Some(SelectionMode::SessionDuration));
    assert_eq!(config.rotation.rotation_duration_threshold_secs, 1200);
    assert_eq!(config.rotation.max_uses_per_resource, 50);
    assert_eq!(config.harvest.batch_size, 20);
}

#[test]
fn test_malformed_file_reports_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[rotation\nmax_uses = ").unwrap();

    let err = Config::from_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("broken.toml"));
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    std::env::set_var("HARVESTER_BACKEND_URL", "http://backend.internal:9000");
    std::env::set_var("HARVESTER_MAX_ITEMS", "40");
    std::env::set_var("HARVESTER_ROTATION_MODE", "session_duration");

    let config = Config::load(Some(Path::new("config.toml"))).unwrap();
    clear_env();

    assert_eq!(config.backend.url, "http://backend.internal:9000");
    assert_eq!(config.harvest.max_items, 40);
    assert_eq!(config.rotation.mode, Some(SelectionMode::SessionDuration));
}

#[test]
#[serial]
fn test_invalid_env_value_rejected() {
    clear_env();
    std::env::set_var("HARVESTER_COOLDOWN_SECS", "fifteen minutes");

    let result = Config::from_env();
    clear_env();

    let err = result.unwrap_err();
    assert!(err.to_string().contains("HARVESTER_COOLDOWN_SECS"));
}

#[test]
#[serial]
fn test_pool_falls_back_to_environment() {
    clear_env();
    std::env::set_var("HARVESTER_PROXY", "http://proxy.internal:3128");
    std::env::set_var("HARVESTER_COOKIES_FILE", "cookies/env.json");

    let pool = ResourcePool::resolve(Some(Path::new("does/not/exist.json"))).unwrap();
    clear_env();

    assert!(matches!(pool.source(), PoolSource::Environment));
    assert_eq!(pool.len(), 1);
    let resource = &pool.resources()[0];
    assert_eq!(resource.id.as_str(), "env");
    assert_eq!(
        resource.credential,
        Credential::CookieFile("cookies/env.json".into())
    );
    assert_eq!(resource.proxy.as_ref().unwrap().host, "proxy.internal");
}

#[test]
#[serial]
fn test_missing_pool_and_credentials_is_configuration_error() {
    clear_env();

    let err = ResourcePool::resolve(Some(Path::new("does/not/exist.txt"))).unwrap_err();
    assert!(err.is_configuration());
}
