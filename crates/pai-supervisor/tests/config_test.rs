//! Tests for environment-driven supervisor configuration

use pai_supervisor::dependency::{ExecutableLocator, ServiceKind, SupervisorConfig, SupervisorError};
use serial_test::serial;
use std::path::PathBuf;
use std::time::Duration;

const PAI_VARS: &[&str] = &[
    "PAI_BACKEND_PORT",
    "PAI_QDRANT_PORT",
    "PAI_QDRANT_GRPC_PORT",
    "PAI_BACKEND_BIN",
    "PAI_QDRANT_BIN",
    "PAI_QDRANT_VERSION",
    "PAI_QDRANT_URL",
    "PAI_DATA_DIR",
    "PAI_LOG_DIR",
    "PAI_BACKEND_STARTUP_TIMEOUT_SECS",
    "PAI_QDRANT_STARTUP_TIMEOUT_SECS",
    "PAI_VERBOSE_LOGGING",
];

fn clear_env() {
    for var in PAI_VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_from_env_defaults() {
    clear_env();
    let config = SupervisorConfig::from_env();

    assert_eq!(config.backend_port, 8000);
    assert_eq!(config.qdrant_port, 6333);
    assert_eq!(config.qdrant_grpc_port, 6334);
    assert_eq!(config.qdrant_version, "v1.12.4");
    assert_eq!(config.qdrant_startup_timeout, Duration::from_secs(60));
    assert!(config.qdrant_url.is_none());
    assert!(!config.verbose_logging);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_env();
    std::env::set_var("PAI_BACKEND_PORT", "8100");
    std::env::set_var("PAI_QDRANT_PORT", "7333");
    std::env::set_var("PAI_DATA_DIR", "/var/lib/pai");
    std::env::set_var("PAI_QDRANT_URL", "http://mirror.local/qdrant.tar.gz");
    std::env::set_var("PAI_BACKEND_STARTUP_TIMEOUT_SECS", "45");
    std::env::set_var("PAI_VERBOSE_LOGGING", "1");

    let config = SupervisorConfig::from_env();
    clear_env();

    assert_eq!(config.backend_port, 8100);
    assert_eq!(config.qdrant_port, 7333);
    assert_eq!(config.data_dir, PathBuf::from("/var/lib/pai"));
    assert_eq!(config.log_dir, PathBuf::from("/var/lib/pai/logs"));
    assert_eq!(config.backend_startup_timeout, Duration::from_secs(45));
    assert!(config.verbose_logging);

    let specs = config.service_specs().unwrap();
    assert_eq!(specs[0].kind, ServiceKind::VectorDb);
    assert_eq!(specs[1].kind, ServiceKind::Backend);
    assert_eq!(specs[1].health_url, "http://127.0.0.1:8100/");
    match &specs[0].executable {
        ExecutableLocator::Provisioned(target) => {
            assert_eq!(target.url, "http://mirror.local/qdrant.tar.gz");
            assert_eq!(target.install_dir, PathBuf::from("/var/lib/pai/bin"));
        }
        other => panic!("expected provisioned qdrant, got {other:?}"),
    }
}

#[test]
#[serial]
fn test_unparsable_values_keep_defaults() {
    clear_env();
    std::env::set_var("PAI_BACKEND_PORT", "eighty");
    std::env::set_var("PAI_QDRANT_STARTUP_TIMEOUT_SECS", "-1");
    std::env::set_var("PAI_VERBOSE_LOGGING", "false");

    let config = SupervisorConfig::from_env();
    clear_env();

    assert_eq!(config.backend_port, 8000);
    assert_eq!(config.qdrant_startup_timeout, Duration::from_secs(60));
    assert!(!config.verbose_logging);
}

#[test]
#[serial]
fn test_conflicting_ports_fail_validation() {
    clear_env();
    std::env::set_var("PAI_QDRANT_PORT", "8000");

    let config = SupervisorConfig::from_env();
    clear_env();

    match config.validate() {
        Err(SupervisorError::ConfigError { message }) => {
            assert!(message.contains("Port conflict"));
        }
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
#[serial]
fn test_openai_key_is_forwarded_to_backend() {
    clear_env();
    let previous = std::env::var("OPENAI_API_KEY").ok();
    std::env::set_var("OPENAI_API_KEY", "sk-test");

    let spec = SupervisorConfig::from_env().backend_spec();

    match previous {
        Some(key) => std::env::set_var("OPENAI_API_KEY", key),
        None => std::env::remove_var("OPENAI_API_KEY"),
    }

    assert!(spec
        .env_vars
        .contains(&("OPENAI_API_KEY".to_string(), "sk-test".to_string())));
}
