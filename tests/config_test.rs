use sequeue::config::{Config, QueueConfig};

// Env vars are process-global, so every env-driven case lives in one test.
#[test]
fn config_from_env_requires_redis_url_and_applies_defaults() {
    unsafe {
        std::env::remove_var("REDIS_URL");
        std::env::remove_var("SEQUEUE_NAMESPACE");
        std::env::remove_var("REDIS_POOL_SIZE");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::set_var("REDIS_URL", "redis://:secret@localhost:6379/0");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.namespace, "sequeue");
    assert_eq!(config.pool_size, 16);
    assert!(!config.log_level.is_empty());
    // SecretString keeps the password out of Debug output.
    assert!(!format!("{config:?}").contains("secret@"));

    unsafe {
        std::env::set_var("REDIS_POOL_SIZE", "not-a-number");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::remove_var("REDIS_URL");
        std::env::remove_var("REDIS_POOL_SIZE");
    }
}

#[test]
fn queue_config_reads_toml_with_defaults() {
    let config = QueueConfig::from_toml_str(
        r#"
        [queue]
        namespace = "orders"
        lease_duration_ms = 10000

        [queue.lock]
        max_backoff_ms = 50
        "#,
    )
    .unwrap();
    assert_eq!(config.namespace, "orders");
    assert_eq!(config.lease_duration().as_millis(), 10_000);
    assert_eq!(config.claim_lock_timeout_ms, 250);
    assert_eq!(config.lock.max_backoff_ms, 50);
    assert_eq!(config.lock.initial_backoff_ms, 5);
}

#[test]
fn queue_config_without_table_is_default() {
    let config = QueueConfig::from_toml_str("").unwrap();
    assert_eq!(config.namespace, "sequeue");
    assert_eq!(config.harvest_interval_ms, 60_000);
}

#[test]
fn queue_config_rejects_invalid_values() {
    assert!(QueueConfig::from_toml_str("[queue]\nnamespace = \"\"").is_err());
    assert!(QueueConfig::from_toml_str("[queue]\nlease_duration_ms = 0").is_err());
    assert!(QueueConfig::from_toml_str("[queue]\nlease_duration_ms = \"soon\"").is_err());
}
