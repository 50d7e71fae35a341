//! Configuration loading and override tests

use anyhow::Result;
use mintpulse::config::ServiceConfig;

#[test]
fn defaults_match_documented_values() {
    let config = ServiceConfig::default();
    assert_eq!(config.server.port, 3305);
    assert_eq!(config.server.environment, "development");
    assert_eq!(config.redis.url, "redis://localhost:6379");
    assert_eq!(config.scheduler.poll_ms, 2000);
    assert_eq!(config.scheduler.workers, 10);
    assert_eq!(config.scheduler.ban_ttl_secs, 86400);
    assert_eq!(config.scheduler.sweep_interval_secs, 600);
    assert_eq!(config.sources.min_request_interval_ms, 200);
    assert_eq!(config.risk.cache_ttl_secs, 300);
    assert!(config.sources.aggregator_cache_ttl_secs >= 5);
    assert!(config.sources.aggregator_cache_ttl_secs <= 60);
}

#[test]
fn default_config_validates_in_development() -> Result<()> {
    let config = ServiceConfig::default();
    config.validate_config()?;
    Ok(())
}

#[test]
fn production_requires_chain_credential() {
    let mut config = ServiceConfig::default();
    config.server.environment = "production".to_string();
    assert!(config.validate_config().is_err());

    config.chain.api_key = "key".to_string();
    assert!(config.validate_config().is_ok());
}

#[test]
fn chain_endpoint_appends_credential() {
    let mut config = ServiceConfig::default();
    assert_eq!(config.chain_endpoint(), config.chain.rpc_url);

    config.chain.api_key = "secret".to_string();
    assert!(config.chain_endpoint().ends_with("/?api-key=secret"));
}

/// File values, environment overrides, and defaults in one sequential test:
/// the environment variables are process-wide, so everything touching them
/// stays in a single test function.
#[test]
fn file_env_and_default_precedence() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("mintpulse.toml");
    std::fs::write(
        &path,
        r#"
[server]
port = 8088

[scheduler]
poll_ms = 500
"#,
    )?;
    let path = path.to_str().unwrap();

    // File values beat defaults; untouched sections keep theirs.
    let config = ServiceConfig::from_file(path)?;
    assert_eq!(config.server.port, 8088);
    assert_eq!(config.scheduler.poll_ms, 500);
    assert_eq!(config.redis.url, "redis://localhost:6379");
    assert_eq!(config.scheduler.workers, 10);

    // Environment beats the file.
    std::env::set_var("PORT", "4000");
    std::env::set_var("DATABASE_URL", "postgresql://x:y@db:5432/z");
    std::env::set_var("REDIS_URL", "redis://cache:6379");
    std::env::set_var("CHAIN_API_KEY", "k123");
    std::env::set_var("POLL_MS", "1000");
    std::env::set_var("NODE_ENV", "staging");

    let config = ServiceConfig::from_file(path)?;
    assert_eq!(config.server.port, 4000);
    assert_eq!(config.database.url, "postgresql://x:y@db:5432/z");
    assert_eq!(config.redis.url, "redis://cache:6379");
    assert_eq!(config.chain.api_key, "k123");
    assert_eq!(config.scheduler.poll_ms, 1000);
    assert_eq!(config.server.environment, "staging");

    for var in [
        "PORT",
        "DATABASE_URL",
        "REDIS_URL",
        "CHAIN_API_KEY",
        "POLL_MS",
        "NODE_ENV",
    ] {
        std::env::remove_var(var);
    }
    Ok(())
}

#[test]
fn rejected_values_fail_validation() {
    let mut config = ServiceConfig::default();
    config.scheduler.poll_ms = 1;
    assert!(config.validate_config().is_err());

    let mut config = ServiceConfig::default();
    config.scheduler.workers = 0;
    assert!(config.validate_config().is_err());

    let mut config = ServiceConfig::default();
    config.sources.aggregator_cache_ttl_secs = 120;
    assert!(config.validate_config().is_err());
}
