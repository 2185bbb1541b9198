//! Config environment variable tests
//!
//! These tests verify that Config::from_env() reads and applies environment
//! variable overrides and rejects settings that break scoring.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use failsafe_pipeline::config::{Config, LogFormat};
use failsafe_pipeline::error::AppError;
use serial_test::serial;
use std::env;

fn clear(vars: &[&str]) {
    for var in vars {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_config_from_env_defaults() {
    let config = Config::from_env().unwrap();
    assert_eq!(config.detectors.base_url, "http://localhost:8600");
    assert!(config.detectors.api_key.is_none());
    assert!(config.detectors.enable_translation);
    assert!(config.database.is_none());
    assert_eq!(config.pipeline.processing_language, "en");
}

#[test]
#[serial]
fn test_config_from_env_custom_detectors() {
    env::set_var("DETECTOR_BASE_URL", "https://detectors.internal:9000");
    env::set_var("DETECTOR_API_KEY", "secret");
    env::set_var("ENABLE_TRANSLATION", "FALSE");

    let config = Config::from_env().unwrap();
    assert_eq!(config.detectors.base_url, "https://detectors.internal:9000");
    assert_eq!(config.detectors.api_key.as_deref(), Some("secret"));
    assert!(!config.detectors.enable_translation);

    clear(&["DETECTOR_BASE_URL", "DETECTOR_API_KEY", "ENABLE_TRANSLATION"]);
}

#[test]
#[serial]
fn test_config_from_env_empty_api_key_is_none() {
    env::set_var("DETECTOR_API_KEY", "");

    let config = Config::from_env().unwrap();
    assert!(config.detectors.api_key.is_none());

    clear(&["DETECTOR_API_KEY"]);
}

#[test]
#[serial]
fn test_config_from_env_custom_database() {
    env::set_var("DATABASE_PATH", "/custom/claims.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "10");

    let config = Config::from_env().unwrap();
    let database = config.database.unwrap();
    assert_eq!(database.path.to_str().unwrap(), "/custom/claims.db");
    assert_eq!(database.max_connections, 10);

    clear(&["DATABASE_PATH", "DATABASE_MAX_CONNECTIONS"]);
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    env::set_var("LOG_FORMAT", "JSON");
    env::set_var("LOG_LEVEL", "debug");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.logging.level, "debug");

    clear(&["LOG_FORMAT", "LOG_LEVEL"]);
}

#[test]
#[serial]
fn test_config_from_env_custom_request_and_cache() {
    env::set_var("REQUEST_TIMEOUT_MS", "60000");
    env::set_var("MAX_RETRIES", "5");
    env::set_var("RETRY_DELAY_MS", "2000");
    env::set_var("CACHE_TTL_SECS", "60");
    env::set_var("CACHE_CAPACITY", "32");
    env::set_var("CACHE_SHARDS", "4");

    let config = Config::from_env().unwrap();
    assert_eq!(config.request.timeout_ms, 60000);
    assert_eq!(config.request.max_retries, 5);
    assert_eq!(config.request.retry_delay_ms, 2000);
    assert_eq!(config.cache.ttl_secs, 60);
    assert_eq!(config.cache.capacity, 32);
    assert_eq!(config.cache.shards, 4);

    clear(&[
        "REQUEST_TIMEOUT_MS",
        "MAX_RETRIES",
        "RETRY_DELAY_MS",
        "CACHE_TTL_SECS",
        "CACHE_CAPACITY",
        "CACHE_SHARDS",
    ]);
}

#[test]
#[serial]
fn test_config_invalid_number_uses_default() {
    env::set_var("MAX_RETRIES", "many");

    let config = Config::from_env().unwrap();
    assert_eq!(config.request.max_retries, 3);

    clear(&["MAX_RETRIES"]);
}

#[test]
#[serial]
fn test_config_languages_are_lowercased() {
    env::set_var("PROCESSING_LANGUAGE", "EN");
    env::set_var("DEFAULT_LANGUAGE", "Es");

    let config = Config::from_env().unwrap();
    assert_eq!(config.pipeline.processing_language, "en");
    assert_eq!(config.pipeline.default_language, "es");

    clear(&["PROCESSING_LANGUAGE", "DEFAULT_LANGUAGE"]);
}

#[test]
#[serial]
fn test_config_scoring_overrides() {
    env::set_var("SCORE_TOP_K", "5");
    env::set_var("VERDICT_HIGH_THRESHOLD", "0.8");
    env::set_var("VERDICT_LOW_THRESHOLD", "0.2");

    let config = Config::from_env().unwrap();
    let scoring = &config.pipeline.scoring;
    assert_eq!(scoring.top_k, 5);
    assert_eq!(scoring.high_threshold, 0.8);
    assert_eq!(scoring.low_threshold, 0.2);

    clear(&["SCORE_TOP_K", "VERDICT_HIGH_THRESHOLD", "VERDICT_LOW_THRESHOLD"]);
}

#[test]
#[serial]
fn test_config_inverted_thresholds_rejected() {
    env::set_var("VERDICT_HIGH_THRESHOLD", "0.3");
    env::set_var("VERDICT_LOW_THRESHOLD", "0.6");

    let result = Config::from_env();
    assert!(matches!(result, Err(AppError::Config { .. })));

    clear(&["VERDICT_HIGH_THRESHOLD", "VERDICT_LOW_THRESHOLD"]);
}

#[test]
#[serial]
fn test_config_zero_cache_capacity_rejected() {
    env::set_var("CACHE_CAPACITY", "0");

    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("CACHE_CAPACITY"));

    clear(&["CACHE_CAPACITY"]);
}
