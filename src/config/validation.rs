// src/config/validation.rs

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use secrecy::ExposeSecret;
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &AppConfig) -> Result<()> {
        debug!("Starting configuration validation");

        Self::validate_keys(config)?;
        Self::validate_upstream(config)?;
        Self::validate_server(config)?;
        Self::validate_pool(config)?;

        debug!("Configuration validation completed successfully");
        Ok(())
    }

    fn validate_keys(config: &AppConfig) -> Result<()> {
        let keys = config.resolved_keys();

        if keys.is_empty() {
            return Err(AppError::config_validation(
                "At least one API key must be configured",
                Some("keys"),
            ));
        }

        let mut ids = HashSet::new();
        for entry in &keys {
            if !ids.insert(entry.id.clone()) {
                return Err(AppError::config_validation(
                    format!("Duplicate key id: {}", entry.id),
                    Some("keys.id"),
                ));
            }

            if entry.credential.expose_secret().trim().is_empty() {
                return Err(AppError::config_validation(
                    format!("Key '{}' has an empty credential", entry.id),
                    Some("keys.credential"),
                ));
            }
        }

        debug!("Validated {} key entries", keys.len());
        Ok(())
    }

    fn validate_upstream(config: &AppConfig) -> Result<()> {
        let url = Url::parse(&config.upstream_url).map_err(|e| {
            warn!(upstream_url = %config.upstream_url, error = %e, "Invalid upstream URL");
            AppError::config_validation(
                format!("Invalid upstream_url '{}': {}", config.upstream_url, e),
                Some("upstream_url"),
            )
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::config_validation(
                format!("Unsupported upstream_url scheme: {}", url.scheme()),
                Some("upstream_url"),
            ));
        }

        Ok(())
    }

    fn validate_server(config: &AppConfig) -> Result<()> {
        if config.server.port == 0 {
            return Err(AppError::config_validation(
                "Server port cannot be 0",
                Some("server.port"),
            ));
        }

        if config.server.connect_timeout_secs == 0 {
            return Err(AppError::config_validation(
                "Connect timeout cannot be 0",
                Some("server.connect_timeout_secs"),
            ));
        }

        Ok(())
    }

    fn validate_pool(config: &AppConfig) -> Result<()> {
        let pool = &config.pool;

        if pool.max_big_retries == 0 {
            return Err(AppError::config_validation(
                "max_big_retries must be at least 1",
                Some("pool.max_big_retries"),
            ));
        }

        if pool.max_small_retries == 0 {
            return Err(AppError::config_validation(
                "max_small_retries must be at least 1",
                Some("pool.max_small_retries"),
            ));
        }

        if pool.small_backoff_secs == 0 {
            return Err(AppError::config_validation(
                "small_backoff_secs cannot be 0",
                Some("pool.small_backoff_secs"),
            ));
        }

        if pool.request_timeout_minutes == 0 {
            return Err(AppError::config_validation(
                "request_timeout_minutes cannot be 0",
                Some("pool.request_timeout_minutes"),
            ));
        }

        if pool.sweep_interval_secs == 0 {
            return Err(AppError::config_validation(
                "sweep_interval_secs cannot be 0",
                Some("pool.sweep_interval_secs"),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyEntrySpec;
    use rstest::rstest;

    fn valid_config() -> AppConfig {
        AppConfig {
            keys: vec![KeyEntrySpec::Bare("sk-test-1234".to_string())],
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(ConfigValidator::validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_empty_key_list_rejected() {
        let config = AppConfig::default();
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(matches!(err, AppError::ConfigValidation { .. }));
    }

    #[test]
    fn test_duplicate_key_ids_rejected() {
        let mut config = valid_config();
        config.keys = vec![
            KeyEntrySpec::Full {
                id: "a".to_string(),
                credential: "sk-1".to_string(),
            },
            KeyEntrySpec::Full {
                id: "a".to_string(),
                credential: "sk-2".to_string(),
            },
        ];
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_empty_credential_rejected() {
        let mut config = valid_config();
        config.keys = vec![KeyEntrySpec::Bare("   ".to_string())];
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_invalid_upstream_url_rejected() {
        let mut config = valid_config();
        config.upstream_url = "not a url".to_string();
        assert!(ConfigValidator::validate(&config).is_err());

        config.upstream_url = "ftp://example.com".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[rstest]
    #[case::big_retries("pool.max_big_retries")]
    #[case::small_retries("pool.max_small_retries")]
    #[case::backoff("pool.small_backoff_secs")]
    #[case::request_timeout("pool.request_timeout_minutes")]
    #[case::sweep_interval("pool.sweep_interval_secs")]
    #[case::port("server.port")]
    #[case::connect_timeout("server.connect_timeout_secs")]
    fn test_zero_knobs_rejected(#[case] field: &str) {
        let mut config = valid_config();
        match field {
            "pool.max_big_retries" => config.pool.max_big_retries = 0,
            "pool.max_small_retries" => config.pool.max_small_retries = 0,
            "pool.small_backoff_secs" => config.pool.small_backoff_secs = 0,
            "pool.request_timeout_minutes" => config.pool.request_timeout_minutes = 0,
            "pool.sweep_interval_secs" => config.pool.sweep_interval_secs = 0,
            "server.port" => config.server.port = 0,
            "server.connect_timeout_secs" => config.server.connect_timeout_secs = 0,
            _ => unreachable!(),
        }

        match ConfigValidator::validate(&config).unwrap_err() {
            AppError::ConfigValidation { field: f, .. } => assert_eq!(f.as_deref(), Some(field)),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
