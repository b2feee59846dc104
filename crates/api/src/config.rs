use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;

use tillpoint_infra::{EngineConfig, IsolationStrategy};
use tillpoint_observability::LogFormat;
use tillpoint_sales::DuplicatePolicy;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres connection string; without it the process runs on the in-memory store.
    pub database_url: Option<String>,
    pub port: u16,
    pub db_max_connections: u32,
    pub engine: EngineConfig,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source. Unset and blank values take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let duplicate_policy = match var("SALE_DUPLICATE_POLICY") {
            Some(raw) => raw
                .parse::<DuplicatePolicy>()
                .map_err(|e| anyhow!(e))
                .context("SALE_DUPLICATE_POLICY is invalid")?,
            None => DuplicatePolicy::default(),
        };
        let isolation = match var("SALE_ISOLATION") {
            Some(raw) => raw
                .parse::<IsolationStrategy>()
                .map_err(|e| anyhow!(e))
                .context("SALE_ISOLATION is invalid")?,
            None => IsolationStrategy::default(),
        };
        let commit_timeout_ms: u64 = var("SALE_COMMIT_TIMEOUT_MS")
            .unwrap_or_else(|| "5000".to_string())
            .parse()
            .context("SALE_COMMIT_TIMEOUT_MS must be a number of milliseconds")?;
        if commit_timeout_ms == 0 {
            return Err(anyhow!("SALE_COMMIT_TIMEOUT_MS must be greater than zero"));
        }
        let log_format = match var("LOG_FORMAT") {
            Some(raw) => raw
                .parse::<LogFormat>()
                .map_err(|e| anyhow!(e))
                .context("LOG_FORMAT is invalid")?,
            None => LogFormat::default(),
        };

        Ok(Self {
            database_url: var("DATABASE_URL"),
            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            db_max_connections: var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|| "10".to_string())
                .parse()
                .context("DB_MAX_CONNECTIONS must be a valid number")?,
            engine: EngineConfig {
                duplicate_policy,
                isolation,
                commit_timeout: Duration::from_millis(commit_timeout_ms),
            },
            log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.database_url, None);
        assert_eq!(config.port, 8080);
        assert_eq!(config.db_max_connections, 10);
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn engine_settings_are_read() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/tillpoint"),
            ("SALE_DUPLICATE_POLICY", "merge"),
            ("SALE_ISOLATION", "row_locking"),
            ("SALE_COMMIT_TIMEOUT_MS", "250"),
            ("LOG_FORMAT", "pretty"),
        ])
        .unwrap();
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/tillpoint")
        );
        assert_eq!(config.engine.duplicate_policy, DuplicatePolicy::Merge);
        assert_eq!(config.engine.isolation, IsolationStrategy::RowLocking);
        assert_eq!(config.engine.commit_timeout, Duration::from_millis(250));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn invalid_values_fail_with_the_variable_name() {
        let err = config_from(&[("SALE_ISOLATION", "serializable")]).unwrap_err();
        assert!(err.to_string().contains("SALE_ISOLATION"));

        let err = config_from(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        assert!(config_from(&[("SALE_COMMIT_TIMEOUT_MS", "0")]).is_err());
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        let config = config_from(&[("DATABASE_URL", "  ")]).unwrap();
        assert!(config.database_url.is_none());
    }
}
