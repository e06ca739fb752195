//! Configuration module
//!
//! Loads configuration from environment variables.

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregation::{AggregationSettings, DEFAULT_PAGE_SIZE};
use crate::domain::{FiatConversion, SplitTable, SplitTableConfig};
use crate::jobs::JobSchedulerConfig;
use crate::reconcile::{ReconcileSettings, DEFAULT_MISMATCH_THRESHOLD};
use crate::service::{ServiceSettings, DEFAULT_CONCURRENCY};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Users aggregated concurrently in a batch
    pub aggregation_concurrency: usize,

    /// Transactions fetched per page when scanning the log
    pub transaction_page_size: usize,

    /// Tolerated token difference between cached and derived balance
    pub balance_mismatch_threshold: i64,

    pub fiat: FiatConversion,

    /// Creator split ratios, built-in `v1` unless `SPLIT_TABLE_PATH` is set
    pub split_table: SplitTable,

    pub job_interval: Duration,
    pub reconcile_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_env("DATABASE_MAX_CONNECTIONS", 10)?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = parse_env("PORT", 3000)?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let aggregation_concurrency: usize =
            parse_env("AGGREGATION_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        if aggregation_concurrency == 0 {
            return Err(ConfigError::InvalidValue("AGGREGATION_CONCURRENCY"));
        }

        let transaction_page_size: usize = parse_env("TRANSACTION_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if transaction_page_size == 0 {
            return Err(ConfigError::InvalidValue("TRANSACTION_PAGE_SIZE"));
        }

        let balance_mismatch_threshold: i64 =
            parse_env("BALANCE_MISMATCH_THRESHOLD", DEFAULT_MISMATCH_THRESHOLD)?;
        if balance_mismatch_threshold < 0 {
            return Err(ConfigError::InvalidValue("BALANCE_MISMATCH_THRESHOLD"));
        }

        let currency = env::var("FIAT_CURRENCY").unwrap_or_else(|_| "PLN".to_string());
        let rate: Decimal = parse_env("TOKEN_FIAT_RATE", Decimal::new(20, 2))?;
        if rate.is_sign_negative() {
            return Err(ConfigError::InvalidValue("TOKEN_FIAT_RATE"));
        }

        let split_table = match env::var("SPLIT_TABLE_PATH") {
            Ok(path) => load_split_table(&path)?,
            Err(_) => SplitTable::v1(),
        };

        let job_interval = Duration::from_secs(parse_env("JOB_INTERVAL_SECS", 86_400)?);
        let reconcile_interval = Duration::from_secs(parse_env("RECONCILE_INTERVAL_SECS", 86_400)?);
        if job_interval.is_zero() || reconcile_interval.is_zero() {
            return Err(ConfigError::InvalidValue("JOB_INTERVAL_SECS"));
        }

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            aggregation_concurrency,
            transaction_page_size,
            balance_mismatch_threshold,
            fiat: FiatConversion::new(currency, rate),
            split_table,
            job_interval,
            reconcile_interval,
        })
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            aggregation: AggregationSettings {
                split_table: Arc::new(self.split_table.clone()),
                fiat: self.fiat.clone(),
                page_size: self.transaction_page_size,
            },
            reconcile: ReconcileSettings {
                mismatch_threshold: self.balance_mismatch_threshold,
                page_size: self.transaction_page_size,
            },
            concurrency: self.aggregation_concurrency,
        }
    }

    pub fn scheduler_config(&self) -> JobSchedulerConfig {
        JobSchedulerConfig {
            earnings_interval: self.job_interval,
            reconcile_interval: self.reconcile_interval,
        }
    }
}

fn parse_env<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

/// Read and validate a JSON split table
pub fn load_split_table(path: &str) -> Result<SplitTable, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::SplitTable(format!("{}: {}", path, e)))?;
    parse_split_table(&raw)
}

pub fn parse_split_table(raw: &str) -> Result<SplitTable, ConfigError> {
    let config: SplitTableConfig =
        serde_json::from_str(raw).map_err(|e| ConfigError::SplitTable(e.to_string()))?;
    SplitTable::new(config.version, config.creator_ratios)
        .map_err(|e| ConfigError::SplitTable(e.to_string()))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),

    #[error("Invalid split table: {0}")]
    SplitTable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceCategory;

    #[test]
    fn test_parse_split_table() {
        let raw = r#"{
            "version": "v2",
            "creator_ratios": {
                "chat": "0.70", "call": "0.85", "calendar": "0.80",
                "event": "0.75", "other": "0.60"
            }
        }"#;

        let table = parse_split_table(raw).unwrap();
        assert_eq!(table.version(), "v2");
        assert_eq!(table.ratio(SourceCategory::Chat).bps(), 7000);
        assert_eq!(table.ratio(SourceCategory::Call).bps(), 8500);
    }

    #[test]
    fn test_parse_split_table_rejects_incomplete() {
        let raw = r#"{"version": "v2", "creator_ratios": {"chat": "0.70"}}"#;
        let err = parse_split_table(raw).unwrap_err();
        assert!(matches!(err, ConfigError::SplitTable(_)));
    }

    #[test]
    fn test_parse_split_table_rejects_out_of_range() {
        let raw = r#"{
            "version": "bad",
            "creator_ratios": {
                "chat": "1.2", "call": "0.8", "calendar": "0.8",
                "event": "0.8", "other": "0.65"
            }
        }"#;
        assert!(parse_split_table(raw).is_err());
    }
}
