//! Application configuration loaded from environment variables.

use crate::errors::{Result, SettlementError};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Base URL of the price oracle (e.g. https://oracle.example.com)
    pub oracle_url: String,
    /// Asset symbol priced by the oracle
    pub oracle_asset: String,
    /// Attempts per snapshot before the oracle is reported as unavailable
    pub oracle_max_attempts: u32,
    /// How often (in seconds) to look for projects past their close
    pub settlement_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; `from_env` passes the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_var = |key: &str| {
            lookup(key).ok_or_else(|| SettlementError::Config(format!("Missing env var: {key}")))
        };

        let config = Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./vcoin_settlement.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| SettlementError::Config("Invalid API_PORT".to_string()))?,
            oracle_url: env_var("ORACLE_URL").map_err(|_| {
                SettlementError::Config("ORACLE_URL environment variable is required".to_string())
            })?,
            oracle_asset: env_var("ORACLE_ASSET").unwrap_or_else(|_| "VCOIN".to_string()),
            oracle_max_attempts: env_var("ORACLE_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| SettlementError::Config("Invalid ORACLE_MAX_ATTEMPTS".to_string()))?,
            settlement_interval_secs: env_var("SETTLEMENT_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| {
                    SettlementError::Config("Invalid SETTLEMENT_INTERVAL_SECS".to_string())
                })?,
        };

        if config.oracle_max_attempts == 0 {
            return Err(SettlementError::Config(
                "ORACLE_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if config.settlement_interval_secs == 0 {
            return Err(SettlementError::Config(
                "SETTLEMENT_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}
