//! Runtime configuration from environment variables
//!
//! The ledger and the business data live behind two independent connection
//! pools, so each gets its own URL and pool size. A `.env` file is honored
//! when present.

use crate::error::{CliError, Result};

/// Connection settings for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ledger database (run bookkeeping)
    pub ledger_database_url: String,
    /// Business database (imported records)
    pub business_database_url: String,
    pub ledger_pool_size: u32,
    pub business_pool_size: u32,
}

impl Config {
    /// Load from the environment.
    ///
    /// Recognized variables: `BATCHLINE_LEDGER_DATABASE_URL`,
    /// `BATCHLINE_BUSINESS_DATABASE_URL`, `BATCHLINE_LEDGER_POOL_SIZE`,
    /// `BATCHLINE_BUSINESS_POOL_SIZE`. The business URL falls back to the
    /// ledger URL; the pools stay separate either way.
    pub fn from_env() -> Result<Self> {
        let ledger_database_url = std::env::var("BATCHLINE_LEDGER_DATABASE_URL")
            .map_err(|_| CliError::Config("BATCHLINE_LEDGER_DATABASE_URL is not set".into()))?;
        let business_database_url = std::env::var("BATCHLINE_BUSINESS_DATABASE_URL")
            .unwrap_or_else(|_| ledger_database_url.clone());

        let config = Self {
            ledger_database_url,
            business_database_url,
            ledger_pool_size: env_u32("BATCHLINE_LEDGER_POOL_SIZE", 5)?,
            business_pool_size: env_u32("BATCHLINE_BUSINESS_POOL_SIZE", 10)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.ledger_database_url.starts_with("postgres") {
            return Err(CliError::Config(
                "ledger database URL must be a postgres:// URL".into(),
            ));
        }
        if !self.business_database_url.starts_with("postgres") {
            return Err(CliError::Config(
                "business database URL must be a postgres:// URL".into(),
            ));
        }
        if self.ledger_pool_size == 0 || self.business_pool_size == 0 {
            return Err(CliError::Config("pool sizes must be at least 1".into()));
        }
        Ok(())
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| CliError::Config(format!("{key} must be a positive integer: {value:?}"))),
        Err(_) => Ok(default),
    }
}
