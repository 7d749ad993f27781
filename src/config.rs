//! Application configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::api::DEFAULT_BASE_URL;
use crate::levels::DEFAULT_TOLERANCE_PCT;

/// Parameters sent with every pivot detection request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PivotDetectionConfig {
    /// Bars either side of a swing (default: 5)
    pub lookback: usize,
    /// Maximum pivots to return (default: 10)
    pub count: usize,
    /// Bars of market data to fetch (default: 200)
    pub periods: usize,
}

impl Default for PivotDetectionConfig {
    fn default() -> Self {
        Self {
            lookback: 5,
            count: 10,
            periods: 200,
        }
    }
}

/// Configuration for the workflow engine and CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Analysis backend base URL
    pub api_url: String,

    /// HTTP timeout in seconds
    pub request_timeout_secs: u64,

    /// Directory holding the persisted store
    pub data_dir: PathBuf,

    /// Largest value the file backend accepts, if limited
    pub quota_bytes: Option<usize>,

    /// Confluence tolerance as a percentage of price (default: 0.5)
    pub tolerance_pct: f64,

    /// Include the secondary ratio set
    pub extended_ratios: bool,

    pub detection: PivotDetectionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 30,
            data_dir: PathBuf::from(".fib-workflow"),
            quota_bytes: Some(5 * 1024 * 1024), // Matches a typical browser origin quota
            tolerance_pct: DEFAULT_TOLERANCE_PCT,
            extended_ratios: false,
            detection: PivotDetectionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults overridden by environment variables (a `.env` file is loaded first)
    ///
    /// Reads:
    /// - `FIB_WORKFLOW_API_URL`
    /// - `FIB_WORKFLOW_DATA_DIR`
    /// - `FIB_WORKFLOW_QUOTA_BYTES` (0 disables the quota)
    /// - `FIB_WORKFLOW_TOLERANCE_PCT`
    /// - `FIB_WORKFLOW_EXTENDED_RATIOS` ("true" to enable)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("FIB_WORKFLOW_API_URL") {
            config.api_url = url;
        }
        if let Some(dir) = lookup("FIB_WORKFLOW_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(quota) = lookup("FIB_WORKFLOW_QUOTA_BYTES") {
            let bytes: usize = quota
                .parse()
                .context("FIB_WORKFLOW_QUOTA_BYTES must be a byte count")?;
            config.quota_bytes = (bytes > 0).then_some(bytes);
        }
        if let Some(tolerance) = lookup("FIB_WORKFLOW_TOLERANCE_PCT") {
            config.tolerance_pct = tolerance
                .parse()
                .context("FIB_WORKFLOW_TOLERANCE_PCT must be a number")?;
        }
        if let Some(flag) = lookup("FIB_WORKFLOW_EXTENDED_RATIOS") {
            config.extended_ratios = flag.eq_ignore_ascii_case("true") || flag == "1";
        }

        Ok(config)
    }
}
