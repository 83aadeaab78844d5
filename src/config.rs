use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Configuration for the entitlement-meter engine and CLI
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path (default: `.entitlement-meter/` in current directory)
    pub data_dir: PathBuf,

    /// Output format: "human" (default) or "json"
    pub output_format: String,

    /// Log level: "info", "debug", "warn", "error" (default: "info")
    pub log_level: String,

    /// Length of one purchased subscription period, in days (default: 30)
    pub subscription_period_days: u32,

    /// Optional JSON feature policy; the built-in catalog is used when unset
    pub policy_path: Option<PathBuf>,
}

impl Config {
    /// Create a new config with defaults
    pub fn new() -> Self {
        let data_dir = env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".entitlement-meter");

        Config {
            data_dir,
            output_format: "human".to_string(),
            log_level: "info".to_string(),
            subscription_period_days: 30,
            policy_path: None,
        }
    }

    /// Create config with custom data directory
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Config {
            data_dir,
            ..Config::new()
        }
    }

    /// Directory holding one file per ledger key
    pub fn kv_dir(&self) -> PathBuf {
        self.data_dir.join("kv")
    }

    /// Subscription period in seconds, as added to `now` on purchase
    pub fn subscription_period_secs(&self) -> i64 {
        i64::from(self.subscription_period_days) * SECS_PER_DAY
    }

    /// Load config from environment variables
    ///
    /// Environment variables:
    /// - `ENTITLEMENT_METER_DATA_DIR`: override data directory
    /// - `ENTITLEMENT_METER_OUTPUT_FORMAT`: "human" or "json"
    /// - `ENTITLEMENT_METER_LOG_LEVEL`: log level
    /// - `ENTITLEMENT_METER_PERIOD_DAYS`: subscription period in days
    /// - `ENTITLEMENT_METER_POLICY`: path to a JSON feature policy
    pub fn from_env() -> Result<Self> {
        let mut config = Config::new();

        if let Ok(dir) = env::var("ENTITLEMENT_METER_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(format) = env::var("ENTITLEMENT_METER_OUTPUT_FORMAT") {
            config.output_format = format;
        }

        if let Ok(level) = env::var("ENTITLEMENT_METER_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(days) = env::var("ENTITLEMENT_METER_PERIOD_DAYS") {
            config.subscription_period_days = parse_period_days(&days)?;
        }

        if let Ok(path) = env::var("ENTITLEMENT_METER_POLICY") {
            config.policy_path = Some(PathBuf::from(path));
        }

        Ok(config)
    }
}

fn parse_period_days(raw: &str) -> Result<u32> {
    match raw.trim().parse::<u32>() {
        Ok(0) => Err(Error::Config("subscription period must be at least one day".to_string())),
        Ok(days) => Ok(days),
        Err(e) => Err(Error::Config(format!("invalid period days {:?}: {}", raw, e))),
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}
