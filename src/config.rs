//! Runtime configuration from environment variables.

use anyhow::{Context, Result};
use chrono::Duration;
use std::str::FromStr;

use crate::ingest::{BUCKET_CAPACITY, BucketPolicy, RETENTION_HOURS, WatermarkPolicy};

pub const DEFAULT_DATABASE_PATH: &str = "data/bikeshare.db";
pub const DEFAULT_STATION_FEED_URL: &str =
    "https://gbfs.citibikenyc.com/gbfs/en/station_information.json";
pub const DEFAULT_STATUS_FEED_URL: &str =
    "https://gbfs.citibikenyc.com/gbfs/en/station_status.json";
/// Watermark key the status feed is tracked under.
pub const STATUS_FEED_ID: &str = "station_status";

/// Settings shared by every subcommand.
///
/// Environment variables:
/// - `RELAY_DATABASE_PATH` (default: data/bikeshare.db)
/// - `RELAY_BATCH_SIZE` (default: 100)
/// - `RELAY_STATION_FEED_URL`, `RELAY_STATUS_FEED_URL` (default: Citi Bike GBFS)
/// - `RELAY_FETCH_TIMEOUT_SECS` (default: 20)
/// - `RELAY_BUCKET_CAPACITY` (default: 120)
/// - `RELAY_RETENTION_HOURS` (default: 72)
/// - `RELAY_STRICT_WATERMARK` (default: false)
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub database_path: String,
    pub batch_size: usize,
    pub station_feed_url: String,
    pub status_feed_url: String,
    pub fetch_timeout_secs: u64,
    pub bucket_capacity: u32,
    pub retention_hours: i64,
    /// Keep the watermark in place when any bucket flush fails.
    pub strict_watermark: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            batch_size: 100,
            station_feed_url: DEFAULT_STATION_FEED_URL.to_string(),
            status_feed_url: DEFAULT_STATUS_FEED_URL.to_string(),
            fetch_timeout_secs: 20,
            bucket_capacity: BUCKET_CAPACITY,
            retention_hours: RETENTION_HOURS,
            strict_watermark: false,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Unset keys fall back
    /// to the defaults; set but unparsable values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            database_path: lookup("RELAY_DATABASE_PATH").unwrap_or(defaults.database_path),
            batch_size: parsed(&lookup, "RELAY_BATCH_SIZE", defaults.batch_size)?,
            station_feed_url: lookup("RELAY_STATION_FEED_URL")
                .unwrap_or(defaults.station_feed_url),
            status_feed_url: lookup("RELAY_STATUS_FEED_URL").unwrap_or(defaults.status_feed_url),
            fetch_timeout_secs: parsed(
                &lookup,
                "RELAY_FETCH_TIMEOUT_SECS",
                defaults.fetch_timeout_secs,
            )?,
            bucket_capacity: parsed(&lookup, "RELAY_BUCKET_CAPACITY", defaults.bucket_capacity)?,
            retention_hours: parsed(&lookup, "RELAY_RETENTION_HOURS", defaults.retention_hours)?,
            strict_watermark: parsed(
                &lookup,
                "RELAY_STRICT_WATERMARK",
                defaults.strict_watermark,
            )?,
        };

        anyhow::ensure!(config.batch_size > 0, "RELAY_BATCH_SIZE must be at least 1");
        anyhow::ensure!(
            config.bucket_capacity > 0,
            "RELAY_BUCKET_CAPACITY must be at least 1"
        );
        anyhow::ensure!(
            config.retention_hours > 0,
            "RELAY_RETENTION_HOURS must be positive"
        );
        Ok(config)
    }

    pub fn bucket_policy(&self) -> BucketPolicy {
        BucketPolicy {
            capacity: self.bucket_capacity,
            retention: Duration::hours(self.retention_hours),
        }
    }

    pub fn watermark_policy(&self) -> WatermarkPolicy {
        if self.strict_watermark {
            WatermarkPolicy::RequireCleanBatch
        } else {
            WatermarkPolicy::Lenient
        }
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
