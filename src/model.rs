//! Records exchanged between the feed, the pipelines and the store.

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An untyped feed record as decoded from GBFS JSON or a queue message.
pub type RawRecord = Map<String, Value>;

/// GeoJSON geometry. Stations only ever carry a point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    /// `[longitude, latitude]`
    Point { coordinates: [f64; 2] },
}

impl Geometry {
    pub fn point(longitude: f64, latitude: f64) -> Self {
        Geometry::Point {
            coordinates: [longitude, latitude],
        }
    }

    pub fn longitude(&self) -> f64 {
        match self {
            Geometry::Point { coordinates } => coordinates[0],
        }
    }

    pub fn latitude(&self) -> f64 {
        match self {
            Geometry::Point { coordinates } => coordinates[1],
        }
    }
}

/// Station metadata as stored in the `stations` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capacity: u32,
    pub geometry: Geometry,
    /// Remaining feed attributes (`short_name`, `region_id`, ...), kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One normalized reading pushed into a bucket's `status` array.
///
/// Timestamps are stored as epoch milliseconds so that range filters and
/// `$min`/`$max` compare them numerically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    #[serde(with = "ts_milliseconds")]
    pub ts: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub last_reported: DateTime<Utc>,
    /// Feed-level version (epoch seconds) the reading arrived with.
    pub last_updated: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_bikes_available: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_docks_available: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A status entry together with the station it is routed to.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedStatus {
    pub station_id: String,
    pub entry: StatusEntry,
}

/// A persisted bucket of readings for one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusBucket {
    #[serde(rename = "_id")]
    pub id: String,
    pub station_id: String,
    pub bucket_size: u32,
    #[serde(with = "ts_milliseconds")]
    pub min_ts: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub max_ts: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub expire_on: DateTime<Utc>,
    #[serde(default)]
    pub status: Vec<StatusEntry>,
}

/// Last ingested version of a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedWatermark {
    #[serde(rename = "_id")]
    pub feed_id: String,
    #[serde(default)]
    pub last_updated: i64,
    #[serde(default)]
    pub ttl: i64,
}

impl FeedWatermark {
    /// Zero-valued watermark for a feed that was never ingested.
    pub fn unseen(feed_id: &str) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            last_updated: 0,
            ttl: 0,
        }
    }

    /// `true` when a feed version stamped `last_updated` has not been ingested yet.
    pub fn is_superseded_by(&self, last_updated: i64) -> bool {
        last_updated > self.last_updated
    }
}
