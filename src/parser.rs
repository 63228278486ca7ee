//! JSON parser for GBFS feed envelopes.

use serde::Deserialize;
use serde_json::Value;

use crate::error::IngestError;
use crate::model::RawRecord;

#[derive(Debug, Deserialize)]
struct Envelope {
    last_updated: i64,
    #[serde(default)]
    ttl: i64,
    data: Option<Value>,
}

/// The station list of one GBFS document plus its feed-level version.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    pub last_updated: i64,
    pub ttl: i64,
    pub stations: Vec<RawRecord>,
}

impl FeedSnapshot {
    /// Status records stamped with the envelope's `last_updated`, which GBFS
    /// only carries at document level.
    pub fn into_status_snapshots(self) -> Vec<RawRecord> {
        let last_updated = Value::from(self.last_updated);
        self.stations
            .into_iter()
            .map(|mut station| {
                station.insert("last_updated".to_string(), last_updated.clone());
                station
            })
            .collect()
    }
}

/// Decodes a GBFS `station_information` or `station_status` document.
///
/// # Errors
///
/// Returns [`IngestError::Feed`] if the bytes are not JSON or the document
/// lacks `data` or `data.stations`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedSnapshot, IngestError> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|e| IngestError::Feed(e.to_string()))?;

    let mut data = match envelope.data {
        Some(Value::Object(data)) => data,
        _ => return Err(IngestError::Feed("missing \"data\"".to_string())),
    };

    let stations = match data.remove("stations") {
        Some(Value::Array(stations)) => stations
            .into_iter()
            .map(|station| match station {
                Value::Object(record) => Ok(record),
                other => Err(IngestError::Feed(format!(
                    "station entry is not an object: {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(IngestError::Feed("missing \"data.stations\"".to_string())),
    };

    Ok(FeedSnapshot {
        last_updated: envelope.last_updated,
        ttl: envelope.ttl,
        stations,
    })
}
