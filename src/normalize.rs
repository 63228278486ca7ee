//! Pure transforms from raw feed records to the shapes the pipelines store.
//!
//! Nothing here touches the store, so every function can be tested with
//! plain JSON fixtures.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::IngestError;
use crate::model::{Geometry, NormalizedStatus, RawRecord, StationRecord, StatusEntry};

/// Builds a GeoJSON point from feed coordinates.
///
/// # Errors
///
/// Returns [`IngestError::InvalidField`] for coordinates outside WGS84 bounds.
pub fn geometry_from_lon_lat(lon: f64, lat: f64) -> Result<Geometry, IngestError> {
    if !(-180.0..=180.0).contains(&lon) {
        return Err(IngestError::InvalidField {
            field: "lon",
            reason: format!("{lon} is outside [-180, 180]"),
        });
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(IngestError::InvalidField {
            field: "lat",
            reason: format!("{lat} is outside [-90, 90]"),
        });
    }
    Ok(Geometry::point(lon, lat))
}

/// Turns a GBFS `station_information` record into a [`StationRecord`]:
/// `station_id` becomes `_id` and `lon`/`lat` become a GeoJSON point.
pub fn station_from_raw(mut raw: RawRecord) -> Result<StationRecord, IngestError> {
    raw.remove("action");
    let id = take_id(&mut raw, "station_id")?;
    let lon = take_f64(&mut raw, "lon")?;
    let lat = take_f64(&mut raw, "lat")?;
    let name = match raw.remove("name") {
        Some(Value::String(name)) => name,
        Some(other) => {
            return Err(IngestError::InvalidField {
                field: "name",
                reason: format!("expected a string, got {other}"),
            });
        }
        None => return Err(IngestError::MissingField("name")),
    };
    let capacity = match raw.remove("capacity") {
        None | Some(Value::Null) => 0,
        Some(value) => value
            .as_u64()
            .and_then(|c| u32::try_from(c).ok())
            .ok_or_else(|| IngestError::InvalidField {
                field: "capacity",
                reason: format!("expected a non-negative integer, got {value}"),
            })?,
    };

    Ok(StationRecord {
        id,
        name,
        capacity,
        geometry: geometry_from_lon_lat(lon, lat)?,
        extra: raw,
    })
}

/// Prepares one status snapshot for bucketing: the station id is taken out
/// as the routing key and both epoch-second timestamps are converted.
pub fn normalize_status(mut raw: RawRecord) -> Result<NormalizedStatus, IngestError> {
    for transient in ["action", "_id", "ts"] {
        raw.remove(transient);
    }

    let station_id = take_id(&mut raw, "station_id")?;
    let last_updated = take_epoch(&mut raw, "last_updated")?;
    let last_reported = take_epoch(&mut raw, "last_reported")?;
    let num_bikes_available = take_count(&mut raw, "num_bikes_available")?;
    let num_docks_available = take_count(&mut raw, "num_docks_available")?;

    Ok(NormalizedStatus {
        station_id,
        entry: StatusEntry {
            ts: epoch_to_datetime("last_updated", last_updated)?,
            last_reported: epoch_to_datetime("last_reported", last_reported)?,
            last_updated,
            num_bikes_available,
            num_docks_available,
            extra: raw,
        },
    })
}

/// Splits a full-refresh message (station information with the station's
/// status nested under `status`) into `(station, status)` records.
pub fn split_full_refresh(mut raw: RawRecord) -> Result<(RawRecord, RawRecord), IngestError> {
    raw.remove("action");
    let mut status = match raw.remove("status") {
        Some(Value::Object(status)) => status,
        Some(other) => {
            return Err(IngestError::InvalidField {
                field: "status",
                reason: format!("expected an object, got {other}"),
            });
        }
        None => return Err(IngestError::MissingField("status")),
    };
    status.remove("action");
    if !status.contains_key("station_id") {
        if let Some(id) = raw.get("station_id") {
            status.insert("station_id".to_string(), id.clone());
        }
    }
    Ok((raw, status))
}

fn take_id(raw: &mut RawRecord, field: &'static str) -> Result<String, IngestError> {
    match raw.remove(field) {
        Some(Value::String(id)) if !id.is_empty() => Ok(id),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(IngestError::InvalidField {
            field,
            reason: format!("expected a non-empty identifier, got {other}"),
        }),
        None => Err(IngestError::MissingField(field)),
    }
}

fn take_f64(raw: &mut RawRecord, field: &'static str) -> Result<f64, IngestError> {
    match raw.remove(field) {
        Some(value) => value.as_f64().ok_or_else(|| IngestError::InvalidField {
            field,
            reason: format!("expected a number, got {value}"),
        }),
        None => Err(IngestError::MissingField(field)),
    }
}

fn take_epoch(raw: &mut RawRecord, field: &'static str) -> Result<i64, IngestError> {
    let value = raw.remove(field).ok_or(IngestError::MissingField(field))?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|secs| secs.floor() as i64))
        .ok_or_else(|| IngestError::InvalidField {
            field,
            reason: format!("expected epoch seconds, got {value}"),
        })
}

fn take_count(raw: &mut RawRecord, field: &'static str) -> Result<Option<i64>, IngestError> {
    match raw.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| IngestError::InvalidField {
            field,
            reason: format!("expected an integer, got {value}"),
        }),
    }
}

fn epoch_to_datetime(field: &'static str, secs: i64) -> Result<DateTime<Utc>, IngestError> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| IngestError::InvalidField {
        field,
        reason: format!("{secs} is not a representable timestamp"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn test_station_from_raw() {
        let station = station_from_raw(raw(json!({
            "station_id": "72",
            "name": "W 52 St & 11 Av",
            "short_name": "6926.01",
            "lat": 40.76727216,
            "lon": -73.99392888,
            "capacity": 55,
            "action": "refreshStation"
        })))
        .unwrap();

        assert_eq!(station.id, "72");
        assert_eq!(station.capacity, 55);
        assert_eq!(station.geometry, Geometry::point(-73.99392888, 40.76727216));
        assert_eq!(station.extra.get("short_name"), Some(&json!("6926.01")));
        assert!(!station.extra.contains_key("action"));
        assert!(!station.extra.contains_key("lat"));
    }

    #[test]
    fn test_station_without_coordinates_is_rejected() {
        let err = station_from_raw(raw(json!({"station_id": "72", "name": "x", "lon": 1.0})))
            .unwrap_err();
        assert!(matches!(err, IngestError::MissingField("lat")));
    }

    #[test]
    fn test_negative_capacity_is_rejected() {
        let err = station_from_raw(raw(json!({
            "station_id": "72", "name": "x", "lon": 1.0, "lat": 1.0, "capacity": -3
        })))
        .unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn test_geometry_bounds() {
        assert!(geometry_from_lon_lat(-73.9, 40.7).is_ok());
        assert!(geometry_from_lon_lat(200.0, 40.7).is_err());
        assert!(geometry_from_lon_lat(-73.9, 95.0).is_err());
    }

    #[test]
    fn test_normalize_status() {
        let normalized = normalize_status(raw(json!({
            "station_id": "72",
            "num_bikes_available": 5,
            "num_docks_available": 50,
            "is_renting": 1,
            "last_reported": 1_600_000_000,
            "last_updated": 1_600_000_030
        })))
        .unwrap();

        assert_eq!(normalized.station_id, "72");
        let entry = normalized.entry;
        assert_eq!(entry.ts.timestamp(), 1_600_000_030);
        assert_eq!(entry.last_reported.timestamp(), 1_600_000_000);
        assert_eq!(entry.num_bikes_available, Some(5));
        assert_eq!(entry.extra.get("is_renting"), Some(&json!(1)));
        assert!(!entry.extra.contains_key("station_id"));
    }

    #[test]
    fn test_numeric_station_id_is_stringified() {
        let normalized = normalize_status(raw(json!({
            "station_id": 72, "last_reported": 1, "last_updated": 2
        })))
        .unwrap();
        assert_eq!(normalized.station_id, "72");
    }

    #[test]
    fn test_status_without_last_updated_is_rejected() {
        let err = normalize_status(raw(json!({"station_id": "72", "last_reported": 1})))
            .unwrap_err();
        assert!(matches!(err, IngestError::MissingField("last_updated")));
    }

    #[test]
    fn test_split_full_refresh() {
        let (station, status) = split_full_refresh(raw(json!({
            "station_id": "72",
            "name": "W 52 St & 11 Av",
            "action": "fullRefresh",
            "status": {
                "num_bikes_available": 5,
                "last_reported": 1,
                "last_updated": 2,
                "action": "refreshStatus"
            }
        })))
        .unwrap();

        assert!(!station.contains_key("status"));
        assert!(!station.contains_key("action"));
        assert_eq!(status.get("station_id"), Some(&json!("72")));
        assert!(!status.contains_key("action"));
    }

    #[test]
    fn test_split_full_refresh_requires_status() {
        let err = split_full_refresh(raw(json!({"station_id": "72"}))).unwrap_err();
        assert!(matches!(err, IngestError::MissingField("status")));
    }
}
