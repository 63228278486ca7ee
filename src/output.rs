//! Output formatting and persistence for reports and view rows.
//!
//! Supports JSON logging and CSV append.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// Logs any serializable value as pretty-printed JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Appends `rows` to a CSV file.
///
/// Creates the file with headers if it does not already exist. Returns the
/// number of rows written.
pub fn append_records<T, I>(path: &str, rows: I) -> Result<usize>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV records");

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    let mut written = 0;
    for row in rows {
        writer.serialize(row)?;
        written += 1;
    }
    writer.flush()?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Geometry;
    use crate::views::{BikeAvailability, UtilizationRow, HourlyUtilization, AvailabilityRow};
    use std::fs;

    fn availability(id: &str) -> BikeAvailability {
        BikeAvailability {
            station_id: id.to_string(),
            station_capacity: 20,
            station_bikes_available: Some(5),
            station_availability: Some(25.0),
            geometry: Geometry::point(-73.99, 40.76),
        }
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&[availability("72")]).unwrap();
    }

    #[test]
    fn test_append_records_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/availability.csv");
        let path = path.to_str().unwrap();

        let rows = [availability("72")];
        let written = append_records(path, rows.iter().map(AvailabilityRow::from)).unwrap();

        assert_eq!(written, 1);
        let content = fs::read_to_string(path).unwrap();
        assert!(content.starts_with("station_id,station_capacity"));
        assert!(content.contains("72,20,5,25.0,-73.99,40.76"));
    }

    #[test]
    fn test_append_records_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("availability.csv");
        let path = path.to_str().unwrap();

        let rows = [availability("72"), availability("79")];
        append_records(path, rows.iter().map(AvailabilityRow::from)).unwrap();
        append_records(path, rows.iter().map(AvailabilityRow::from)).unwrap();

        let content = fs::read_to_string(path).unwrap();
        let header_count = content.lines().filter(|l| l.starts_with("station_id")).count();
        assert_eq!(header_count, 1);
        // 1 header + 4 data rows
        assert_eq!(content.lines().count(), 5);
    }

    #[test]
    fn test_missing_utilization_is_an_empty_cell() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utilization.csv");
        let path = path.to_str().unwrap();

        let view = HourlyUtilization {
            station_id: "72".into(),
            name: "W 52 St".into(),
            geometry: Geometry::point(-73.99, 40.76),
            utilization: None,
        };
        append_records(path, [UtilizationRow::from(&view)]).unwrap();

        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().nth(1), Some("72,W 52 St,,-73.99,40.76"));
    }
}
