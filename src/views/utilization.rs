use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};

use super::types::HourlyUtilization;
use super::utility::{abs_deltas, mean, pct_of_capacity};
use super::{load_buckets, load_stations};
use crate::error::StoreError;
use crate::model::{StationRecord, StatusBucket};
use crate::store::{DocumentStore, Filter, STATIONS, STATUS};

/// Width of the utilization window.
pub const UTILIZATION_WINDOW_MINUTES: i64 = 60;

pub fn utilization_window() -> Duration {
    Duration::minutes(UTILIZATION_WINDOW_MINUTES)
}

/// Buckets that may hold readings from `(now - window, now]`.
pub fn window_filter(now: DateTime<Utc>, window: Duration) -> Filter {
    Filter::all()
        .lte("min_ts", now.timestamp_millis())
        .gte("max_ts", (now - window).timestamp_millis())
}

/// Mean absolute change in available bikes between consecutive readings of
/// the last `window`, as a percentage of station capacity.
///
/// Readings are compared in arrival order across the station's buckets. A
/// reading without a bike count voids the deltas on either side of it.
/// Stations with no reading inside the window get no row.
pub fn hourly_utilization(
    buckets: Vec<StatusBucket>,
    stations: &HashMap<String, StationRecord>,
    now: DateTime<Utc>,
    window: Duration,
) -> Vec<HourlyUtilization> {
    let since = now - window;

    let mut readings: BTreeMap<String, Vec<Option<i64>>> = BTreeMap::new();
    for bucket in buckets {
        if bucket.min_ts > now || bucket.max_ts < since {
            continue;
        }
        let in_window: Vec<_> = bucket
            .status
            .iter()
            .filter(|entry| entry.ts >= since && entry.ts <= now)
            .map(|entry| entry.num_bikes_available)
            .collect();
        if in_window.is_empty() {
            continue;
        }
        readings
            .entry(bucket.station_id)
            .or_default()
            .extend(in_window);
    }

    readings
        .into_iter()
        .filter_map(|(station_id, series)| {
            let station = stations.get(&station_id)?;
            let utilization = match station.capacity {
                0 => Some(0.0),
                capacity => mean(&abs_deltas(&series)).map(|avg| pct_of_capacity(avg, capacity)),
            };
            Some(HourlyUtilization {
                station_id,
                name: station.name.clone(),
                geometry: station.geometry.clone(),
                utilization,
            })
        })
        .collect()
}

/// Recomputes the utilization view for the hour before `now`.
pub async fn load_utilization(
    store: &dyn DocumentStore,
    now: DateTime<Utc>,
) -> Result<Vec<HourlyUtilization>, StoreError> {
    let window = utilization_window();
    let filter = window_filter(now, window);
    let buckets = load_buckets(store.collection(STATUS).as_ref(), &filter).await?;
    let stations = load_stations(store.collection(STATIONS).as_ref()).await?;
    Ok(hourly_utilization(buckets, &stations, now, window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::testing::{bucket, station, stations_by_id};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(10_000, 0).unwrap()
    }

    #[test]
    fn test_mean_delta_over_capacity() {
        let stations = stations_by_id(vec![station("72", 25)]);
        let buckets = vec![bucket(
            "72",
            0,
            &[(9_000, Some(10)), (9_500, Some(12)), (9_900, Some(9))],
        )];

        let view = hourly_utilization(buckets, &stations, now(), utilization_window());
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].utilization, Some(10.0));
        assert_eq!(view[0].name, "Station 72");
    }

    #[test]
    fn test_readings_outside_window_are_ignored() {
        let stations = stations_by_id(vec![station("72", 10)]);
        let buckets = vec![bucket(
            "72",
            0,
            &[(1_000, Some(0)), (7_000, Some(4)), (8_000, Some(6)), (10_500, Some(0))],
        )];

        let view = hourly_utilization(buckets, &stations, now(), utilization_window());
        assert_eq!(view[0].utilization, Some(20.0));
    }

    #[test]
    fn test_readings_span_buckets() {
        let stations = stations_by_id(vec![station("72", 10)]);
        let buckets = vec![
            bucket("72", 0, &[(7_000, Some(1))]),
            bucket("72", 1, &[(8_000, Some(4))]),
        ];

        let view = hourly_utilization(buckets, &stations, now(), utilization_window());
        assert_eq!(view[0].utilization, Some(30.0));
    }

    #[test]
    fn test_single_reading_has_no_utilization() {
        let stations = stations_by_id(vec![station("72", 10), station("79", 0)]);
        let buckets = vec![
            bucket("72", 0, &[(9_000, Some(3))]),
            bucket("79", 0, &[(9_000, Some(3)), (9_100, Some(1))]),
        ];

        let view = hourly_utilization(buckets, &stations, now(), utilization_window());
        assert_eq!(view[0].utilization, None);
        assert_eq!(view[1].utilization, Some(0.0));
    }

    #[test]
    fn test_station_without_readings_in_window_has_no_row() {
        let stations = stations_by_id(vec![station("72", 10), station("79", 0)]);
        let buckets = vec![
            bucket("72", 0, &[(5_000, Some(3)), (10_500, Some(7))]),
            bucket("79", 0, &[(5_000, Some(3)), (10_500, Some(1))]),
        ];

        let view = hourly_utilization(buckets, &stations, now(), utilization_window());
        assert!(view.is_empty());
    }

    #[test]
    fn test_missing_bike_count_voids_adjacent_deltas() {
        let stations = stations_by_id(vec![station("72", 10)]);
        let buckets = vec![bucket(
            "72",
            0,
            &[(7_000, Some(1)), (8_000, None), (9_000, Some(5)), (9_500, Some(7))],
        )];

        let view = hourly_utilization(buckets, &stations, now(), utilization_window());
        assert_eq!(view[0].utilization, Some(20.0));
    }

    #[test]
    fn test_window_filter_bounds() {
        let filter = window_filter(now(), utilization_window());
        assert_eq!(
            filter,
            Filter::all()
                .lte("min_ts", 10_000_000i64)
                .gte("max_ts", 6_400_000i64)
        );
    }
}
