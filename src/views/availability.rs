use std::collections::{BTreeMap, HashMap};

use super::types::BikeAvailability;
use super::utility::pct_of_capacity;
use super::{load_buckets, load_stations};
use crate::error::StoreError;
use crate::model::{StationRecord, StatusBucket};
use crate::store::{DocumentStore, Filter, STATIONS, STATUS};

/// Newest bike count per station joined with the station's capacity.
///
/// Buckets are ordered by `(station_id, min_ts, max_ts)`; the last reading
/// of each station's last bucket that reports `num_bikes_available` wins.
/// Stations without metadata are left out.
pub fn latest_availability(
    mut buckets: Vec<StatusBucket>,
    stations: &HashMap<String, StationRecord>,
) -> Vec<BikeAvailability> {
    buckets.sort_by(|a, b| {
        (&a.station_id, a.min_ts, a.max_ts).cmp(&(&b.station_id, b.min_ts, b.max_ts))
    });

    let mut latest: BTreeMap<String, Option<i64>> = BTreeMap::new();
    for bucket in buckets {
        let bikes = bucket
            .status
            .iter()
            .rev()
            .find_map(|entry| entry.num_bikes_available);
        latest.insert(bucket.station_id, bikes);
    }

    latest
        .into_iter()
        .filter_map(|(station_id, bikes)| {
            let station = stations.get(&station_id)?;
            let station_availability = match (station.capacity, bikes) {
                (0, _) => Some(0.0),
                (capacity, Some(bikes)) => Some(pct_of_capacity(bikes as f64, capacity)),
                (_, None) => None,
            };
            Some(BikeAvailability {
                station_id,
                station_capacity: station.capacity,
                station_bikes_available: bikes,
                station_availability,
                geometry: station.geometry.clone(),
            })
        })
        .collect()
}

/// Recomputes the availability view from the `status` and `stations` collections.
pub async fn load_availability(
    store: &dyn DocumentStore,
) -> Result<Vec<BikeAvailability>, StoreError> {
    let stations = load_stations(store.collection(STATIONS).as_ref()).await?;
    let buckets = load_buckets(store.collection(STATUS).as_ref(), &Filter::all()).await?;
    Ok(latest_availability(buckets, &stations))
}
