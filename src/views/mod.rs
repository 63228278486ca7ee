//! Read side: aggregate views recomputed from persisted buckets on every call.

pub mod availability;
pub mod types;
pub mod utility;
pub mod utilization;

pub use availability::{latest_availability, load_availability};
pub use types::{AvailabilityRow, BikeAvailability, HourlyUtilization, UtilizationRow};
pub use utilization::{hourly_utilization, load_utilization, utilization_window, window_filter};

use std::collections::HashMap;

use crate::error::StoreError;
use crate::model::{StationRecord, StatusBucket};
use crate::store::{Collection, Filter, from_document};

/// Station metadata keyed by `_id`.
pub async fn load_stations(
    collection: &dyn Collection,
) -> Result<HashMap<String, StationRecord>, StoreError> {
    collection
        .find(&Filter::all())
        .await?
        .into_iter()
        .map(|doc| from_document::<StationRecord>(doc).map(|station| (station.id.clone(), station)))
        .collect()
}

/// Buckets matching `filter`, in insertion order.
pub async fn load_buckets(
    collection: &dyn Collection,
    filter: &Filter,
) -> Result<Vec<StatusBucket>, StoreError> {
    collection
        .find(filter)
        .await?
        .into_iter()
        .map(from_document)
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, MemoryStore, STATIONS, STATUS, to_document};
    use chrono::{TimeZone, Utc};

    async fn seed(store: &MemoryStore) {
        let stations: Vec<_> = [testing::station("72", 20), testing::station("79", 25)]
            .iter()
            .map(|s| to_document(s).unwrap())
            .collect();
        for doc in stations {
            store
                .collection(STATIONS)
                .bulk_write(&[crate::store::WriteOp::ReplaceOne {
                    filter: Filter::by_id(doc["_id"].clone()),
                    replacement: doc,
                    upsert: true,
                }])
                .await
                .unwrap();
        }

        let buckets = [
            testing::bucket("72", 0, &[(9_500, Some(5))]),
            testing::bucket("79", 0, &[(9_000, Some(10)), (9_500, Some(12)), (9_900, Some(9))]),
        ];
        for bucket in buckets {
            let doc = to_document(&bucket).unwrap();
            store
                .collection(STATUS)
                .bulk_write(&[crate::store::WriteOp::ReplaceOne {
                    filter: Filter::by_id(doc["_id"].clone()),
                    replacement: doc,
                    upsert: true,
                }])
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_views_read_from_store() {
        let store = MemoryStore::new();
        seed(&store).await;

        let availability = load_availability(&store).await.unwrap();
        assert_eq!(availability.len(), 2);
        assert_eq!(availability[0].station_availability, Some(25.0));
        assert_eq!(availability[1].station_availability, Some(36.0));

        let now = Utc.timestamp_opt(10_000, 0).unwrap();
        let utilization = load_utilization(&store, now).await.unwrap();
        assert_eq!(utilization.len(), 2);
        assert_eq!(utilization[0].utilization, None);
        assert_eq!(utilization[1].utilization, Some(10.0));
    }

    #[tokio::test]
    async fn test_malformed_bucket_is_an_encoding_error() {
        let store = MemoryStore::new();
        let mut doc = serde_json::Map::new();
        doc.insert("_id".into(), "broken".into());
        doc.insert("station_id".into(), "72".into());
        store
            .collection(STATUS)
            .bulk_write(&[crate::store::WriteOp::ReplaceOne {
                filter: Filter::by_id("broken"),
                replacement: doc,
                upsert: true,
            }])
            .await
            .unwrap();

        let err = load_availability(&store).await.unwrap_err();
        assert!(matches!(err, StoreError::Encoding(_)));
    }
}
