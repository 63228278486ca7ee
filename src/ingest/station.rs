use std::sync::Arc;
use tracing::info;

use super::IngestReport;
use super::batch::BatchWriter;
use crate::error::IngestError;
use crate::model::{RawRecord, StationRecord};
use crate::normalize::station_from_raw;
use crate::store::{Collection, Filter, WriteOp, to_document};

/// Replaces station metadata documents by `_id`.
pub struct StationIngest {
    stations: Arc<dyn Collection>,
    batch_size: usize,
}

impl StationIngest {
    pub fn new(stations: Arc<dyn Collection>, batch_size: usize) -> Self {
        Self {
            stations,
            batch_size,
        }
    }

    /// Upserts every record, replacing any previous document with the same
    /// `_id` wholesale. Running it twice with the same input leaves the
    /// collection unchanged.
    #[tracing::instrument(skip(self, stations), fields(records = stations.len()))]
    pub async fn ingest(&self, stations: Vec<StationRecord>) -> Result<IngestReport, IngestError> {
        if stations.is_empty() {
            info!("Empty station batch, nothing to do");
            return Ok(IngestReport::empty());
        }

        let ops = stations
            .iter()
            .map(|station| {
                Ok(WriteOp::ReplaceOne {
                    filter: Filter::by_id(station.id.as_str()),
                    replacement: to_document(station)?,
                    upsert: true,
                })
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        let mut writer = BatchWriter::new(self.stations.clone(), self.batch_size);
        for op in ops {
            writer.submit(op).await;
        }
        writer.finish().await;
        let writes = writer.into_summary();

        info!(
            records = stations.len(),
            written = writes.written,
            flushes = writes.flushes,
            "Station batch ingested"
        );
        Ok(IngestReport::from_writes(stations.len(), writes))
    }

    /// Normalizes GBFS `station_information` records, then ingests them.
    /// A single malformed record rejects the whole batch.
    pub async fn ingest_raw(&self, records: Vec<RawRecord>) -> Result<IngestReport, IngestError> {
        let stations = records
            .into_iter()
            .map(station_from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        self.ingest(stations).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestOutcome;
    use crate::model::Geometry;
    use crate::store::testing::ProbeCollection;
    use crate::store::from_document;
    use serde_json::{Map, Value, json};

    fn station(id: &str, name: &str, capacity: u32) -> StationRecord {
        StationRecord {
            id: id.to_string(),
            name: name.to_string(),
            capacity,
            geometry: Geometry::point(-73.99, 40.76),
            extra: Map::new(),
        }
    }

    fn stored(collection: &ProbeCollection) -> Vec<StationRecord> {
        collection
            .inner
            .snapshot()
            .into_iter()
            .map(|doc| from_document(doc).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent() {
        let collection = Arc::new(ProbeCollection::new("stations"));
        let pipeline = StationIngest::new(collection.clone(), 100);
        let batch = vec![station("72", "W 52 St", 55), station("79", "Franklin St", 33)];

        pipeline.ingest(batch.clone()).await.unwrap();
        pipeline.ingest(batch.clone()).await.unwrap();

        assert_eq!(stored(&collection), batch);
    }

    #[tokio::test]
    async fn test_reingest_replaces_document() {
        let collection = Arc::new(ProbeCollection::new("stations"));
        let pipeline = StationIngest::new(collection.clone(), 100);
        let mut first = station("72", "W 52 St", 55);
        first.extra.insert("region_id".into(), json!("71"));

        pipeline.ingest(vec![first]).await.unwrap();
        pipeline
            .ingest(vec![station("72", "W 52 St & 11 Av", 60)])
            .await
            .unwrap();

        let docs = stored(&collection);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "W 52 St & 11 Av");
        assert_eq!(docs[0].capacity, 60);
        assert!(docs[0].extra.is_empty());
    }

    #[tokio::test]
    async fn test_batches_follow_batch_size() {
        let collection = Arc::new(ProbeCollection::new("stations"));
        let batch: Vec<_> = (0..5).map(|i| station(&i.to_string(), "s", 1)).collect();

        let report = StationIngest::new(collection.clone(), 2)
            .ingest(batch)
            .await
            .unwrap();

        assert_eq!(collection.calls(), 3);
        assert_eq!(report.outcome, IngestOutcome::Ingested);
        assert_eq!(report.writes.written, 5);
    }

    #[tokio::test]
    async fn test_empty_input_writes_nothing() {
        let collection = Arc::new(ProbeCollection::new("stations"));
        let report = StationIngest::new(collection.clone(), 2)
            .ingest(vec![])
            .await
            .unwrap();
        assert_eq!(report.outcome, IngestOutcome::Empty);
        assert_eq!(collection.calls(), 0);
    }

    #[tokio::test]
    async fn test_ingest_raw_rejects_batch_with_bad_record() {
        let collection = Arc::new(ProbeCollection::new("stations"));
        let good = json!({"station_id": "72", "name": "a", "lon": -73.9, "lat": 40.7});
        let bad = json!({"station_id": "79", "name": "b", "lon": -73.9});
        let records = [good, bad]
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => map,
                _ => unreachable!(),
            })
            .collect();

        let err = StationIngest::new(collection.clone(), 10)
            .ingest_raw(records)
            .await
            .unwrap_err();

        assert!(err.is_format());
        assert_eq!(collection.calls(), 0);
    }
}
