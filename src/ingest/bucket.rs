use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::error::{IngestError, StoreError};
use crate::model::NormalizedStatus;
use crate::store::{Collection, Filter, Update, WriteOp};

/// Readings per bucket document. At a 30 s refresh this is about one hour.
pub const BUCKET_CAPACITY: u32 = 120;
/// How long a bucket outlives its newest reading.
pub const RETENTION_HOURS: i64 = 72;

/// Capacity and retention bounds for status buckets.
///
/// The two are independent: a bucket can expire before it fills, or fill
/// long before it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketPolicy {
    pub capacity: u32,
    pub retention: Duration,
}

impl Default for BucketPolicy {
    fn default() -> Self {
        Self {
            capacity: BUCKET_CAPACITY,
            retention: Duration::hours(RETENTION_HOURS),
        }
    }
}

impl BucketPolicy {
    /// Upsert that appends `status` to the station's open bucket, opening a
    /// new one when every existing bucket is full.
    pub fn upsert(&self, status: &NormalizedStatus) -> Result<WriteOp, IngestError> {
        let ts = status.entry.ts;
        let expire_on = ts
            .checked_add_signed(self.retention)
            .ok_or_else(|| IngestError::InvalidField {
                field: "last_updated",
                reason: format!("{ts} plus retention overflows"),
            })?;

        Ok(WriteOp::UpdateOne {
            filter: Filter::all()
                .eq("station_id", status.station_id.as_str())
                .lt("bucket_size", self.capacity),
            update: Update::new()
                .push("status", serde_json::to_value(&status.entry)?)
                .max("max_ts", ts.timestamp_millis())
                .max("expire_on", expire_on.timestamp_millis())
                .min("min_ts", ts.timestamp_millis())
                .inc("bucket_size", 1),
            upsert: true,
        })
    }
}

/// Deletes buckets whose `expire_on` lies before `now`.
pub async fn purge_expired(status: &dyn Collection, now: DateTime<Utc>) -> Result<usize, StoreError> {
    let removed = status
        .delete_many(&Filter::all().lt("expire_on", now.timestamp_millis()))
        .await?;
    if removed > 0 {
        info!(removed, collection = status.name(), "Purged expired status buckets");
    }
    Ok(removed)
}
