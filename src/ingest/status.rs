use std::sync::Arc;
use tracing::{info, warn};

use super::batch::BatchWriter;
use super::bucket::BucketPolicy;
use super::watermark::WatermarkStore;
use super::{IngestOutcome, IngestReport};
use crate::error::IngestError;
use crate::model::RawRecord;
use crate::normalize::normalize_status;
use crate::store::Collection;

/// Whether a batch with failed bucket writes may still advance the watermark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatermarkPolicy {
    /// Advance regardless of flush failures. Failed readings are lost until
    /// the next feed version arrives.
    #[default]
    Lenient,
    /// Leave the watermark untouched unless every flush succeeded, so the
    /// same feed version is ingested again on the next run.
    RequireCleanBatch,
}

/// Merges status snapshots of one feed into per-station buckets.
pub struct StatusIngest {
    buckets: Arc<dyn Collection>,
    watermarks: WatermarkStore,
    batch_size: usize,
    policy: BucketPolicy,
    watermark_policy: WatermarkPolicy,
    skip_seen: bool,
}

impl StatusIngest {
    pub fn new(buckets: Arc<dyn Collection>, watermarks: WatermarkStore, batch_size: usize) -> Self {
        Self {
            buckets,
            watermarks,
            batch_size,
            policy: BucketPolicy::default(),
            watermark_policy: WatermarkPolicy::default(),
            skip_seen: true,
        }
    }

    pub fn with_bucket_policy(mut self, policy: BucketPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_watermark_policy(mut self, watermark_policy: WatermarkPolicy) -> Self {
        self.watermark_policy = watermark_policy;
        self
    }

    /// Disables the "already ingested" check, for transports whose messages
    /// do not carry a trustworthy feed version.
    pub fn ingest_seen_versions(mut self) -> Self {
        self.skip_seen = false;
        self
    }

    /// Ingests one batch of raw snapshots from `feed_id`.
    ///
    /// Every snapshot is normalized before anything is written, so a
    /// malformed record aborts the batch untouched. All snapshots of a batch
    /// share the feed's `last_updated`; the first one's value becomes the new
    /// watermark.
    ///
    /// # Errors
    ///
    /// Format errors for malformed records, store errors from reading or
    /// writing the watermark. Bucket flush failures are reported in the
    /// returned [`IngestReport`] instead.
    #[tracing::instrument(skip(self, snapshots), fields(records = snapshots.len()))]
    pub async fn ingest(
        &self,
        feed_id: &str,
        snapshots: Vec<RawRecord>,
    ) -> Result<IngestReport, IngestError> {
        if snapshots.is_empty() {
            info!("Empty status batch, nothing to do");
            return Ok(IngestReport::empty());
        }

        let normalized = snapshots
            .into_iter()
            .map(normalize_status)
            .collect::<Result<Vec<_>, _>>()?;
        let last_updated = normalized[0].entry.last_updated;

        if self.skip_seen {
            let watermark = self.watermarks.get_watermark(feed_id).await?;
            if !watermark.is_superseded_by(last_updated) {
                info!(
                    last_updated,
                    watermark = watermark.last_updated,
                    "Feed version already ingested, skipping"
                );
                return Ok(IngestReport {
                    outcome: IngestOutcome::Unchanged,
                    records: normalized.len(),
                    last_updated: Some(last_updated),
                    ..IngestReport::empty()
                });
            }
        }

        let ops = normalized
            .iter()
            .map(|status| self.policy.upsert(status))
            .collect::<Result<Vec<_>, _>>()?;

        let mut writer = BatchWriter::new(self.buckets.clone(), self.batch_size);
        for op in ops {
            writer.submit(op).await;
        }
        writer.finish().await;
        let writes = writer.into_summary();

        let advance = match self.watermark_policy {
            WatermarkPolicy::Lenient => true,
            WatermarkPolicy::RequireCleanBatch => writes.is_clean(),
        };
        if advance {
            self.watermarks.set_watermark(feed_id, last_updated).await?;
        } else {
            warn!(
                failed_flushes = writes.failed_flushes,
                last_updated, "Bucket writes failed, keeping previous watermark"
            );
        }
        if !writes.is_clean() && advance {
            warn!(
                failed_flushes = writes.failed_flushes,
                "Watermark advanced although some bucket writes failed"
            );
        }

        info!(
            records = normalized.len(),
            written = writes.written,
            flushes = writes.flushes,
            "Status batch ingested"
        );

        Ok(IngestReport {
            outcome: if writes.is_clean() {
                IngestOutcome::Ingested
            } else {
                IngestOutcome::Partial
            },
            records: normalized.len(),
            last_updated: Some(last_updated),
            watermark_advanced: advance,
            writes,
        })
    }
}
