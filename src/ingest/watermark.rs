use std::sync::Arc;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::FeedWatermark;
use crate::store::{Collection, Filter, Update, from_document};

/// Per-feed `last_updated` bookkeeping in the `metadata` collection.
///
/// Writes are last-write-wins. Callers serialize ingestion per feed.
#[derive(Clone)]
pub struct WatermarkStore {
    collection: Arc<dyn Collection>,
}

impl WatermarkStore {
    pub fn new(collection: Arc<dyn Collection>) -> Self {
        Self { collection }
    }

    /// Stored watermark, or a zero-valued one if the feed was never ingested.
    pub async fn get_watermark(&self, feed_id: &str) -> Result<FeedWatermark, StoreError> {
        match self.collection.find_one(&Filter::by_id(feed_id)).await? {
            Some(doc) => from_document(doc),
            None => {
                debug!(feed_id, "No watermark stored yet");
                Ok(FeedWatermark::unseen(feed_id))
            }
        }
    }

    pub async fn set_watermark(&self, feed_id: &str, last_updated: i64) -> Result<(), StoreError> {
        self.write(feed_id, Update::new().set("last_updated", last_updated))
            .await?;
        info!(feed_id, last_updated, "Updated feed watermark");
        Ok(())
    }

    /// Like [`set_watermark`](Self::set_watermark), also recording the
    /// refresh interval the feed advertises.
    pub async fn set_watermark_with_ttl(
        &self,
        feed_id: &str,
        last_updated: i64,
        ttl: i64,
    ) -> Result<(), StoreError> {
        self.write(
            feed_id,
            Update::new()
                .set("last_updated", last_updated)
                .set("ttl", ttl),
        )
        .await?;
        info!(feed_id, last_updated, ttl, "Updated feed watermark");
        Ok(())
    }

    async fn write(&self, feed_id: &str, update: Update) -> Result<(), StoreError> {
        self.collection
            .upsert_one(&Filter::by_id(feed_id), &update)
            .await?;
        Ok(())
    }
}
