use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::StoreError;
use crate::store::{Collection, WriteOp};

/// Running totals for one invocation's flushes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    /// Bulk writes submitted to the store.
    pub flushes: usize,
    /// Operations the store accepted.
    pub written: usize,
    /// Bulk writes that came back with an error.
    pub failed_flushes: usize,
    pub errors: Vec<String>,
}

impl WriteSummary {
    pub fn is_clean(&self) -> bool {
        self.failed_flushes == 0
    }
}

/// Accumulates write operations and submits them to one collection in
/// groups of at most `batch_size`.
///
/// A failed flush is reported and the pending operations are dropped
/// anyway; nothing is retried. Re-ingesting the next feed refresh converges
/// to the same state.
pub struct BatchWriter {
    collection: Arc<dyn Collection>,
    batch_size: usize,
    pending: Vec<WriteOp>,
    summary: WriteSummary,
}

impl BatchWriter {
    pub fn new(collection: Arc<dyn Collection>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            collection,
            batch_size,
            pending: Vec::with_capacity(batch_size),
            summary: WriteSummary::default(),
        }
    }

    pub fn push(&mut self, op: WriteOp) {
        self.pending.push(op);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn summary(&self) -> &WriteSummary {
        &self.summary
    }

    pub fn into_summary(self) -> WriteSummary {
        self.summary
    }

    /// Submits the accumulated operations as one bulk write.
    ///
    /// With `require_full_batch` the flush only happens once `batch_size`
    /// operations are pending; otherwise whatever remains is written. Returns
    /// the number of operations written (0 when nothing was due).
    pub async fn flush(&mut self, require_full_batch: bool) -> Result<usize, StoreError> {
        if self.pending.is_empty() || (require_full_batch && self.pending.len() < self.batch_size)
        {
            return Ok(0);
        }

        let ops = std::mem::take(&mut self.pending);
        self.summary.flushes += 1;

        match self.collection.bulk_write(&ops).await {
            Ok(result) => {
                let written = result.applied();
                self.summary.written += written;
                info!(
                    written,
                    upserted = result.upserted,
                    collection = self.collection.name(),
                    "Wrote batch"
                );
                Ok(written)
            }
            Err(e) => {
                let written = e.applied();
                self.summary.written += written;
                self.summary.failed_flushes += 1;
                self.summary.errors.push(e.to_string());
                error!(
                    error = %e,
                    attempted = ops.len(),
                    written,
                    collection = self.collection.name(),
                    "Batch write failed"
                );
                Err(e)
            }
        }
    }

    /// Queues `op` and flushes if a full batch is pending. Flush errors are
    /// already recorded in the summary and logged, so they are not returned.
    pub async fn submit(&mut self, op: WriteOp) {
        self.push(op);
        if let Err(e) = self.flush(true).await {
            debug!(error = %e, "Continuing after failed batch");
        }
    }

    /// Writes the trailing partial batch.
    pub async fn finish(&mut self) {
        if let Err(e) = self.flush(false).await {
            debug!(error = %e, "Final batch failed");
        }
    }
}
