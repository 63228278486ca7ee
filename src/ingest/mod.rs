//! Write side: watermarks, bucketing and the two ingestion pipelines.

pub mod batch;
pub mod bucket;
pub mod station;
pub mod status;
pub mod watermark;

pub use batch::{BatchWriter, WriteSummary};
pub use bucket::{BUCKET_CAPACITY, BucketPolicy, RETENTION_HOURS, purge_expired};
pub use station::StationIngest;
pub use status::{StatusIngest, WatermarkPolicy};
pub use watermark::WatermarkStore;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// The batch held no records.
    Empty,
    /// The feed version was already ingested.
    Unchanged,
    Ingested,
    /// At least one flush failed; see `writes.errors`.
    Partial,
}

/// What one pipeline invocation did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub outcome: IngestOutcome,
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
    pub watermark_advanced: bool,
    pub writes: WriteSummary,
}

impl IngestReport {
    pub fn empty() -> Self {
        Self {
            outcome: IngestOutcome::Empty,
            records: 0,
            last_updated: None,
            watermark_advanced: false,
            writes: WriteSummary::default(),
        }
    }

    pub(crate) fn from_writes(records: usize, writes: WriteSummary) -> Self {
        Self {
            outcome: if writes.is_clean() {
                IngestOutcome::Ingested
            } else {
                IngestOutcome::Partial
            },
            records,
            last_updated: None,
            watermark_advanced: false,
            writes,
        }
    }

    /// Folds `other` into `self`, e.g. the per-message reports of one relay run.
    pub fn absorb(&mut self, other: IngestReport) {
        self.records += other.records;
        self.watermark_advanced |= other.watermark_advanced;
        self.last_updated = self.last_updated.max(other.last_updated);
        self.writes.flushes += other.writes.flushes;
        self.writes.written += other.writes.written;
        self.writes.failed_flushes += other.writes.failed_flushes;
        self.writes.errors.extend(other.writes.errors);
        self.outcome = match (self.outcome, other.outcome) {
            (IngestOutcome::Partial, _) | (_, IngestOutcome::Partial) => IngestOutcome::Partial,
            (IngestOutcome::Ingested, _) | (_, IngestOutcome::Ingested) => IngestOutcome::Ingested,
            (IngestOutcome::Unchanged, _) | (_, IngestOutcome::Unchanged) => {
                IngestOutcome::Unchanged
            }
            _ => IngestOutcome::Empty,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_keeps_worst_outcome() {
        let mut total = IngestReport::empty();
        total.absorb(IngestReport::from_writes(
            2,
            WriteSummary {
                flushes: 1,
                written: 2,
                ..WriteSummary::default()
            },
        ));
        assert_eq!(total.outcome, IngestOutcome::Ingested);

        total.absorb(IngestReport::from_writes(
            3,
            WriteSummary {
                flushes: 1,
                written: 0,
                failed_flushes: 1,
                errors: vec!["boom".into()],
            },
        ));
        assert_eq!(total.outcome, IngestOutcome::Partial);
        assert_eq!(total.records, 5);
        assert_eq!(total.writes.written, 2);
        assert_eq!(total.writes.errors, vec!["boom".to_string()]);
    }
}
