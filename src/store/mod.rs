//! Document-store abstraction the pipelines write through.
//!
//! [`Collection`] is the seam between the ingestion core and a concrete
//! backend. [`MemoryStore`] keeps documents in process; [`SqliteStore`]
//! persists them as JSON rows in a single SQLite file.

mod memory;
mod query;
mod sqlite;

pub use memory::{MemoryCollection, MemoryStore};
pub use query::{BulkWriteSummary, Condition, Document, Filter, Update, WriteOp};
pub use sqlite::{SqliteCollection, SqliteStore};

use crate::error::StoreError;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Station metadata, one document per station `_id`.
pub const STATIONS: &str = "stations";
/// Bucketed status readings.
pub const STATUS: &str = "status";
/// Feed watermarks.
pub const METADATA: &str = "metadata";

/// A named set of documents supporting atomic per-document filter+update.
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    /// All documents matching `filter`, in insertion order.
    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    async fn find_one(&self, filter: &Filter) -> Result<Option<Document>, StoreError> {
        Ok(self.find(filter).await?.into_iter().next())
    }

    /// Applies `ops` in order, stopping at the first rejected operation.
    /// Operations before the failure stay committed.
    async fn bulk_write(&self, ops: &[WriteOp]) -> Result<BulkWriteSummary, StoreError>;

    async fn upsert_one(
        &self,
        filter: &Filter,
        update: &Update,
    ) -> Result<BulkWriteSummary, StoreError> {
        let op = WriteOp::UpdateOne {
            filter: filter.clone(),
            update: update.clone(),
            upsert: true,
        };
        self.bulk_write(std::slice::from_ref(&op)).await
    }

    /// Removes every matching document and returns how many were removed.
    async fn delete_many(&self, filter: &Filter) -> Result<usize, StoreError>;
}

/// Hands out collections by name.
pub trait DocumentStore: Send + Sync {
    fn collection(&self, name: &str) -> Arc<dyn Collection>;
}

/// Serializes a typed record into a [`Document`].
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(doc) => Ok(doc),
        other => Err(StoreError::Rejected {
            collection: String::new(),
            message: format!("expected an object, got `{other}`"),
        }),
    }
}

/// Deserializes a stored [`Document`] into a typed record.
pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}
