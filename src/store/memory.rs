use super::query::{WriteEffect, id_key};
use super::{BulkWriteSummary, Collection, Document, DocumentStore, Filter, WriteOp};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-process collection. The mutex makes every filter+update atomic.
#[derive(Debug)]
pub struct MemoryCollection {
    name: String,
    docs: Mutex<Vec<Document>>,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docs: Mutex::new(Vec::new()),
        }
    }

    /// Copy of the current contents, in insertion order.
    pub fn snapshot(&self) -> Vec<Document> {
        self.docs.lock().map(|docs| docs.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Document>>, StoreError> {
        self.docs
            .lock()
            .map_err(|_| StoreError::Poisoned(self.name.clone()))
    }

    fn apply(docs: &mut Vec<Document>, op: &WriteOp) -> Result<WriteEffect, String> {
        let position = docs.iter().position(|doc| op.filter().matches(doc));
        let effect = op.execute(position.map(|i| &docs[i]))?;

        match (position, &effect) {
            (Some(i), WriteEffect::Modified(next)) => docs[i] = next.clone(),
            (_, WriteEffect::Inserted(next)) => {
                let key = id_key(next);
                if docs.iter().any(|doc| id_key(doc) == key) {
                    return Err(format!("duplicate key `{}`", key.unwrap_or_default()));
                }
                docs.push(next.clone());
            }
            _ => {}
        }

        Ok(effect)
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let docs = self.lock()?;
        Ok(docs.iter().filter(|doc| filter.matches(doc)).cloned().collect())
    }

    async fn bulk_write(&self, ops: &[WriteOp]) -> Result<BulkWriteSummary, StoreError> {
        let mut docs = self.lock()?;
        let mut summary = BulkWriteSummary::default();

        for (index, op) in ops.iter().enumerate() {
            match Self::apply(&mut docs, op) {
                Ok(effect) => summary.record(&effect),
                Err(message) => {
                    return Err(StoreError::Bulk {
                        collection: self.name.clone(),
                        applied: summary.applied(),
                        failed_index: index,
                        message,
                    });
                }
            }
        }

        Ok(summary)
    }

    async fn delete_many(&self, filter: &Filter) -> Result<usize, StoreError> {
        let mut docs = self.lock()?;
        let before = docs.len();
        docs.retain(|doc| !filter.matches(doc));
        Ok(before - docs.len())
    }
}

/// Named in-memory collections, created on first access.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed handle, handy when a caller needs [`MemoryCollection::snapshot`].
    pub fn memory_collection(&self, name: &str) -> Arc<MemoryCollection> {
        let mut collections = self
            .collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCollection::new(name)))
            .clone()
    }
}

impl DocumentStore for MemoryStore {
    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        self.memory_collection(name)
    }
}
