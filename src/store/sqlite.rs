use super::query::{WriteEffect, id_key};
use super::{BulkWriteSummary, Collection, Condition, Document, DocumentStore, Filter, WriteOp};
use crate::error::StoreError;
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    doc_id TEXT NOT NULL,
    body TEXT NOT NULL,
    UNIQUE (collection, doc_id)
);
CREATE INDEX IF NOT EXISTS documents_station
    ON documents (collection, json_extract(body, '$.station_id'));
"#;

/// JSON documents in one SQLite file, one logical collection per `collection`
/// column value. Each bulk write runs in a single transaction.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        debug!(path = %path.display(), "Opening SQLite document store");
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl DocumentStore for SqliteStore {
    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(SqliteCollection {
            name: name.to_string(),
            conn: self.conn.clone(),
        })
    }
}

pub struct SqliteCollection {
    name: String,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCollection {
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Poisoned(self.name.clone()))
    }

    /// Rows matching `filter`. Equality on plain strings and integers and
    /// integer ranges are pushed into SQL; every clause is still checked on
    /// the decoded document.
    fn matching(
        conn: &Connection,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<(i64, Document)>, StoreError> {
        let mut sql = String::from("SELECT seq, body FROM documents WHERE collection = ?1");
        let mut args = vec![SqlValue::Text(collection.to_string())];

        for (field, condition) in filter.conditions() {
            let Some((op, bound)) = pushdown(field, condition) else {
                continue;
            };
            let column = if field == "_id" {
                "doc_id".to_string()
            } else {
                format!("json_extract(body, '$.{field}')")
            };
            sql.push_str(&format!(" AND {column} {op} ?{}", args.len() + 1));
            args.push(bound);
        }
        sql.push_str(" ORDER BY seq");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut docs = Vec::new();
        for row in rows {
            let (seq, body) = row?;
            let doc: Document = serde_json::from_str(&body)?;
            if filter.matches(&doc) {
                docs.push((seq, doc));
            }
        }
        Ok(docs)
    }

    fn apply(conn: &Connection, collection: &str, op: &WriteOp) -> Result<WriteEffect, String> {
        let current = Self::matching(conn, collection, op.filter())
            .map_err(|e| e.to_string())?
            .into_iter()
            .next();
        let effect = op.execute(current.as_ref().map(|(_, doc)| doc))?;

        match (&current, &effect) {
            (Some((seq, _)), WriteEffect::Modified(next)) => {
                let key = id_key(next).ok_or("document has no `_id`")?;
                let body = serde_json::to_string(next).map_err(|e| e.to_string())?;
                conn.execute(
                    "UPDATE documents SET doc_id = ?1, body = ?2 WHERE seq = ?3",
                    params![key, body, seq],
                )
                .map_err(|e| e.to_string())?;
            }
            (_, WriteEffect::Inserted(next)) => {
                let key = id_key(next).ok_or("document has no `_id`")?;
                let body = serde_json::to_string(next).map_err(|e| e.to_string())?;
                conn.execute(
                    "INSERT INTO documents (collection, doc_id, body) VALUES (?1, ?2, ?3)",
                    params![collection, key, body],
                )
                .map_err(|e| match e.sqlite_error_code() {
                    Some(rusqlite::ErrorCode::ConstraintViolation) => {
                        format!("duplicate key `{key}`")
                    }
                    _ => e.to_string(),
                })?;
            }
            _ => {}
        }

        Ok(effect)
    }
}

#[async_trait]
impl Collection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let conn = self.lock()?;
        Ok(Self::matching(&conn, &self.name, filter)?
            .into_iter()
            .map(|(_, doc)| doc)
            .collect())
    }

    async fn bulk_write(&self, ops: &[WriteOp]) -> Result<BulkWriteSummary, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut summary = BulkWriteSummary::default();

        for (index, op) in ops.iter().enumerate() {
            match Self::apply(&tx, &self.name, op) {
                Ok(effect) => summary.record(&effect),
                Err(message) => {
                    tx.commit()?;
                    return Err(StoreError::Bulk {
                        collection: self.name.clone(),
                        applied: summary.applied(),
                        failed_index: index,
                        message,
                    });
                }
            }
        }

        tx.commit()?;
        Ok(summary)
    }

    async fn delete_many(&self, filter: &Filter) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let doomed = Self::matching(&tx, &self.name, filter)?;
        for (seq, _) in &doomed {
            tx.execute("DELETE FROM documents WHERE seq = ?1", params![seq])?;
        }
        tx.commit()?;
        Ok(doomed.len())
    }
}

/// SQL operator and bound for a clause SQLite can evaluate the same way the
/// in-memory matcher does. `_id` is only compared for string equality.
fn pushdown(field: &str, condition: &Condition) -> Option<(&'static str, SqlValue)> {
    if field == "_id" {
        return match condition {
            Condition::Eq(Value::String(id)) => Some(("=", SqlValue::Text(id.clone()))),
            _ => None,
        };
    }
    if !is_plain_field(field) {
        return None;
    }
    match condition {
        Condition::Eq(Value::String(s)) => Some(("=", SqlValue::Text(s.clone()))),
        Condition::Eq(value) => Some(("=", SqlValue::Integer(value.as_i64()?))),
        Condition::Lt(value) => Some(("<", SqlValue::Integer(value.as_i64()?))),
        Condition::Lte(value) => Some(("<=", SqlValue::Integer(value.as_i64()?))),
        Condition::Gte(value) => Some((">=", SqlValue::Integer(value.as_i64()?))),
    }
}

fn is_plain_field(field: &str) -> bool {
    !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
