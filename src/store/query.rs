//! Filter and update vocabulary understood by every [`Collection`](super::Collection).
//!
//! The operators mirror the subset of document-database semantics the
//! pipelines rely on: equality/range filters and `$set`, `$inc`, `$max`,
//! `$min`, `$push` updates with optional upsert.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A stored document: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// A single predicate on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Lt(Value),
    Lte(Value),
    Gte(Value),
}

impl Condition {
    fn holds(&self, actual: Option<&Value>) -> bool {
        match (self, actual) {
            (Condition::Eq(expected), Some(value)) => values_equal(value, expected),
            (Condition::Eq(expected), None) => expected.is_null(),
            (Condition::Lt(bound), Some(value)) => compare(value, bound) == Some(Ordering::Less),
            (Condition::Lte(bound), Some(value)) => {
                matches!(compare(value, bound), Some(Ordering::Less | Ordering::Equal))
            }
            (Condition::Gte(bound), Some(value)) => {
                matches!(compare(value, bound), Some(Ordering::Greater | Ordering::Equal))
            }
            (_, None) => false,
        }
    }
}

/// Conjunction of field conditions. An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Condition)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<Value>) -> Self {
        Self::all().eq("_id", id)
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Eq(value.into()))
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Lt(value.into()))
    }

    pub fn lte(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Lte(value.into()))
    }

    pub fn gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Gte(value.into()))
    }

    fn with(mut self, field: &str, condition: Condition) -> Self {
        self.clauses.push((field.to_string(), condition));
        self
    }

    pub(crate) fn conditions(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.clauses
            .iter()
            .map(|(field, condition)| (field.as_str(), condition))
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, condition)| condition.holds(doc.get(field)))
    }

    /// Equality clauses only; these seed a document created by an upsert.
    pub fn equalities(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.clauses.iter().filter_map(|(field, condition)| match condition {
            Condition::Eq(value) => Some((field.as_str(), value)),
            _ => None,
        })
    }

    fn seed(&self) -> Document {
        self.equalities()
            .map(|(field, value)| (field.to_string(), value.clone()))
            .collect()
    }
}

/// Field modifications applied atomically to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    set: Vec<(String, Value)>,
    inc: Vec<(String, i64)>,
    max: Vec<(String, Value)>,
    min: Vec<(String, Value)>,
    push: Vec<(String, Value)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set.push((field.to_string(), value.into()));
        self
    }

    pub fn inc(mut self, field: &str, by: i64) -> Self {
        self.inc.push((field.to_string(), by));
        self
    }

    pub fn max(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.max.push((field.to_string(), value.into()));
        self
    }

    pub fn min(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.min.push((field.to_string(), value.into()));
        self
    }

    pub fn push(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.push.push((field.to_string(), value.into()));
        self
    }

    /// Applies every modifier to `doc`. On error `doc` may be partially
    /// modified, so callers apply to a copy.
    pub fn apply(&self, doc: &mut Document) -> Result<(), String> {
        for (field, value) in &self.set {
            doc.insert(field.clone(), value.clone());
        }

        for (field, by) in &self.inc {
            let next = match doc.get(field) {
                None | Some(Value::Null) => *by,
                Some(Value::Number(current)) => current
                    .as_i64()
                    .ok_or_else(|| format!("cannot $inc non-integer field `{field}`"))?
                    .checked_add(*by)
                    .ok_or_else(|| format!("$inc overflows field `{field}`"))?,
                Some(other) => {
                    return Err(format!("cannot $inc field `{field}` holding {}", kind(other)));
                }
            };
            doc.insert(field.clone(), Value::from(next));
        }

        for (field, value) in &self.max {
            keep_extremum(doc, field, value, Ordering::Greater)?;
        }

        for (field, value) in &self.min {
            keep_extremum(doc, field, value, Ordering::Less)?;
        }

        for (field, value) in &self.push {
            match doc
                .entry(field.clone())
                .or_insert_with(|| Value::Array(Vec::new()))
            {
                Value::Array(items) => items.push(value.clone()),
                other => {
                    return Err(format!("cannot $push to field `{field}` holding {}", kind(other)));
                }
            }
        }

        Ok(())
    }
}

/// One entry of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    UpdateOne {
        filter: Filter,
        update: Update,
        upsert: bool,
    },
    ReplaceOne {
        filter: Filter,
        replacement: Document,
        upsert: bool,
    },
}

/// What executing a [`WriteOp`] against the first matching document produced.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WriteEffect {
    Modified(Document),
    Inserted(Document),
    Unmatched,
}

impl WriteOp {
    pub fn filter(&self) -> &Filter {
        match self {
            WriteOp::UpdateOne { filter, .. } | WriteOp::ReplaceOne { filter, .. } => filter,
        }
    }

    /// Computes the new state for `current`, the first document matching the
    /// filter (if any). Nothing is persisted here.
    pub(crate) fn execute(&self, current: Option<&Document>) -> Result<WriteEffect, String> {
        match self {
            WriteOp::UpdateOne {
                filter,
                update,
                upsert,
            } => match current {
                Some(doc) => {
                    let mut next = doc.clone();
                    update.apply(&mut next)?;
                    Ok(WriteEffect::Modified(next))
                }
                None if *upsert => {
                    let mut next = filter.seed();
                    update.apply(&mut next)?;
                    ensure_id(&mut next);
                    Ok(WriteEffect::Inserted(next))
                }
                None => Ok(WriteEffect::Unmatched),
            },
            WriteOp::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => match current {
                Some(doc) => {
                    let mut next = replacement.clone();
                    if let Some(id) = doc.get("_id") {
                        if let Some(new_id) = next.get("_id") {
                            if !values_equal(new_id, id) {
                                return Err("replacement may not change `_id`".to_string());
                            }
                        }
                        next.insert("_id".to_string(), id.clone());
                    }
                    Ok(WriteEffect::Modified(next))
                }
                None if *upsert => {
                    let mut next = replacement.clone();
                    if !next.contains_key("_id") {
                        if let Some((_, id)) = filter.equalities().find(|(field, _)| *field == "_id") {
                            next.insert("_id".to_string(), id.clone());
                        }
                    }
                    ensure_id(&mut next);
                    Ok(WriteEffect::Inserted(next))
                }
                None => Ok(WriteEffect::Unmatched),
            },
        }
    }
}

/// Counts reported by a successful bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteSummary {
    pub matched: usize,
    pub upserted: usize,
    pub unmatched: usize,
}

impl BulkWriteSummary {
    /// Operations processed without error.
    pub fn applied(&self) -> usize {
        self.matched + self.upserted + self.unmatched
    }

    pub(crate) fn record(&mut self, effect: &WriteEffect) {
        match effect {
            WriteEffect::Modified(_) => self.matched += 1,
            WriteEffect::Inserted(_) => self.upserted += 1,
            WriteEffect::Unmatched => self.unmatched += 1,
        }
    }
}

/// Text form of a document's `_id`, used as the unique key by the backends.
pub(crate) fn id_key(doc: &Document) -> Option<String> {
    match doc.get("_id")? {
        Value::String(id) => Some(id.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn ensure_id(doc: &mut Document) {
    if id_key(doc).is_none() {
        doc.insert(
            "_id".to_string(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }
}

fn keep_extremum(
    doc: &mut Document,
    field: &str,
    candidate: &Value,
    wanted: Ordering,
) -> Result<(), String> {
    let replace = match doc.get(field) {
        None | Some(Value::Null) => true,
        Some(current) => compare(candidate, current)
            .ok_or_else(|| format!("cannot compare {} with {} in `{field}`", kind(candidate), kind(current)))?
            == wanted,
    };
    if replace {
        doc.insert(field.to_string(), candidate.clone());
    }
    Ok(())
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    #[test]
    fn test_filter_eq_and_lt() {
        let d = doc(json!({"station_id": "72", "bucket_size": 119}));
        assert!(Filter::all().eq("station_id", "72").lt("bucket_size", 120).matches(&d));
        assert!(!Filter::all().eq("station_id", "72").lt("bucket_size", 119).matches(&d));
        assert!(!Filter::all().eq("station_id", "79").matches(&d));
    }

    #[test]
    fn test_range_on_missing_field_does_not_match() {
        let d = doc(json!({"station_id": "72"}));
        assert!(!Filter::all().lt("bucket_size", 120).matches(&d));
        assert!(Filter::all().matches(&d));
    }

    #[test]
    fn test_numeric_equality_ignores_representation() {
        let d = doc(json!({"capacity": 20}));
        assert!(Filter::all().eq("capacity", 20.0).matches(&d));
    }

    #[test]
    fn test_update_on_empty_document() {
        let mut d = Document::new();
        Update::new()
            .push("status", json!({"ts": 5}))
            .max("max_ts", 5)
            .min("min_ts", 5)
            .inc("bucket_size", 1)
            .apply(&mut d)
            .unwrap();

        assert_eq!(Value::Object(d), json!({
            "status": [{"ts": 5}],
            "max_ts": 5,
            "min_ts": 5,
            "bucket_size": 1
        }));
    }

    #[test]
    fn test_max_and_min_keep_extremes() {
        let mut d = doc(json!({"max_ts": 8, "min_ts": 2}));
        Update::new().max("max_ts", 5).min("min_ts", 1).apply(&mut d).unwrap();
        assert_eq!(d["max_ts"], json!(8));
        assert_eq!(d["min_ts"], json!(1));
    }

    #[test]
    fn test_inc_rejects_non_numeric_field() {
        let mut d = doc(json!({"bucket_size": "full"}));
        let err = Update::new().inc("bucket_size", 1).apply(&mut d).unwrap_err();
        assert!(err.contains("bucket_size"));
    }

    #[test]
    fn test_push_rejects_non_array_field() {
        let mut d = doc(json!({"status": 3}));
        assert!(Update::new().push("status", 1).apply(&mut d).is_err());
    }

    #[test]
    fn test_upsert_seeds_equalities_but_not_ranges() {
        let op = WriteOp::UpdateOne {
            filter: Filter::all().eq("station_id", "72").lt("bucket_size", 120),
            update: Update::new().inc("bucket_size", 1),
            upsert: true,
        };
        let WriteEffect::Inserted(created) = op.execute(None).unwrap() else {
            panic!("expected an insert");
        };
        assert_eq!(created["station_id"], json!("72"));
        assert_eq!(created["bucket_size"], json!(1));
        assert!(id_key(&created).is_some());
    }

    #[test]
    fn test_update_without_upsert_is_unmatched() {
        let op = WriteOp::UpdateOne {
            filter: Filter::by_id("x"),
            update: Update::new().set("a", 1),
            upsert: false,
        };
        assert_eq!(op.execute(None).unwrap(), WriteEffect::Unmatched);
    }

    #[test]
    fn test_replace_keeps_existing_id() {
        let current = doc(json!({"_id": "72", "name": "old"}));
        let op = WriteOp::ReplaceOne {
            filter: Filter::by_id("72"),
            replacement: doc(json!({"name": "new"})),
            upsert: true,
        };
        let WriteEffect::Modified(next) = op.execute(Some(&current)).unwrap() else {
            panic!("expected a modification");
        };
        assert_eq!(Value::Object(next), json!({"_id": "72", "name": "new"}));
    }

    #[test]
    fn test_replace_upsert_takes_id_from_filter() {
        let op = WriteOp::ReplaceOne {
            filter: Filter::by_id("72"),
            replacement: doc(json!({"name": "W 52 St"})),
            upsert: true,
        };
        let WriteEffect::Inserted(created) = op.execute(None).unwrap() else {
            panic!("expected an insert");
        };
        assert_eq!(id_key(&created).as_deref(), Some("72"));
    }
}
