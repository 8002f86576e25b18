//! Field value model.
//!
//! [`Value`] is the closed set of things a record field can hold. There is
//! no reflection and no runtime casting anywhere in the engine: application
//! code reads fields through typed accessors that return options, and the
//! reducers match on variants.
//!
//! `Pointer` and `Relation` values are directed edges in the record graph.
//! They hold a [`RecordRef`] — a plain `(class, local id)` pair resolved
//! through the owning [`Context`](crate::Context) registry — never an
//! owning reference, so cyclic graphs cannot leak.

use crate::{ClassName, LocalId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Reference to a record, resolved through the owning context's registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRef {
    /// Class of the referenced record
    pub class: ClassName,
    /// Stable local id of the referenced record
    pub local_id: LocalId,
}

impl RecordRef {
    /// Create a reference from its parts.
    pub fn new(class: impl Into<ClassName>, local_id: impl Into<LocalId>) -> Self {
        Self {
            class: class.into(),
            local_id: local_id.into(),
        }
    }
}

/// A field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Value {
    /// Explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// Numeric value (all numbers are f64 on this side of the wire)
    Number(f64),
    /// UTF-8 string
    String(String),
    /// Ordered list of values
    Array(Vec<Value>),
    /// Nested string-keyed map
    Map(BTreeMap<String, Value>),
    /// Edge to a single record
    Pointer(RecordRef),
    /// Edge to a set of records
    Relation(BTreeSet<RecordRef>),
    /// Instant in time
    Date(DateTime<Utc>),
    /// Opaque binary payload
    Bytes(Vec<u8>),
}

impl Value {
    /// Name of this value's variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Pointer(_) => "pointer",
            Value::Relation(_) => "relation",
            Value::Date(_) => "date",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Check for explicit null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric content, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean content, if this is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Array content, if this is an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Map content, if this is a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Pointer target, if this is a pointer.
    pub fn as_pointer(&self) -> Option<&RecordRef> {
        match self {
            Value::Pointer(r) => Some(r),
            _ => None,
        }
    }

    /// Relation targets, if this is a relation.
    pub fn as_relation(&self) -> Option<&BTreeSet<RecordRef>> {
        match self {
            Value::Relation(refs) => Some(refs),
            _ => None,
        }
    }

    /// Date content, if this is a date.
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// All record references held by this value, including those nested
    /// inside arrays and maps. These are the outgoing edges a value
    /// contributes to the record graph.
    pub fn references(&self) -> Vec<&RecordRef> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a RecordRef>) {
        match self {
            Value::Pointer(r) => out.push(r),
            Value::Relation(refs) => out.extend(refs.iter()),
            Value::Array(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Value::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(out);
                }
            }
            _ => {}
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<RecordRef> for Value {
    fn from(r: RecordRef) -> Self {
        Value::Pointer(r)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        assert_eq!(Value::Number(2.5).as_number(), Some(2.5));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert!(Value::Null.is_null());

        // Wrong variant yields None, never a cast
        assert_eq!(Value::from("hi").as_number(), None);
        assert_eq!(Value::Number(1.0).as_str(), None);
    }

    #[test]
    fn type_names() {
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::Pointer(RecordRef::new("post", "l1")).type_name(), "pointer");
        assert_eq!(Value::Relation(BTreeSet::new()).type_name(), "relation");
    }

    #[test]
    fn references_walks_nested_containers() {
        let a = RecordRef::new("author", "l1");
        let b = RecordRef::new("post", "l2");
        let c = RecordRef::new("post", "l3");

        let mut relation = BTreeSet::new();
        relation.insert(b.clone());
        relation.insert(c.clone());

        let mut map = BTreeMap::new();
        map.insert("owner".to_string(), Value::Pointer(a.clone()));

        let value = Value::Array(vec![
            Value::Map(map),
            Value::Relation(relation),
            Value::Number(1.0),
        ]);

        let refs = value.references();
        assert_eq!(refs.len(), 3);
        assert!(refs.contains(&&a));
        assert!(refs.contains(&&b));
        assert!(refs.contains(&&c));
    }

    #[test]
    fn scalar_has_no_references() {
        assert!(Value::from("plain").references().is_empty());
        assert!(Value::Number(4.0).references().is_empty());
    }

    #[test]
    fn serialization_roundtrip() {
        let mut relation = BTreeSet::new();
        relation.insert(RecordRef::new("post", "l2"));

        let mut map = BTreeMap::new();
        map.insert("owner".to_string(), Value::Pointer(RecordRef::new("a", "l1")));

        let value = Value::Array(vec![
            Value::Null,
            Value::Number(1.5),
            Value::from("s"),
            Value::Map(map),
            Value::Relation(relation),
            Value::Bytes(vec![1, 2, 3]),
        ]);

        let json = serde_json::to_string(&value).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value, parsed);
    }

    #[test]
    fn record_ref_ordering_is_stable() {
        let r1 = RecordRef::new("post", "a");
        let r2 = RecordRef::new("post", "b");
        assert!(r1 < r2);

        let mut set = BTreeSet::new();
        set.insert(r2.clone());
        set.insert(r1.clone());
        let collected: Vec<_> = set.into_iter().collect();
        assert_eq!(collected, vec![r1, r2]);
    }
}
