//! Operation types for expressing field mutations.
//!
//! Mutations are expressed as operations, not direct writes. An operation
//! carries everything needed to replay the intent later: the kind, the
//! target field (or nested path), and a payload owned by the operation
//! itself, so later changes to the caller's value can never corrupt a
//! queued mutation.

use crate::error::{Error, Result};
use crate::value::{RecordRef, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kind of mutation an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OpKind {
    /// Overwrite the field with the payload
    Set,
    /// Remove the field
    Delete,
    /// Add a signed amount to a numeric field
    Increment,
    /// Append elements to an array field
    Add,
    /// Append elements not already present in an array field
    AddUnique,
    /// Remove all matching elements from an array field
    Remove,
    /// Add targets to a relation field
    AddRelation,
    /// Remove targets from a relation field
    RemoveRelation,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Set => "Set",
            OpKind::Delete => "Delete",
            OpKind::Increment => "Increment",
            OpKind::Add => "Add",
            OpKind::AddUnique => "AddUnique",
            OpKind::Remove => "Remove",
            OpKind::AddRelation => "AddRelation",
            OpKind::RemoveRelation => "RemoveRelation",
        };
        write!(f, "{name}")
    }
}

/// A validated field key, possibly dotted to address a nested map path.
///
/// The first segment must match `^[a-z0-9][a-z0-9_]*$`; no segment may be
/// empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse and validate a dotted key.
    pub fn parse(key: &str) -> Result<Self> {
        let segments: Vec<String> = key.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(Error::MalformedKey(key.to_string()));
        }
        if !head_is_valid(&segments[0]) {
            return Err(Error::MalformedKey(key.to_string()));
        }
        Ok(Self { segments })
    }

    /// First path segment — the record field this path enters through.
    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    /// All path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether this path addresses inside a nested map.
    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

fn head_is_valid(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// An atomic intended mutation against a field or nested field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    kind: OpKind,
    target: FieldPath,
    payload: Option<Value>,
}

impl Operation {
    /// Construct a validated operation.
    ///
    /// Fails with [`Error::MalformedKey`] on key-syntax violations and
    /// [`Error::InvalidType`] when the payload's type is incompatible with
    /// the kind. The payload is owned by the operation from here on.
    pub fn new(kind: OpKind, key: &str, payload: Option<Value>) -> Result<Self> {
        let target = FieldPath::parse(key)?;
        check_payload(kind, &target, payload.as_ref())?;
        Ok(Self {
            kind,
            target,
            payload,
        })
    }

    /// Overwrite `key` with `value`.
    pub fn set(key: &str, value: Value) -> Result<Self> {
        Self::new(OpKind::Set, key, Some(value))
    }

    /// Remove `key`.
    pub fn delete(key: &str) -> Result<Self> {
        Self::new(OpKind::Delete, key, None)
    }

    /// Add `amount` to the number at `key`.
    pub fn increment(key: &str, amount: f64) -> Result<Self> {
        Self::new(OpKind::Increment, key, Some(Value::Number(amount)))
    }

    /// Append `items` to the array at `key`.
    pub fn add(key: &str, items: Vec<Value>) -> Result<Self> {
        Self::new(OpKind::Add, key, Some(Value::Array(items)))
    }

    /// Append the not-yet-present subset of `items` to the array at `key`.
    pub fn add_unique(key: &str, items: Vec<Value>) -> Result<Self> {
        Self::new(OpKind::AddUnique, key, Some(Value::Array(items)))
    }

    /// Remove all elements equal to one of `items` from the array at `key`.
    pub fn remove(key: &str, items: Vec<Value>) -> Result<Self> {
        Self::new(OpKind::Remove, key, Some(Value::Array(items)))
    }

    /// Add `targets` to the relation at `key`.
    pub fn add_relation(key: &str, targets: BTreeSet<RecordRef>) -> Result<Self> {
        Self::new(OpKind::AddRelation, key, Some(Value::Relation(targets)))
    }

    /// Remove `targets` from the relation at `key`.
    pub fn remove_relation(key: &str, targets: BTreeSet<RecordRef>) -> Result<Self> {
        Self::new(OpKind::RemoveRelation, key, Some(Value::Relation(targets)))
    }

    /// The operation's kind.
    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// The targeted field path.
    pub fn target(&self) -> &FieldPath {
        &self.target
    }

    /// The payload, if the kind carries one.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Increment amount, for `Increment` operations.
    pub(crate) fn amount(&self) -> f64 {
        self.payload
            .as_ref()
            .and_then(Value::as_number)
            .unwrap_or(0.0)
    }

    /// Apply this operation to a field slot, producing the slot's new
    /// content. `None` means the field is absent. This is the optimistic
    /// in-memory application; the queued operation itself is what goes to
    /// the wire.
    pub fn apply_to(&self, slot: Option<Value>) -> Option<Value> {
        match self.kind {
            OpKind::Set => self.payload.clone(),
            OpKind::Delete => None,
            OpKind::Increment => {
                let previous = slot.as_ref().and_then(Value::as_number).unwrap_or(0.0);
                Some(Value::Number(previous + self.amount()))
            }
            OpKind::Add => {
                let mut items = slot_as_array(slot);
                items.extend(self.payload_items());
                Some(Value::Array(items))
            }
            OpKind::AddUnique => {
                let mut items = slot_as_array(slot);
                for item in self.payload_items() {
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
                Some(Value::Array(items))
            }
            OpKind::Remove => {
                let removed = self.payload_items();
                let items: Vec<Value> = slot_as_array(slot)
                    .into_iter()
                    .filter(|item| !removed.contains(item))
                    .collect();
                Some(Value::Array(items))
            }
            OpKind::AddRelation => {
                let mut refs = slot_as_relation(slot);
                refs.extend(self.payload_refs());
                Some(Value::Relation(refs))
            }
            OpKind::RemoveRelation => {
                let mut refs = slot_as_relation(slot);
                for target in self.payload_refs() {
                    refs.remove(&target);
                }
                Some(Value::Relation(refs))
            }
        }
    }

    fn payload_items(&self) -> Vec<Value> {
        match &self.payload {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    fn payload_refs(&self) -> BTreeSet<RecordRef> {
        match &self.payload {
            Some(Value::Relation(refs)) => refs.clone(),
            _ => BTreeSet::new(),
        }
    }
}

fn slot_as_array(slot: Option<Value>) -> Vec<Value> {
    match slot {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn slot_as_relation(slot: Option<Value>) -> BTreeSet<RecordRef> {
    match slot {
        Some(Value::Relation(refs)) => refs,
        _ => BTreeSet::new(),
    }
}

fn check_payload(kind: OpKind, target: &FieldPath, payload: Option<&Value>) -> Result<()> {
    let mismatch = |expected: &str| Error::InvalidType {
        field: target.to_string(),
        expected: expected.to_string(),
        got: payload.map_or("nothing", Value::type_name).to_string(),
    };

    match kind {
        OpKind::Set => match payload {
            Some(_) => Ok(()),
            None => Err(mismatch("a value")),
        },
        OpKind::Delete => match payload {
            None => Ok(()),
            Some(_) => Err(mismatch("no payload")),
        },
        OpKind::Increment => match payload {
            Some(Value::Number(_)) => Ok(()),
            _ => Err(mismatch("number")),
        },
        OpKind::Add | OpKind::AddUnique | OpKind::Remove => match payload {
            Some(Value::Array(_)) => Ok(()),
            _ => Err(mismatch("array")),
        },
        OpKind::AddRelation | OpKind::RemoveRelation => match payload {
            Some(Value::Relation(_)) => Ok(()),
            _ => Err(mismatch("relation")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_key() {
        let path = FieldPath::parse("score_total").unwrap();
        assert_eq!(path.head(), "score_total");
        assert!(!path.is_nested());
    }

    #[test]
    fn parse_dotted_key() {
        let path = FieldPath::parse("stats.wins").unwrap();
        assert_eq!(path.head(), "stats");
        assert!(path.is_nested());
        assert_eq!(path.to_string(), "stats.wins");
    }

    #[test]
    fn reject_malformed_keys() {
        for key in ["", "Name", "_score", "sco re", "a..b", "a.", ".a", "über"] {
            let err = FieldPath::parse(key).unwrap_err();
            assert!(matches!(err, Error::MalformedKey(_)), "key {key:?}");
        }
    }

    #[test]
    fn digit_led_keys_are_valid() {
        assert!(FieldPath::parse("2fa_enabled").is_ok());
    }

    #[test]
    fn nested_segments_after_head_are_unrestricted() {
        // Only the first segment is syntax-checked; nested map keys may be
        // arbitrary non-empty strings.
        assert!(FieldPath::parse("meta.Display Name").is_ok());
    }

    #[test]
    fn increment_requires_number() {
        let err = Operation::new(OpKind::Increment, "score", Some(Value::from("5"))).unwrap_err();
        assert!(matches!(err, Error::InvalidType { .. }));
        assert!(Operation::increment("score", 5.0).is_ok());
    }

    #[test]
    fn delete_takes_no_payload() {
        let err = Operation::new(OpKind::Delete, "score", Some(Value::Null)).unwrap_err();
        assert!(matches!(err, Error::InvalidType { .. }));
        assert!(Operation::delete("score").is_ok());
    }

    #[test]
    fn set_requires_payload() {
        let err = Operation::new(OpKind::Set, "name", None).unwrap_err();
        assert!(matches!(err, Error::InvalidType { .. }));
    }

    #[test]
    fn array_kinds_require_array_payload() {
        for kind in [OpKind::Add, OpKind::AddUnique, OpKind::Remove] {
            let err = Operation::new(kind, "tags", Some(Value::from("solo"))).unwrap_err();
            assert!(matches!(err, Error::InvalidType { .. }));
        }
    }

    #[test]
    fn relation_kinds_require_relation_payload() {
        let err =
            Operation::new(OpKind::AddRelation, "friends", Some(Value::Array(vec![]))).unwrap_err();
        assert!(matches!(err, Error::InvalidType { .. }));
    }

    #[test]
    fn payload_is_owned_by_the_operation() {
        let mut original = vec![Value::from("a")];
        let op = Operation::add("tags", original.clone()).unwrap();
        original.push(Value::from("b"));
        assert_eq!(op.payload(), Some(&Value::Array(vec![Value::from("a")])));
    }

    #[test]
    fn apply_set_and_delete() {
        let set = Operation::set("name", Value::from("Ari")).unwrap();
        assert_eq!(set.apply_to(None), Some(Value::from("Ari")));

        let delete = Operation::delete("name").unwrap();
        assert_eq!(delete.apply_to(Some(Value::from("Ari"))), None);
    }

    #[test]
    fn apply_increment_treats_absent_as_zero() {
        let inc = Operation::increment("score", 4.0).unwrap();
        assert_eq!(inc.apply_to(None), Some(Value::Number(4.0)));
        assert_eq!(
            inc.apply_to(Some(Value::Number(10.0))),
            Some(Value::Number(14.0))
        );
    }

    #[test]
    fn apply_array_kinds() {
        let add = Operation::add("tags", vec![Value::from("a"), Value::from("b")]).unwrap();
        let state = add.apply_to(None).unwrap();
        assert_eq!(
            state,
            Value::Array(vec![Value::from("a"), Value::from("b")])
        );

        let unique = Operation::add_unique("tags", vec![Value::from("a"), Value::from("c")]).unwrap();
        let state = unique.apply_to(Some(state)).unwrap();
        assert_eq!(
            state,
            Value::Array(vec![Value::from("a"), Value::from("b"), Value::from("c")])
        );

        let remove = Operation::remove("tags", vec![Value::from("a")]).unwrap();
        let state = remove.apply_to(Some(state)).unwrap();
        assert_eq!(
            state,
            Value::Array(vec![Value::from("b"), Value::from("c")])
        );
    }

    #[test]
    fn apply_relation_kinds() {
        let a = RecordRef::new("player", "l1");
        let b = RecordRef::new("player", "l2");

        let add = Operation::add_relation(
            "friends",
            [a.clone(), b.clone()].into_iter().collect(),
        )
        .unwrap();
        let state = add.apply_to(None).unwrap();
        assert_eq!(state.as_relation().unwrap().len(), 2);

        let remove =
            Operation::remove_relation("friends", [a.clone()].into_iter().collect()).unwrap();
        let state = remove.apply_to(Some(state)).unwrap();
        let refs = state.as_relation().unwrap();
        assert!(!refs.contains(&a));
        assert!(refs.contains(&b));
    }
}
