//! Per-field merge policies.
//!
//! A reducer decides how successive operations on one field combine. Key
//! and Number reducers collapse their history into a single operation;
//! Array and Relation reducers keep the full submission-ordered sequence,
//! because their operations are not generally commutative and the server
//! must replay them in order.

use crate::error::{Error, Result};
use crate::operation::{OpKind, Operation};
use crate::value::Value;

/// Which merge policy governs a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReducerKind {
    /// Last-write-wins scalar policy
    Key,
    /// Arithmetic-fusing numeric policy
    Number,
    /// Append-only array policy
    Array,
    /// Append-only relation policy
    Relation,
}

/// Merge policy instance for a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Reducer {
    Key(KeyReducer),
    Number(NumberReducer),
    Array(ArrayReducer),
    Relation(RelationReducer),
}

impl Reducer {
    /// Create an empty reducer of the given kind.
    pub fn new(kind: ReducerKind) -> Self {
        match kind {
            ReducerKind::Key => Reducer::Key(KeyReducer::default()),
            ReducerKind::Number => Reducer::Number(NumberReducer::default()),
            ReducerKind::Array => Reducer::Array(ArrayReducer::default()),
            ReducerKind::Relation => Reducer::Relation(RelationReducer::default()),
        }
    }

    /// Merge one more operation into this reducer.
    pub fn apply(&mut self, op: Operation) -> Result<()> {
        match self {
            Reducer::Key(r) => r.apply(op),
            Reducer::Number(r) => r.apply(op),
            Reducer::Array(r) => r.apply(op),
            Reducer::Relation(r) => r.apply(op),
        }
    }

    /// The reduced, replayable operation sequence for the field.
    ///
    /// Collapsing reducers yield at most one entry; append-only reducers
    /// yield their full recorded sequence.
    pub fn operations(&self) -> Vec<Operation> {
        match self {
            Reducer::Key(r) => r.last.iter().cloned().collect(),
            Reducer::Number(r) => r.current.iter().cloned().collect(),
            Reducer::Array(r) => r.ops.clone(),
            Reducer::Relation(r) => r.ops.clone(),
        }
    }

    /// Infer the reducer kind for a field's first operation.
    ///
    /// Preference order: the field's live value, then the operation kind,
    /// then — for `Set` — the payload type. Returns `None` only for a
    /// `Delete` against a field nothing is known about; such an operation
    /// is stashed as unresolved by the ledger.
    pub fn infer(op: &Operation, live: Option<&Value>) -> Option<ReducerKind> {
        if let Some(value) = live {
            return Some(match value {
                Value::Number(_) => ReducerKind::Number,
                Value::Array(_) => ReducerKind::Array,
                Value::Relation(_) => ReducerKind::Relation,
                _ => ReducerKind::Key,
            });
        }
        match op.kind() {
            OpKind::Increment => Some(ReducerKind::Number),
            OpKind::Add | OpKind::AddUnique | OpKind::Remove => Some(ReducerKind::Array),
            OpKind::AddRelation | OpKind::RemoveRelation => Some(ReducerKind::Relation),
            OpKind::Set => Some(match op.payload() {
                Some(Value::Number(_)) => ReducerKind::Number,
                Some(Value::Array(_)) => ReducerKind::Array,
                Some(Value::Relation(_)) => ReducerKind::Relation,
                _ => ReducerKind::Key,
            }),
            OpKind::Delete => None,
        }
    }
}

fn invalid_kind(op: &Operation, valid: &str) -> Error {
    Error::InvalidType {
        field: op.target().to_string(),
        expected: format!("one of {valid}"),
        got: op.kind().to_string(),
    }
}

/// Last-write-wins policy for scalar fields. Valid kinds: Set, Delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyReducer {
    last: Option<Operation>,
}

impl KeyReducer {
    fn apply(&mut self, op: Operation) -> Result<()> {
        match op.kind() {
            OpKind::Set | OpKind::Delete => {
                self.last = Some(op);
                Ok(())
            }
            _ => Err(invalid_kind(&op, "Set, Delete")),
        }
    }
}

/// Arithmetic-fusing policy for numeric fields. Valid kinds: Set, Delete,
/// Increment. This is the only policy that fuses two operations into one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberReducer {
    current: Option<Operation>,
}

impl NumberReducer {
    fn apply(&mut self, op: Operation) -> Result<()> {
        match op.kind() {
            // Any incoming Set or Delete supersedes whatever came before.
            OpKind::Set | OpKind::Delete => {
                self.current = Some(op);
                Ok(())
            }
            OpKind::Increment => {
                let key = op.target().to_string();
                let amount = incoming_amount(&op);
                self.current = Some(match &self.current {
                    None => op,
                    Some(previous) => match previous.kind() {
                        // A delete followed by an increment starts from
                        // nothing, so it rewrites to an absolute set.
                        OpKind::Delete => Operation::set(&key, Value::Number(amount))?,
                        OpKind::Set => {
                            let base = previous
                                .payload()
                                .and_then(Value::as_number)
                                .unwrap_or(0.0);
                            Operation::set(&key, Value::Number(base + amount))?
                        }
                        OpKind::Increment => {
                            let previous_amount = incoming_amount(previous);
                            Operation::increment(&key, previous_amount + amount)?
                        }
                        _ => op,
                    },
                });
                Ok(())
            }
            _ => Err(invalid_kind(&op, "Set, Delete, Increment")),
        }
    }
}

fn incoming_amount(op: &Operation) -> f64 {
    op.payload().and_then(Value::as_number).unwrap_or(0.0)
}

/// Append-only policy for array fields. Valid kinds: Set, Delete, Add,
/// AddUnique, Remove. Never collapses; a Set or Delete appended after
/// queued entries does not truncate them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrayReducer {
    ops: Vec<Operation>,
}

impl ArrayReducer {
    fn apply(&mut self, op: Operation) -> Result<()> {
        match op.kind() {
            OpKind::Set | OpKind::Delete | OpKind::Add | OpKind::AddUnique | OpKind::Remove => {
                self.ops.push(op);
                Ok(())
            }
            _ => Err(invalid_kind(&op, "Set, Delete, Add, AddUnique, Remove")),
        }
    }
}

/// Append-only policy for relation fields. Valid kinds: AddRelation,
/// RemoveRelation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationReducer {
    ops: Vec<Operation>,
}

impl RelationReducer {
    fn apply(&mut self, op: Operation) -> Result<()> {
        match op.kind() {
            OpKind::AddRelation | OpKind::RemoveRelation => {
                self.ops.push(op);
                Ok(())
            }
            _ => Err(invalid_kind(&op, "AddRelation, RemoveRelation")),
        }
    }
}
