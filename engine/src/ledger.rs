//! The per-record mutation ledger.
//!
//! A ledger tracks every unsynced field mutation of one record. Each field
//! is governed by at most one live reducer; an operation whose reducer type
//! cannot be determined yet is stashed as that field's single unresolved
//! operation and replayed once the type becomes known.
//!
//! The ledger never talks to the network. It only answers two questions:
//! what is the minimal replayable operation set, and how does that set
//! flatten into wire-shaped tables.

use crate::error::Result;
use crate::operation::Operation;
use crate::reducer::Reducer;
use crate::value::Value;
use std::collections::BTreeMap;

/// Tracks unsynced mutations for one record.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    /// Live reducer per field
    reducers: BTreeMap<String, Reducer>,
    /// Stashed operation per field whose reducer type is still unknown
    unresolved: BTreeMap<String, Operation>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route an operation to its field's reducer.
    ///
    /// `live` is the record's current value for the targeted field, used
    /// for reducer inference on the field's first operation. On error the
    /// ledger is left unchanged.
    pub fn reduce(&mut self, op: Operation, live: Option<&Value>) -> Result<()> {
        let key = op.target().to_string();

        if let Some(reducer) = self.reducers.get_mut(&key) {
            return reducer.apply(op);
        }

        match Reducer::infer(&op, live) {
            Some(kind) => {
                let mut reducer = Reducer::new(kind);
                if let Some(stashed) = self.unresolved.get(&key) {
                    reducer.apply(stashed.clone())?;
                }
                reducer.apply(op)?;
                self.unresolved.remove(&key);
                self.reducers.insert(key, reducer);
                Ok(())
            }
            None => {
                // Last-unresolved-wins: a newer undetermined operation
                // replaces any previously stashed one.
                self.unresolved.insert(key, op);
                Ok(())
            }
        }
    }

    /// Project the ledger to its replayable operation sequences, field by
    /// field. Collapsing reducers contribute a single entry; append-only
    /// reducers their full recorded sequence; a stashed unresolved
    /// operation contributes itself.
    pub fn operation_stack(&self) -> BTreeMap<String, Vec<Operation>> {
        let mut stack: BTreeMap<String, Vec<Operation>> = BTreeMap::new();
        for (field, reducer) in &self.reducers {
            let ops = reducer.operations();
            if !ops.is_empty() {
                stack.insert(field.clone(), ops);
            }
        }
        for (field, op) in &self.unresolved {
            stack.insert(field.clone(), vec![op.clone()]);
        }
        stack
    }

    /// Flatten the operation stack into an ordered list of per-field
    /// tables such that no table contains two operations on the same
    /// field. The wire batch protocol permits exactly one operation entry
    /// per field per sub-request, so a field with K queued operations
    /// contributes to K positionally-ordered tables.
    pub fn operation_table_list(&self) -> Vec<BTreeMap<String, Operation>> {
        let stack = self.operation_stack();
        let depth = stack.values().map(Vec::len).max().unwrap_or(0);

        (0..depth)
            .map(|i| {
                stack
                    .iter()
                    .filter_map(|(field, ops)| {
                        ops.get(i).map(|op| (field.clone(), op.clone()))
                    })
                    .collect()
            })
            .collect()
    }

    /// Drop all tracked mutations. Called only after a fully successful
    /// save; a failed save leaves the ledger intact so a retry resends an
    /// identical operation set.
    pub fn reset(&mut self) {
        self.reducers.clear();
        self.unresolved.clear();
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty() && self.unresolved.is_empty()
    }
}
