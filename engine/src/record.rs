//! Records and their execution context.
//!
//! A [`Context`] is the explicit unit of isolation: it mints local ids,
//! keeps an id-indexed registry of the records created through it, and is
//! threaded through every API call — there is no ambient global state.
//! The registry holds weak handles only; ownership of a record stays with
//! the calling application.
//!
//! A [`Record`] is a cheap clonable handle over shared state. Every
//! mutator routes through the ledger and applies the optimistic field
//! update inside one critical section, so ledger and field table can never
//! disagree.

use crate::error::{Error, Result};
use crate::identity::{LocalIdSource, UuidSource};
use crate::ledger::Ledger;
use crate::operation::Operation;
use crate::path;
use crate::value::{RecordRef, Value};
use crate::{ClassName, FieldName, LocalId, ServerId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use uuid::Uuid;

/// Server-assigned state merged into a record after a successful save or
/// fetch.
#[derive(Debug, Clone, Default)]
pub struct ServerDelta {
    /// Newly assigned identity, for records created by this save
    pub identity: Option<ServerId>,
    /// Server-side creation time
    pub created_at: Option<DateTime<Utc>>,
    /// Server-side last-update time
    pub updated_at: Option<DateTime<Utc>>,
    /// Fields the server overwrote or computed
    pub fields: BTreeMap<FieldName, Value>,
}

struct RegistryEntry {
    cell: Weak<RecordCell>,
    identity: Option<ServerId>,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<LocalId, RegistryEntry>,
    by_identity: HashMap<(ClassName, ServerId), LocalId>,
}

pub(crate) struct ContextInner {
    id: String,
    ids: Box<dyn LocalIdSource>,
    registry: Mutex<Registry>,
}

/// An explicit execution context owning the record registry.
#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Arc<ContextInner>,
}

impl Context {
    /// Create a context with the default UUID id source.
    pub fn new() -> Self {
        Self::with_id_source(UuidSource)
    }

    /// Create a context with a custom local-id source.
    pub fn with_id_source(source: impl LocalIdSource + 'static) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: Uuid::new_v4().simple().to_string(),
                ids: Box::new(source),
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Process-unique id of this context.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Create a newborn record of the given class.
    pub fn create(&self, class: impl Into<ClassName>) -> Record {
        let class = class.into();
        let local_id = self.inner.ids.next_id();
        self.materialize(class, local_id, None)
    }

    /// Return the record for a server identity, creating an empty
    /// persisted record if none is registered yet. Decoding the same
    /// pointer twice yields the same record handle.
    pub fn record_for(&self, class: impl Into<ClassName>, identity: impl Into<ServerId>) -> Record {
        let class = class.into();
        let identity = identity.into();

        if let Some(record) = self.lookup_by_identity(&class, &identity) {
            return record;
        }

        let local_id = self.inner.ids.next_id();
        self.materialize(class, local_id, Some(identity))
    }

    fn lookup_by_identity(&self, class: &str, identity: &str) -> Option<Record> {
        let registry = self.registry();
        let local_id = registry
            .by_identity
            .get(&(class.to_string(), identity.to_string()))?;
        let cell = registry.entries.get(local_id)?.cell.upgrade()?;
        Some(Record { cell })
    }

    fn materialize(
        &self,
        class: ClassName,
        local_id: LocalId,
        identity: Option<ServerId>,
    ) -> Record {
        let cell = Arc::new(RecordCell {
            context: Arc::downgrade(&self.inner),
            class: class.clone(),
            local_id: local_id.clone(),
            state: Mutex::new(RecordState {
                identity: identity.clone(),
                ..RecordState::default()
            }),
        });

        let mut registry = self.registry();
        registry.entries.insert(
            local_id.clone(),
            RegistryEntry {
                cell: Arc::downgrade(&cell),
                identity: identity.clone(),
            },
        );
        if let Some(identity) = identity {
            registry.by_identity.insert((class, identity), local_id);
        }

        Record { cell }
    }

    /// Resolve a reference to a live record handle.
    pub fn resolve(&self, reference: &RecordRef) -> Option<Record> {
        let registry = self.registry();
        let cell = registry.entries.get(&reference.local_id)?.cell.upgrade()?;
        Some(Record { cell })
    }

    /// Server identity of a referenced record, if it has one. Works even
    /// after the application dropped the record handle, because the
    /// registry keeps the id mapping alive.
    pub fn identity_of(&self, reference: &RecordRef) -> Option<ServerId> {
        let registry = self.registry();
        let entry = registry.entries.get(&reference.local_id)?;
        if let Some(cell) = entry.cell.upgrade() {
            let record = Record { cell };
            return record.identity();
        }
        entry.identity.clone()
    }

    /// Whether a reference points at a record this context has ever
    /// registered.
    pub fn contains(&self, reference: &RecordRef) -> bool {
        self.registry().entries.contains_key(&reference.local_id)
    }

    /// The single context shared by all given records.
    ///
    /// Fails with [`Error::Inconsistency`] when the set is empty, a record
    /// outlived its context, or two records belong to different contexts.
    pub fn shared(records: &[Record]) -> Result<Context> {
        let mut iter = records.iter();
        let first = iter
            .next()
            .ok_or_else(|| Error::Inconsistency("no records given".into()))?;
        let ctx = first
            .context()
            .ok_or_else(|| Error::Inconsistency("record outlived its context".into()))?;

        for record in iter {
            let other = record
                .context()
                .ok_or_else(|| Error::Inconsistency("record outlived its context".into()))?;
            if !Arc::ptr_eq(&ctx.inner, &other.inner) {
                return Err(Error::Inconsistency(
                    "records span multiple execution contexts".into(),
                ));
            }
        }
        Ok(ctx)
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("id", &self.inner.id).finish()
    }
}

#[derive(Debug, Default)]
struct RecordState {
    identity: Option<ServerId>,
    fields: BTreeMap<FieldName, Value>,
    ledger: Ledger,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    deleted: bool,
}

#[derive(Debug)]
pub(crate) struct RecordCell {
    context: Weak<ContextInner>,
    class: ClassName,
    local_id: LocalId,
    state: Mutex<RecordState>,
}

/// A client-side mirror of a server-stored entity.
#[derive(Debug, Clone)]
pub struct Record {
    cell: Arc<RecordCell>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Eq for Record {}

impl Record {
    /// The record's class.
    pub fn class(&self) -> &str {
        &self.cell.class
    }

    /// Stable process-local id, present from creation.
    pub fn local_id(&self) -> &str {
        &self.cell.local_id
    }

    /// Server-assigned identity, if the record has been persisted.
    pub fn identity(&self) -> Option<ServerId> {
        self.state().identity.clone()
    }

    /// True until the server assigns an identity.
    pub fn is_newborn(&self) -> bool {
        self.state().identity.is_none()
    }

    /// True after a successful delete.
    pub fn is_deleted(&self) -> bool {
        self.state().deleted
    }

    /// Server-side creation time, if known.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.state().created_at
    }

    /// Server-side last-update time, if known.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.state().updated_at
    }

    /// True while the record has data the server has not seen: pending
    /// mutations, or the record itself is newborn.
    pub fn is_dirty(&self) -> bool {
        let state = self.state();
        state.identity.is_none() || !state.ledger.is_empty()
    }

    /// The context this record was created through.
    pub fn context(&self) -> Option<Context> {
        self.cell.context.upgrade().map(|inner| Context { inner })
    }

    /// A graph reference to this record.
    pub fn reference(&self) -> RecordRef {
        RecordRef::new(self.cell.class.clone(), self.cell.local_id.clone())
    }

    /// Current value of a top-level field.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state().fields.get(key).cloned()
    }

    /// Current value at a dotted path. Fails with [`Error::NotFound`] when
    /// any segment is absent.
    pub fn get_at(&self, key: &str) -> Result<Value> {
        let target = crate::operation::FieldPath::parse(key)?;
        let state = self.state();
        path::resolve(&state.fields, &target).map(Value::clone)
    }

    /// Snapshot of the whole field table.
    pub fn fields(&self) -> BTreeMap<FieldName, Value> {
        self.state().fields.clone()
    }

    /// Overwrite `key` with `value`.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.perform(Operation::set(key, value.into())?)
    }

    /// Point `key` at another record of the same context.
    pub fn set_pointer(&self, key: &str, target: &Record) -> Result<()> {
        self.check_same_context(target)?;
        self.perform(Operation::set(key, Value::Pointer(target.reference()))?)
    }

    /// Remove `key`.
    pub fn delete_field(&self, key: &str) -> Result<()> {
        self.perform(Operation::delete(key)?)
    }

    /// Add `amount` to the number at `key`.
    pub fn increment(&self, key: &str, amount: f64) -> Result<()> {
        self.perform(Operation::increment(key, amount)?)
    }

    /// Append `items` to the array at `key`.
    pub fn add(&self, key: &str, items: Vec<Value>) -> Result<()> {
        self.perform(Operation::add(key, items)?)
    }

    /// Append the not-yet-present subset of `items` to the array at `key`.
    pub fn add_unique(&self, key: &str, items: Vec<Value>) -> Result<()> {
        self.perform(Operation::add_unique(key, items)?)
    }

    /// Remove all elements equal to one of `items` from the array at `key`.
    pub fn remove(&self, key: &str, items: Vec<Value>) -> Result<()> {
        self.perform(Operation::remove(key, items)?)
    }

    /// Add `targets` to the relation at `key`.
    pub fn add_relation(&self, key: &str, targets: &[Record]) -> Result<()> {
        let refs = self.refs_for(targets)?;
        self.perform(Operation::add_relation(key, refs)?)
    }

    /// Remove `targets` from the relation at `key`.
    pub fn remove_relation(&self, key: &str, targets: &[Record]) -> Result<()> {
        let refs = self.refs_for(targets)?;
        self.perform(Operation::remove_relation(key, refs)?)
    }

    /// Route an already-validated operation through the ledger and apply
    /// it optimistically, as one atomic unit.
    pub fn perform(&self, op: Operation) -> Result<()> {
        let mut state = self.state();
        let live = path::resolve(&state.fields, op.target()).ok().cloned();
        state.ledger.reduce(op.clone(), live.as_ref())?;
        path::apply(&mut state.fields, op.target(), |slot| op.apply_to(slot));
        Ok(())
    }

    /// The ledger's replayable per-field operation sequences.
    pub fn operation_stack(&self) -> BTreeMap<String, Vec<Operation>> {
        self.state().ledger.operation_stack()
    }

    /// The ledger flattened into wire-shaped operation tables.
    pub fn operation_tables(&self) -> Vec<BTreeMap<String, Operation>> {
        self.state().ledger.operation_table_list()
    }

    /// True when the ledger tracks no mutations.
    pub fn has_empty_ledger(&self) -> bool {
        self.state().ledger.is_empty()
    }

    /// Merge server-assigned state after a successful save.
    pub fn merge_delta(&self, delta: ServerDelta) {
        {
            let mut state = self.state();
            if delta.identity.is_some() {
                state.identity = delta.identity.clone();
            }
            if delta.created_at.is_some() {
                state.created_at = delta.created_at;
            }
            if delta.updated_at.is_some() {
                state.updated_at = delta.updated_at;
            }
            for (field, value) in delta.fields {
                state.fields.insert(field, value);
            }
        }

        // Keep the registry's identity index current so references to this
        // record resolve to a real identity even without the live handle.
        if let Some(identity) = delta.identity {
            if let Some(inner) = self.cell.context.upgrade() {
                let mut registry = inner
                    .registry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Some(entry) = registry.entries.get_mut(&self.cell.local_id) {
                    entry.identity = Some(identity.clone());
                }
                registry
                    .by_identity
                    .insert((self.cell.class.clone(), identity), self.cell.local_id.clone());
            }
        }
    }

    /// Drop all pending mutations. Called only after a fully successful
    /// save.
    pub fn clear_pending(&self) {
        self.state().ledger.reset();
    }

    /// Tombstone the record after a successful delete. Pending mutations
    /// are discarded; the identity is kept so the tombstone stays
    /// addressable.
    pub fn mark_deleted(&self) {
        let mut state = self.state();
        state.deleted = true;
        state.ledger.reset();
    }

    /// Replace the base field table with fetched server state, then replay
    /// the pending operation stack on top so unsynced local mutations stay
    /// optimistically visible.
    pub fn replace_base(
        &self,
        fields: BTreeMap<FieldName, Value>,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    ) {
        let mut state = self.state();
        state.fields = fields;
        if created_at.is_some() {
            state.created_at = created_at;
        }
        if updated_at.is_some() {
            state.updated_at = updated_at;
        }
        state.deleted = false;

        let stack = state.ledger.operation_stack();
        for ops in stack.values() {
            for op in ops {
                path::apply(&mut state.fields, op.target(), |slot| op.apply_to(slot));
            }
        }
    }

    fn refs_for(&self, targets: &[Record]) -> Result<BTreeSet<RecordRef>> {
        let mut refs = BTreeSet::new();
        for target in targets {
            self.check_same_context(target)?;
            refs.insert(target.reference());
        }
        Ok(refs)
    }

    fn check_same_context(&self, other: &Record) -> Result<()> {
        if Weak::ptr_eq(&self.cell.context, &other.cell.context) {
            Ok(())
        } else {
            Err(Error::Inconsistency(
                "records span multiple execution contexts".into(),
            ))
        }
    }

    fn state(&self) -> MutexGuard<'_, RecordState> {
        self.cell
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
