//! Per-object metadata and change tracking.
//!
//! An [`ObjectInfo`] carries everything the store knows about one live
//! object: its schema, one [`Variable`] per column, its pending add/remove
//! state, the flush state machine, and its event system. Application code
//! holds `Arc<ObjectInfo>` handles; the store's identity map holds weak
//! references to the same allocations.
//!
//! All mutation happens under an internal lock that is released before
//! events are emitted, so callbacks may read the object freely.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use squall_core::schema::TableSchema;
use squall_core::{Constraint, Error, Result, Value};

use crate::alive::IdentityKey;
use crate::event::{EventPayload, EventSystem};
use crate::variable::{LazyValue, VarState, Variable};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to a live object.
pub type ObjectRef = Arc<ObjectInfo>;

/// Whether the object awaits an insert or a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pending {
    #[default]
    None,
    Add,
    Remove,
}

/// Flush state machine. `Flushing` is transient within one flush pass; an
/// object skipped because a dependency stayed unresolved goes back to
/// `Dirty` and is requeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushState {
    #[default]
    Clean,
    Dirty,
    Flushing,
    Failed,
}

#[derive(Debug, Default)]
struct ObjectData {
    variables: Vec<Variable>,
    pending: Pending,
    flush_state: FlushState,
    invalidated: bool,
    /// Set once a delete for this object is executed, or a reload finds
    /// no row. Lost objects reject further store operations.
    lost: bool,
    store_id: Option<u64>,
    identity: Option<IdentityKey>,
}

/// Metadata and state for one live object.
pub struct ObjectInfo {
    schema: Arc<TableSchema>,
    table_id: usize,
    object_id: u64,
    events: EventSystem,
    data: Mutex<ObjectData>,
}

impl std::fmt::Debug for ObjectInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectInfo")
            .field("table", &self.schema.table())
            .field("object_id", &self.object_id)
            .finish_non_exhaustive()
    }
}

impl ObjectInfo {
    /// Build a fresh, fully undefined object for a schema.
    pub fn new(schema: Arc<TableSchema>, table_id: usize) -> ObjectRef {
        let variables = (0..schema.len()).map(|_| Variable::new()).collect();
        Arc::new(Self {
            schema,
            table_id,
            object_id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            events: EventSystem::new(),
            data: Mutex::new(ObjectData {
                variables,
                ..ObjectData::default()
            }),
        })
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn table_id(&self) -> usize {
        self.table_id
    }

    /// Monotone id assigned at construction; the store uses it for
    /// dirty-since ordering.
    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    pub fn events(&self) -> &EventSystem {
        &self.events
    }

    fn lock(&self) -> MutexGuard<'_, ObjectData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read a column's in-memory value.
    ///
    /// A lazy reference to another object is chased when that object's key
    /// is already known; it is never resolved from the backend here — that
    /// round-trip belongs to the store's read path.
    pub fn get(&self, column: &str) -> Result<Value> {
        let index = self.column_index(column)?;
        let state = {
            let data = self.lock();
            if data.lost {
                return Err(Error::lost_object(self.describe_locked(&data)));
            }
            data.variables[index].state().clone()
        };
        match state {
            VarState::Set(v) => Ok(v),
            VarState::Lazy(LazyValue::Reference { target, column: c }) => target
                .upgrade()
                .and_then(|t| t.resolved_key_value(c))
                .ok_or_else(|| Error::not_loaded(column)),
            VarState::Undefined | VarState::Lazy(LazyValue::AutoReload { .. }) => {
                Err(Error::not_loaded(column))
            }
        }
    }

    /// Assign a column from application code. Publishes `Changed` when the
    /// stored value actually changed.
    pub fn set(&self, column: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.column_index(column)?;
        let def = &self.schema.columns()[index];
        let changed = {
            let mut data = self.lock();
            if data.lost {
                return Err(Error::lost_object(self.describe_locked(&data)));
            }
            let changed = data.variables[index].set(def, value.into(), false)?;
            if changed.is_some() {
                data.flush_state = FlushState::Dirty;
            }
            changed
        };
        if changed.is_some() {
            self.events.emit(&EventPayload::Changed {
                column: index,
                from_db: false,
            });
        }
        Ok(())
    }

    /// Point a column at another object's primary key.
    ///
    /// When the target key is already known the column gets the concrete
    /// value right away; otherwise the column goes lazy and the flush
    /// engine orders the target's insert first.
    pub fn set_reference(&self, column: &str, target: &ObjectRef) -> Result<()> {
        let index = self.column_index(column)?;
        let pk = target.schema.primary_key();
        if pk.len() != 1 {
            return Err(Error::Custom(format!(
                "reference target '{}' must have a single-column primary key",
                target.schema.table()
            )));
        }
        let key_column = pk[0];

        if let Some(value) = target.resolved_key_value(key_column) {
            return self.set(column, value);
        }

        {
            let mut data = self.lock();
            if data.lost {
                return Err(Error::lost_object(self.describe_locked(&data)));
            }
            data.variables[index].set_lazy(
                LazyValue::Reference {
                    target: Arc::downgrade(target),
                    column: key_column,
                },
                true,
            );
            data.flush_state = FlushState::Dirty;
        }
        self.events.emit(&EventPayload::Changed {
            column: index,
            from_db: false,
        });
        Ok(())
    }

    /// Load columns from a backend row. Hydrated variables come out clean
    /// and the invalidation flag is lifted.
    pub fn hydrate(&self, row: &squall_core::Row) -> Result<()> {
        let mut touched = Vec::new();
        {
            let mut data = self.lock();
            for (name, value) in row.iter() {
                if let Some(index) = self.schema.column_index(name) {
                    let def = &self.schema.columns()[index];
                    let var = &mut data.variables[index];
                    // A lazy cell catching up with the backend resolves;
                    // anything else is a plain hydration set.
                    if var.lazy_value().is_some() {
                        var.resolve(def, value.clone())?;
                    } else {
                        var.set(def, value.clone(), true)?;
                    }
                    touched.push(index);
                }
            }
            data.invalidated = false;
            data.lost = false;
        }
        for index in touched {
            self.events.emit(&EventPayload::Changed {
                column: index,
                from_db: true,
            });
        }
        Ok(())
    }

    /// Discard all non-key state so the next read reloads (rollback).
    pub fn invalidate(&self) {
        {
            let mut data = self.lock();
            let pk = self.schema.primary_key();
            for (index, var) in data.variables.iter_mut().enumerate() {
                if !pk.contains(&index) {
                    var.unset();
                }
            }
            data.invalidated = true;
            data.pending = Pending::None;
            data.flush_state = FlushState::Clean;
        }
        self.events.emit(&EventPayload::Invalidated);
    }

    pub fn is_invalidated(&self) -> bool {
        self.lock().invalidated
    }

    /// Whether this object is gone from its store.
    pub fn is_lost(&self) -> bool {
        self.lock().lost
    }

    pub(crate) fn mark_lost(&self) {
        self.lock().lost = true;
    }

    pub fn pending(&self) -> Pending {
        self.lock().pending
    }

    pub(crate) fn set_pending(&self, pending: Pending) {
        self.lock().pending = pending;
    }

    pub fn flush_state(&self) -> FlushState {
        self.lock().flush_state
    }

    pub(crate) fn set_flush_state(&self, state: FlushState) {
        self.lock().flush_state = state;
    }

    /// Any variable dirty, or an add/remove pending.
    pub fn is_dirty(&self) -> bool {
        let data = self.lock();
        data.pending != Pending::None || data.variables.iter().any(Variable::is_dirty)
    }

    pub(crate) fn identity(&self) -> Option<IdentityKey> {
        self.lock().identity
    }

    pub(crate) fn set_identity(&self, key: IdentityKey) {
        self.lock().identity = Some(key);
    }

    /// Bind this object to a store, or verify the binding.
    pub(crate) fn bind_store(&self, store_id: u64) -> Result<()> {
        let mut data = self.lock();
        match data.store_id {
            None => {
                data.store_id = Some(store_id);
                Ok(())
            }
            Some(bound) if bound == store_id => Ok(()),
            Some(_) => Err(Error::wrong_store(self.describe_locked(&data))),
        }
    }

    /// The key value usable in WHERE clauses and reference resolution:
    /// the concrete value, or the backend's insert identity when the key
    /// is still awaiting its reload.
    pub(crate) fn resolved_key_value(&self, column: usize) -> Option<Value> {
        let data = self.lock();
        match data.variables[column].state() {
            VarState::Set(v) => Some(v.clone()),
            VarState::Lazy(LazyValue::AutoReload {
                row_handle: Some(h),
            }) => Some(Value::Int(*h)),
            _ => None,
        }
    }

    /// Concrete primary-key tuple, when every key column is set.
    pub fn primary_key_values(&self) -> Option<Vec<Value>> {
        let data = self.lock();
        self.schema
            .primary_key()
            .iter()
            .map(|&i| data.variables[i].value().cloned())
            .collect()
    }

    /// WHERE constraints locating this object's row.
    pub(crate) fn key_constraints(&self) -> Result<Vec<Constraint>> {
        self.schema
            .primary_key()
            .iter()
            .map(|&i| {
                let name = &self.schema.columns()[i].name;
                self.resolved_key_value(i)
                    .map(|v| Constraint::eq(name.clone(), v))
                    .ok_or_else(|| Error::not_loaded(name.clone()))
            })
            .collect()
    }

    /// Columns and values for an INSERT: every defined variable. Lazy and
    /// undefined columns are omitted; the backend fills them in.
    pub(crate) fn insert_columns(&self) -> Vec<(String, Value)> {
        let data = self.lock();
        self.schema
            .columns()
            .iter()
            .zip(data.variables.iter())
            .filter_map(|(def, var)| var.value().map(|v| (def.name.clone(), v.clone())))
            .collect()
    }

    /// Assignments for an UPDATE: the dirty, defined variables.
    pub(crate) fn update_assignments(&self) -> Vec<(String, Value)> {
        let data = self.lock();
        self.schema
            .columns()
            .iter()
            .zip(data.variables.iter())
            .filter_map(|(def, var)| {
                if var.is_dirty() {
                    var.value().map(|v| (def.name.clone(), v.clone()))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Targets of lazy references whose key is still unknown.
    pub(crate) fn unresolved_references(&self) -> Vec<ObjectRef> {
        let lazies: Vec<(std::sync::Weak<ObjectInfo>, usize)> = {
            let data = self.lock();
            data.variables
                .iter()
                .filter_map(|var| match var.state() {
                    VarState::Lazy(LazyValue::Reference { target, column }) => {
                        Some((target.clone(), *column))
                    }
                    _ => None,
                })
                .collect()
        };
        lazies
            .into_iter()
            .filter_map(|(target, column)| {
                let target = target.upgrade()?;
                if target.resolved_key_value(column).is_none() {
                    Some(target)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Replace resolvable lazy references with their concrete values so the
    /// columns participate in the next statement. Returns false if any
    /// reference is still blocked.
    pub(crate) fn resolve_references(&self) -> Result<bool> {
        let lazies: Vec<(usize, std::sync::Weak<ObjectInfo>, usize)> = {
            let data = self.lock();
            data.variables
                .iter()
                .enumerate()
                .filter_map(|(i, var)| match var.state() {
                    VarState::Lazy(LazyValue::Reference { target, column }) => {
                        Some((i, target.clone(), *column))
                    }
                    _ => None,
                })
                .collect()
        };
        let mut complete = true;
        for (index, target, key_column) in lazies {
            let value = target
                .upgrade()
                .and_then(|t| t.resolved_key_value(key_column));
            match value {
                Some(value) => {
                    let def = &self.schema.columns()[index];
                    let mut data = self.lock();
                    data.variables[index].set(def, value, false)?;
                }
                None => complete = false,
            }
        }
        Ok(complete)
    }

    /// Settle state after a successful INSERT. Omitted generated columns
    /// (the primary key included) go lazy, carrying the backend's insert
    /// identity for the eventual reload.
    pub(crate) fn after_insert(&self, insert_id: Option<i64>) {
        {
            let mut data = self.lock();
            let schema = Arc::clone(&self.schema);
            for (index, var) in data.variables.iter_mut().enumerate() {
                let def = &schema.columns()[index];
                if !var.is_defined() && (def.generated || def.primary_key) {
                    var.set_lazy(
                        LazyValue::AutoReload {
                            row_handle: insert_id,
                        },
                        false,
                    );
                } else {
                    var.mark_clean();
                }
            }
            data.pending = Pending::None;
            data.flush_state = FlushState::Clean;
        }
        self.events.emit(&EventPayload::Flushed);
    }

    /// Settle state after a successful UPDATE.
    pub(crate) fn after_update(&self) {
        {
            let mut data = self.lock();
            for var in &mut data.variables {
                var.mark_clean();
            }
            data.flush_state = FlushState::Clean;
        }
        self.events.emit(&EventPayload::Flushed);
    }

    /// Settle state after a successful DELETE.
    pub(crate) fn after_delete(&self) {
        {
            let mut data = self.lock();
            data.pending = Pending::None;
            data.flush_state = FlushState::Clean;
            data.lost = true;
        }
        self.events.emit(&EventPayload::Removed);
    }

    /// Whether a column currently awaits an auto-reload.
    pub(crate) fn awaiting_reload(&self, index: usize) -> Option<Option<i64>> {
        let data = self.lock();
        match data.variables[index].state() {
            VarState::Lazy(LazyValue::AutoReload { row_handle }) => Some(*row_handle),
            _ => None,
        }
    }

    /// Human-readable identity for logs and errors: `table(pk)` when the
    /// key is known, `table(#object-id)` before that.
    pub fn describe(&self) -> String {
        let data = self.lock();
        self.describe_locked(&data)
    }

    fn describe_locked(&self, data: &ObjectData) -> String {
        let keys: Option<Vec<String>> = self
            .schema
            .primary_key()
            .iter()
            .map(|&i| data.variables[i].value().map(|v| format!("{:?}", v)))
            .collect();
        match keys {
            Some(keys) if !keys.is_empty() => {
                format!("{}({})", self.schema.table(), keys.join(", "))
            }
            _ => format!("{}(#{})", self.schema.table(), self.object_id),
        }
    }

    fn column_index(&self, column: &str) -> Result<usize> {
        self.schema.column_index(column).ok_or_else(|| {
            Error::Custom(format!(
                "table '{}' has no column '{}'",
                self.schema.table(),
                column
            ))
        })
    }
}
