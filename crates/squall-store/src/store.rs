//! The store: one backend connection, one identity map, one dirty log.
//!
//! A [`Store`] is the unit of isolation. It owns a blocking
//! [`Connection`], the schemas registered with it, the identity map that
//! guarantees at most one live object per database row, and the ordered
//! log of objects with unflushed changes. A store is single-threaded by
//! construction; two stores never share objects, and handing an object
//! from one store to another fails with `WrongStore`.
//!
//! Reads prefer memory. `get` and `find` return the live object when the
//! identity map has one, discarding whatever the backend row said, so
//! unflushed changes are never clobbered by a query. Reads that do need
//! the backend, a column awaiting its post-insert reload or an object
//! invalidated by rollback, go through [`Store::value`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use squall_core::schema::{SchemaRegistry, TableSchema};
use squall_core::statement::{Constraint, Select};
use squall_core::{Connection, Error, NotOneError, Result, Value};

use crate::alive::{AliveMap, IdentityKey};
use crate::cache::RecencyCache;
use crate::event::{EventKind, EventPayload, HookAction};
use crate::flush::{self, FlushResult};
use crate::info::{FlushState, ObjectInfo, ObjectRef, Pending};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Store tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// How many recently used clean objects to keep strongly referenced.
    /// Zero disables the recency cache; objects then live exactly as long
    /// as application handles do.
    pub cache_size: usize,
    /// Flush pending changes before `get`/`find` hit the backend, so
    /// queries observe this store's own writes.
    pub flush_before_find: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_size: 100,
            flush_before_find: false,
        }
    }
}

impl StoreConfig {
    pub fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    pub fn flush_before_find(mut self, flush: bool) -> Self {
        self.flush_before_find = flush;
        self
    }
}

/// Objects with unflushed changes, in the order they first became dirty.
#[derive(Debug, Default)]
struct DirtyLog {
    order: Vec<(u64, Weak<ObjectInfo>)>,
    seen: HashSet<u64>,
}

impl DirtyLog {
    fn note(&mut self, obj: &ObjectRef) {
        if self.seen.insert(obj.object_id()) {
            self.order.push((obj.object_id(), Arc::downgrade(obj)));
        }
    }

    fn remove(&mut self, object_id: u64) {
        if self.seen.remove(&object_id) {
            self.order.retain(|(id, _)| *id != object_id);
        }
    }

    /// Take the log in dirty-since order, dropping dead entries.
    fn take(&mut self) -> Vec<ObjectRef> {
        self.seen.clear();
        self.order
            .drain(..)
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

/// An object cache and flush engine in front of one connection.
pub struct Store<C: Connection> {
    conn: C,
    config: StoreConfig,
    store_id: u64,
    registry: SchemaRegistry,
    alive: AliveMap,
    cache: RecencyCache,
    dirty: Arc<Mutex<DirtyLog>>,
    temp_serial: u64,
}

impl<C: Connection> Store<C> {
    pub fn new(conn: C) -> Self {
        Self::with_config(conn, StoreConfig::default())
    }

    pub fn with_config(conn: C, config: StoreConfig) -> Self {
        Self {
            conn,
            config,
            store_id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            registry: SchemaRegistry::new(),
            alive: AliveMap::new(),
            cache: RecencyCache::new(config.cache_size),
            dirty: Arc::new(Mutex::new(DirtyLog::default())),
            temp_serial: 0,
        }
    }

    /// Register a mapped table with this store, returning its table id.
    pub fn register(&mut self, schema: TableSchema) -> usize {
        self.registry.register(schema)
    }

    /// The underlying connection, for statements outside the mapped API.
    pub fn connection(&mut self) -> &mut C {
        &mut self.conn
    }

    fn dirty(&self) -> MutexGuard<'_, DirtyLog> {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn table(&self, table: &str) -> Result<(usize, Arc<TableSchema>)> {
        let id = self
            .registry
            .id_of(table)
            .ok_or_else(|| Error::Custom(format!("table '{table}' is not registered")))?;
        let schema = self
            .registry
            .get(id)
            .ok_or_else(|| Error::Custom(format!("table '{table}' is not registered")))?;
        Ok((id, Arc::clone(schema)))
    }

    /// Build a fresh object for a registered table. The object tracks its
    /// changes immediately but joins the store only on [`Store::add`].
    pub fn new_object(&mut self, table: &str) -> Result<ObjectRef> {
        let (table_id, schema) = self.table(table)?;
        Ok(self.construct(table_id, &schema))
    }

    fn construct(&self, table_id: usize, schema: &Arc<TableSchema>) -> ObjectRef {
        let obj = ObjectInfo::new(Arc::clone(schema), table_id);
        self.watch(&obj);
        obj
    }

    /// Feed application-side changes into the dirty log. Hydration events
    /// (`from_db`) never dirty an object.
    fn watch(&self, obj: &ObjectRef) {
        let log = Arc::clone(&self.dirty);
        let weak = Arc::downgrade(obj);
        obj.events().hook(EventKind::Changed, move |payload| {
            if let EventPayload::Changed { from_db: false, .. } = payload {
                if let Some(obj) = weak.upgrade() {
                    log.lock().unwrap_or_else(PoisonError::into_inner).note(&obj);
                }
            }
            Ok(HookAction::Keep)
        });
    }

    /// Schedule an object for insertion.
    ///
    /// Re-adding an object whose removal is pending cancels the removal.
    /// Adding an object that already lives in this store is a no-op;
    /// adding one bound to another store fails with `WrongStore`.
    pub fn add(&mut self, obj: &ObjectRef) -> Result<()> {
        obj.bind_store(self.store_id)?;
        if obj.is_lost() {
            return Err(Error::lost_object(obj.describe()));
        }
        match obj.pending() {
            Pending::Add => Ok(()),
            Pending::Remove => {
                obj.set_pending(Pending::None);
                self.dirty().note(obj);
                Ok(())
            }
            Pending::None => {
                if obj.identity().is_some() {
                    // already persistent in this store
                    return Ok(());
                }
                self.temp_serial += 1;
                let key = IdentityKey::temporary(obj.table_id(), self.temp_serial);
                obj.set_identity(key);
                obj.set_pending(Pending::Add);
                obj.set_flush_state(FlushState::Dirty);
                self.alive.insert(key, obj);
                self.dirty().note(obj);
                self.cache.note(obj);
                Ok(())
            }
        }
    }

    /// Schedule an object for deletion.
    ///
    /// Removing an object that was added but never flushed cancels the
    /// insertion outright; nothing reaches the backend.
    pub fn remove(&mut self, obj: &ObjectRef) -> Result<()> {
        obj.bind_store(self.store_id)?;
        match obj.pending() {
            Pending::Remove => Ok(()),
            Pending::Add => {
                if let Some(key) = obj.identity() {
                    self.alive.remove(&key);
                }
                self.cache.remove(obj);
                self.dirty().remove(obj.object_id());
                obj.set_pending(Pending::None);
                obj.set_flush_state(FlushState::Clean);
                Ok(())
            }
            Pending::None => {
                if obj.identity().is_none() {
                    return Err(Error::Custom(format!(
                        "{} is not in the store",
                        obj.describe()
                    )));
                }
                obj.set_pending(Pending::Remove);
                obj.set_flush_state(FlushState::Dirty);
                self.dirty().note(obj);
                Ok(())
            }
        }
    }

    /// Fetch one object by primary key.
    ///
    /// The identity map is consulted first: a live object comes back
    /// as-is, unflushed changes intact, without touching the backend. An
    /// object whose removal is pending reads as absent.
    pub fn get(&mut self, table: &str, key: &[Value]) -> Result<Option<ObjectRef>> {
        let (table_id, schema) = self.table(table)?;
        if schema.primary_key().len() != key.len() {
            return Err(Error::Custom(format!(
                "table '{table}' has a {}-column primary key, got {} value(s)",
                schema.primary_key().len(),
                key.len()
            )));
        }
        if self.config.flush_before_find {
            self.flush()?;
        }

        let identity = IdentityKey::of(table_id, key);
        if let Some(obj) = self.alive.get(&identity) {
            if obj.pending() == Pending::Remove {
                return Ok(None);
            }
            if obj.is_invalidated() && !self.reload(&obj)? {
                return Ok(None);
            }
            self.cache.note(&obj);
            return Ok(Some(obj));
        }

        let where_clause = schema
            .primary_key()
            .iter()
            .zip(key)
            .map(|(&i, value)| Constraint::eq(schema.columns()[i].name.clone(), value.clone()))
            .collect();
        let select = Select {
            table: schema.table().to_string(),
            columns: schema.column_names(),
            where_clause,
        };
        let rows = self.conn.query(&select)?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let obj = self.construct(table_id, &schema);
        obj.bind_store(self.store_id)?;
        obj.hydrate(&row)?;
        obj.set_identity(identity);
        self.alive.insert(identity, &obj);
        self.cache.note(&obj);
        Ok(Some(obj))
    }

    /// Query objects matching the given constraints, ANDed together.
    ///
    /// Rows whose identity is already live resolve to the existing object
    /// and the fetched row is discarded, so in-memory state wins.
    pub fn find(&mut self, table: &str, constraints: Vec<Constraint>) -> Result<ResultSet> {
        let (table_id, schema) = self.table(table)?;
        if self.config.flush_before_find {
            self.flush()?;
        }

        let select = Select {
            table: schema.table().to_string(),
            columns: schema.column_names(),
            where_clause: constraints,
        };
        let rows = self.conn.query(&select)?;

        let mut objects = Vec::with_capacity(rows.len());
        for row in rows {
            let key: Vec<Value> = schema
                .primary_key()
                .iter()
                .map(|&i| row.require(&schema.columns()[i].name).cloned())
                .collect::<Result<_>>()?;
            let identity = IdentityKey::of(table_id, &key);

            let obj = match self.alive.get(&identity) {
                Some(obj) => {
                    if obj.is_invalidated() {
                        obj.hydrate(&row)?;
                    }
                    obj
                }
                None => {
                    let obj = self.construct(table_id, &schema);
                    obj.bind_store(self.store_id)?;
                    obj.hydrate(&row)?;
                    obj.set_identity(identity);
                    self.alive.insert(identity, &obj);
                    obj
                }
            };
            self.cache.note(&obj);
            objects.push(obj);
        }
        Ok(ResultSet { objects })
    }

    /// Read a column, going to the backend when the in-memory value is
    /// not usable.
    ///
    /// This is where deferred work happens: a column awaiting its
    /// post-insert reload triggers a SELECT keyed on the insert identity,
    /// an invalidated object is rehydrated, and a pending reference forces
    /// a flush so the target's key exists. A reload that finds no row
    /// marks the object lost.
    pub fn value(&mut self, obj: &ObjectRef, column: &str) -> Result<Value> {
        obj.bind_store(self.store_id)?;
        match obj.get(column) {
            Ok(value) => return Ok(value),
            Err(Error::NotLoaded(_)) => {}
            Err(e) => return Err(e),
        }

        let index = obj.schema().column_index(column).ok_or_else(|| {
            Error::Custom(format!(
                "table '{}' has no column '{column}'",
                obj.schema().table()
            ))
        })?;

        if obj.is_invalidated() || obj.awaiting_reload(index).is_some() {
            if !self.reload(obj)? {
                return Err(Error::lost_object(obj.describe()));
            }
            self.rekey_if_resolved(obj);
        } else if !obj.unresolved_references().is_empty() {
            self.flush()?;
        } else {
            return Err(Error::not_loaded(column));
        }
        self.cache.note(obj);
        obj.get(column)
    }

    /// Fetch the object's row and rehydrate. False means the row is gone;
    /// the object is marked lost.
    fn reload(&mut self, obj: &ObjectRef) -> Result<bool> {
        let where_clause = obj.key_constraints()?;
        let select = Select {
            table: obj.schema().table().to_string(),
            columns: obj.schema().column_names(),
            where_clause,
        };
        tracing::debug!(object = %obj.describe(), "reload");
        let rows = self.conn.query(&select)?;
        let Some(row) = rows.into_iter().next() else {
            obj.mark_lost();
            return Ok(false);
        };
        obj.hydrate(&row)?;
        Ok(true)
    }

    /// Swap a temporary identity for the real one once the key is known.
    fn rekey_if_resolved(&mut self, obj: &ObjectRef) {
        let Some(old) = obj.identity() else { return };
        if !old.is_temporary() {
            return;
        }
        let Some(key) = obj.primary_key_values() else {
            return;
        };
        let new = IdentityKey::of(obj.table_id(), &key);
        self.alive.rekey(&old, new);
        obj.set_identity(new);
    }

    /// Point `column` at `target`'s primary key. When the target has not
    /// been inserted yet the link stays lazy and the flush engine writes
    /// the target first.
    pub fn reference(&mut self, obj: &ObjectRef, column: &str, target: &ObjectRef) -> Result<()> {
        obj.bind_store(self.store_id)?;
        target.bind_store(self.store_id)?;
        obj.set_reference(column, target)
    }

    /// Write all pending changes to the backend, ordered so referenced
    /// rows exist before the rows that point at them. Does not commit.
    ///
    /// A dependency cycle fails with `OrderLoop` before anything is sent.
    /// On a statement error every unexecuted change stays pending, so a
    /// later flush retries the same logical changes.
    pub fn flush(&mut self) -> Result<FlushResult> {
        let batch = self.dirty().take();
        if batch.is_empty() {
            return Ok(FlushResult::default());
        }
        match flush::run(&mut self.conn, &batch) {
            Ok(report) => {
                for obj in &report.deleted {
                    if let Some(key) = obj.identity() {
                        self.alive.remove(&key);
                    }
                    self.cache.remove(obj);
                }
                // Objects with app-assigned keys become addressable by
                // them now; generated keys wait for their reload.
                for obj in &batch {
                    if !obj.is_lost() {
                        self.rekey_if_resolved(obj);
                    }
                }
                {
                    let mut dirty = self.dirty();
                    for obj in &report.requeued {
                        dirty.note(obj);
                    }
                }
                self.alive.prune();
                Ok(report.result)
            }
            Err(e) => {
                let mut dirty = self.dirty();
                for obj in &batch {
                    if obj.is_dirty() {
                        dirty.note(obj);
                    }
                }
                Err(e)
            }
        }
    }

    /// Flush, then commit the backend transaction.
    pub fn commit(&mut self) -> Result<()> {
        self.flush()?;
        self.conn.commit()
    }

    /// Roll back the backend transaction and discard in-memory changes.
    ///
    /// Objects never flushed drop back out of the store. Every other live
    /// object is invalidated: its key survives, everything else reloads
    /// on next access.
    pub fn rollback(&mut self) -> Result<()> {
        self.conn.rollback()?;
        let live: Vec<ObjectRef> = self.alive.live().collect();
        for obj in live {
            if obj.pending() == Pending::Add {
                if let Some(key) = obj.identity() {
                    self.alive.remove(&key);
                }
                self.cache.remove(&obj);
                obj.set_pending(Pending::None);
                obj.set_flush_state(FlushState::Clean);
            } else {
                obj.invalidate();
            }
        }
        self.dirty().clear();
        tracing::debug!(store = self.store_id, "rolled back");
        Ok(())
    }

    /// Drop dead identity-map entries. The map prunes itself on misses;
    /// this is for callers who want it eager.
    pub fn prune(&mut self) -> usize {
        self.alive.prune()
    }
}

/// The objects a [`Store::find`] produced.
#[derive(Debug)]
pub struct ResultSet {
    objects: Vec<ObjectRef>,
}

impl ResultSet {
    /// All matches, in backend order.
    pub fn all(self) -> Vec<ObjectRef> {
        self.objects
    }

    /// The first match, if any.
    pub fn first(&self) -> Option<ObjectRef> {
        self.objects.first().cloned()
    }

    /// Exactly one match, or `NotOne` carrying the actual count.
    pub fn one(self) -> Result<ObjectRef> {
        let count = self.objects.len();
        let mut objects = self.objects.into_iter();
        match (objects.next(), objects.next()) {
            (Some(obj), None) => Ok(obj),
            _ => Err(Error::NotOne(NotOneError { count })),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ObjectRef> {
        self.objects.iter()
    }
}

impl IntoIterator for ResultSet {
    type Item = ObjectRef;
    type IntoIter = std::vec::IntoIter<ObjectRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.objects.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use squall_core::compiler::{AnsiCompiler, Compiler};
    use squall_core::schema::{ColumnDef, ColumnKind};
    use squall_core::statement::Statement;
    use squall_core::{ExecuteResult, QueryError, QueryErrorKind, Row};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct MockState {
        /// Compiled SQL and parameters, in execution order (queries too).
        log: Vec<(String, Vec<Value>)>,
        /// Scripted results, popped per SELECT. Missing script means an
        /// empty result.
        results: VecDeque<Vec<Row>>,
        next_insert_id: i64,
        fail_table: Option<String>,
        commits: usize,
        rollbacks: usize,
    }

    #[derive(Clone)]
    struct MockConnection {
        state: Arc<Mutex<MockState>>,
    }

    impl MockConnection {
        fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(MockState {
                    next_insert_id: 0,
                    ..MockState::default()
                })),
            }
        }

        fn script(&self, rows: Vec<Row>) {
            self.state.lock().unwrap().results.push_back(rows);
        }

        fn fail_on(&self, table: &str) {
            self.state.lock().unwrap().fail_table = Some(table.to_string());
        }

        fn clear_failure(&self) {
            self.state.lock().unwrap().fail_table = None;
        }

        fn log(&self) -> Vec<(String, Vec<Value>)> {
            self.state.lock().unwrap().log.clone()
        }

        fn statements(&self) -> Vec<String> {
            self.log().into_iter().map(|(sql, _)| sql).collect()
        }

        fn writes(&self) -> Vec<String> {
            self.statements()
                .into_iter()
                .filter(|sql| !sql.starts_with("SELECT"))
                .collect()
        }
    }

    impl Connection for MockConnection {
        fn query(&mut self, select: &Select) -> Result<Vec<Row>> {
            let compiled = AnsiCompiler.compile(&Statement::Select(select.clone()));
            let mut state = self.state.lock().unwrap();
            state.log.push((compiled.sql, compiled.params));
            Ok(state.results.pop_front().unwrap_or_default())
        }

        fn execute(&mut self, statement: &Statement) -> Result<ExecuteResult> {
            let mut state = self.state.lock().unwrap();
            if state.fail_table.as_deref() == Some(statement.table()) {
                return Err(Error::Query(QueryError {
                    kind: QueryErrorKind::Constraint,
                    sql: None,
                    sqlstate: Some("23505".to_string()),
                    message: "constraint violated".to_string(),
                    source: None,
                }));
            }
            let compiled = AnsiCompiler.compile(statement);
            state.log.push((compiled.sql, compiled.params));
            state.next_insert_id += 1;
            let insert_id = state.next_insert_id;
            Ok(ExecuteResult {
                rows_affected: 1,
                insert_id: Some(insert_id),
            })
        }

        fn commit(&mut self) -> Result<()> {
            self.state.lock().unwrap().commits += 1;
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            self.state.lock().unwrap().rollbacks += 1;
            Ok(())
        }
    }

    fn person_schema() -> TableSchema {
        TableSchema::new(
            "person",
            vec![
                ColumnDef::new("id", ColumnKind::Int).primary().generated(),
                ColumnDef::new("name", ColumnKind::Text),
                ColumnDef::new("email", ColumnKind::Text).nullable(),
            ],
        )
    }

    fn team_schema() -> TableSchema {
        TableSchema::new(
            "team",
            vec![
                ColumnDef::new("id", ColumnKind::Int).primary().generated(),
                ColumnDef::new("name", ColumnKind::Text),
            ],
        )
    }

    fn hero_schema() -> TableSchema {
        TableSchema::new(
            "hero",
            vec![
                ColumnDef::new("id", ColumnKind::Int).primary().generated(),
                ColumnDef::new("name", ColumnKind::Text),
                ColumnDef::new("team_id", ColumnKind::Int)
                    .nullable()
                    .references("team", "id"),
            ],
        )
    }

    fn person_row(id: i64, name: &str) -> Row {
        Row::new(
            vec!["id".to_string(), "name".to_string(), "email".to_string()],
            vec![Value::Int(id), Value::Text(name.to_string()), Value::Null],
        )
    }

    fn store() -> (Store<MockConnection>, MockConnection) {
        let conn = MockConnection::new();
        let mut store = Store::new(conn.clone());
        store.register(person_schema());
        (store, conn)
    }

    #[test]
    fn test_get_returns_one_object_per_row() {
        let (mut store, conn) = store();
        conn.script(vec![person_row(1, "Ada")]);

        let first = store.get("person", &[Value::Int(1)]).unwrap().unwrap();
        let second = store.get("person", &[Value::Int(1)]).unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        // The second get never touched the backend
        assert_eq!(conn.log().len(), 1);
    }

    #[test]
    fn test_get_miss_returns_none() {
        let (mut store, _conn) = store();
        assert!(store.get("person", &[Value::Int(404)]).unwrap().is_none());
    }

    #[test]
    fn test_get_discards_row_for_live_dirty_object() {
        let (mut store, conn) = store();
        conn.script(vec![person_row(1, "Ada")]);

        let obj = store.get("person", &[Value::Int(1)]).unwrap().unwrap();
        obj.set("name", "Renamed").unwrap();

        // A fresh get goes straight to the live object; the unflushed
        // change survives
        let again = store.get("person", &[Value::Int(1)]).unwrap().unwrap();
        assert!(Arc::ptr_eq(&obj, &again));
        assert_eq!(
            again.get("name").unwrap(),
            Value::Text("Renamed".to_string())
        );
    }

    #[test]
    fn test_add_flush_and_deferred_key_read() {
        let (mut store, conn) = store();

        let person = store.new_object("person").unwrap();
        person.set("name", "Ada").unwrap();
        store.add(&person).unwrap();

        let result = store.flush().unwrap();
        assert_eq!(result.inserted, 1);

        let writes = conn.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(
            writes[0],
            "INSERT INTO \"person\" (\"name\") VALUES ($1)"
        );

        // The generated key is not forced at flush time
        assert!(person.get("id").is_err());

        // First read reloads by the insert identity and resolves it
        conn.script(vec![person_row(1, "Ada")]);
        assert_eq!(store.value(&person, "id").unwrap(), Value::Int(1));

        // Identity got re-keyed; get by the real key finds the instance
        // without another query
        let queries_before = conn.log().len();
        let found = store.get("person", &[Value::Int(1)]).unwrap().unwrap();
        assert!(Arc::ptr_eq(&found, &person));
        assert_eq!(conn.log().len(), queries_before);
    }

    #[test]
    fn test_flush_is_a_noop_when_clean() {
        let (mut store, conn) = store();
        let result = store.flush().unwrap();
        assert_eq!(result, FlushResult::default());
        assert!(conn.log().is_empty());
    }

    #[test]
    fn test_add_then_remove_never_reaches_backend() {
        let (mut store, conn) = store();

        let person = store.new_object("person").unwrap();
        person.set("name", "Ada").unwrap();
        store.add(&person).unwrap();
        store.remove(&person).unwrap();

        store.flush().unwrap();
        assert!(conn.writes().is_empty());
        assert_eq!(person.pending(), Pending::None);
    }

    #[test]
    fn test_re_add_cancels_pending_removal() {
        let (mut store, conn) = store();
        conn.script(vec![person_row(1, "Ada")]);

        let person = store.get("person", &[Value::Int(1)]).unwrap().unwrap();
        store.remove(&person).unwrap();
        store.add(&person).unwrap();

        store.flush().unwrap();
        // No DELETE was issued and the object is still reachable
        assert!(conn.writes().is_empty());
        let again = store.get("person", &[Value::Int(1)]).unwrap().unwrap();
        assert!(Arc::ptr_eq(&person, &again));
    }

    #[test]
    fn test_removed_object_reads_as_absent_then_lost() {
        let (mut store, conn) = store();
        conn.script(vec![person_row(1, "Ada")]);

        let person = store.get("person", &[Value::Int(1)]).unwrap().unwrap();
        store.remove(&person).unwrap();

        // Pending removal hides the object from get
        assert!(store.get("person", &[Value::Int(1)]).unwrap().is_none());

        store.flush().unwrap();
        assert_eq!(
            conn.writes(),
            vec!["DELETE FROM \"person\" WHERE \"id\" = $1".to_string()]
        );

        // After the delete the object is lost
        assert!(matches!(
            store.value(&person, "name").unwrap_err(),
            Error::LostObject(_)
        ));
        // And a fresh get queries the backend (scripted empty)
        assert!(store.get("person", &[Value::Int(1)]).unwrap().is_none());
    }

    #[test]
    fn test_dirty_object_flushes_once_with_all_changes() {
        let (mut store, conn) = store();
        conn.script(vec![person_row(1, "Ada")]);

        let person = store.get("person", &[Value::Int(1)]).unwrap().unwrap();
        person.set("name", "Grace").unwrap();
        person.set("email", "grace@example.com").unwrap();
        person.set("name", "Grace H").unwrap();

        store.flush().unwrap();
        let writes = conn.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(
            writes[0],
            "UPDATE \"person\" SET \"name\" = $1, \"email\" = $2 WHERE \"id\" = $3"
        );

        // Clean again; a second flush writes nothing
        store.flush().unwrap();
        assert_eq!(conn.writes().len(), 1);
    }

    #[test]
    fn test_reference_orders_parent_insert_first() {
        let conn = MockConnection::new();
        let mut store = Store::new(conn.clone());
        store.register(team_schema());
        store.register(hero_schema());

        let hero = store.new_object("hero").unwrap();
        hero.set("name", "Spear").unwrap();
        store.add(&hero).unwrap();

        let team = store.new_object("team").unwrap();
        team.set("name", "Wayfarers").unwrap();
        store.add(&team).unwrap();

        store.reference(&hero, "team_id", &team).unwrap();

        store.flush().unwrap();
        let writes = conn.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes[0].starts_with("INSERT INTO \"team\""));
        assert!(writes[1].starts_with("INSERT INTO \"hero\""));
    }

    #[test]
    fn test_reference_cycle_reports_loop_without_writing() {
        let conn = MockConnection::new();
        let mut store = Store::new(conn.clone());
        store.register(TableSchema::new(
            "node",
            vec![
                ColumnDef::new("id", ColumnKind::Int).primary().generated(),
                ColumnDef::new("next_id", ColumnKind::Int)
                    .nullable()
                    .references("node", "id"),
            ],
        ));

        let a = store.new_object("node").unwrap();
        let b = store.new_object("node").unwrap();
        store.add(&a).unwrap();
        store.add(&b).unwrap();
        store.reference(&a, "next_id", &b).unwrap();
        store.reference(&b, "next_id", &a).unwrap();

        let err = store.flush().unwrap_err();
        assert!(matches!(err, Error::OrderLoop(_)));
        assert!(conn.writes().is_empty());

        // The changes are still pending; breaking the cycle lets the
        // next flush succeed. Both rows are still unflushed inserts, b's
        // link resolving from a's insert identity.
        a.set("next_id", Value::Null).unwrap();
        store.flush().unwrap();
        let writes = conn.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|sql| sql.starts_with("INSERT INTO \"node\"")));
    }

    #[test]
    fn test_flush_failure_keeps_changes_for_retry() {
        let (mut store, conn) = store();

        let person = store.new_object("person").unwrap();
        person.set("name", "Ada").unwrap();
        store.add(&person).unwrap();

        conn.fail_on("person");
        let err = store.flush().unwrap_err();
        assert!(err.is_integrity());
        assert_eq!(person.pending(), Pending::Add);

        conn.clear_failure();
        let result = store.flush().unwrap();
        assert_eq!(result.inserted, 1);
        assert_eq!(conn.writes().len(), 1);
    }

    #[test]
    fn test_requeued_child_flushes_after_target_is_added() {
        let conn = MockConnection::new();
        let mut store = Store::new(conn.clone());
        store.register(team_schema());
        store.register(hero_schema());

        let team = store.new_object("team").unwrap();
        team.set("name", "Wayfarers").unwrap();

        let hero = store.new_object("hero").unwrap();
        hero.set("name", "Spear").unwrap();
        store.add(&hero).unwrap();
        // The team is referenced but never added
        store.reference(&hero, "team_id", &team).unwrap();

        let result = store.flush().unwrap();
        assert_eq!(result.inserted, 0);
        assert_eq!(result.requeued, 1);
        assert!(conn.writes().is_empty());

        // Adding the target unblocks the next flush
        store.add(&team).unwrap();
        let result = store.flush().unwrap();
        assert_eq!(result.inserted, 2);
        let writes = conn.writes();
        assert!(writes[0].starts_with("INSERT INTO \"team\""));
        assert!(writes[1].starts_with("INSERT INTO \"hero\""));
    }

    #[test]
    fn test_rollback_invalidates_and_reloads() {
        let (mut store, conn) = store();
        conn.script(vec![person_row(1, "Ada")]);

        let person = store.get("person", &[Value::Int(1)]).unwrap().unwrap();
        person.set("name", "Mangled").unwrap();

        store.rollback().unwrap();
        assert_eq!(conn.state.lock().unwrap().rollbacks, 1);
        assert!(person.is_invalidated());

        // Next read reloads the committed row
        conn.script(vec![person_row(1, "Ada")]);
        assert_eq!(
            store.value(&person, "name").unwrap(),
            Value::Text("Ada".to_string())
        );
        assert!(!person.is_invalidated());

        // The discarded change is not re-flushed
        store.flush().unwrap();
        assert!(conn.writes().is_empty());
    }

    #[test]
    fn test_rollback_drops_never_flushed_objects() {
        let (mut store, conn) = store();

        let person = store.new_object("person").unwrap();
        person.set("name", "Ada").unwrap();
        store.add(&person).unwrap();

        store.rollback().unwrap();
        assert_eq!(person.pending(), Pending::None);

        store.flush().unwrap();
        assert!(conn.writes().is_empty());
    }

    #[test]
    fn test_rollback_reload_of_vanished_row_is_lost() {
        let (mut store, conn) = store();
        conn.script(vec![person_row(1, "Ada")]);

        let person = store.get("person", &[Value::Int(1)]).unwrap().unwrap();
        store.rollback().unwrap();

        // Reload comes back empty: the row never existed in the
        // committed state
        assert!(matches!(
            store.value(&person, "name").unwrap_err(),
            Error::LostObject(_)
        ));
        assert!(person.is_lost());
    }

    #[test]
    fn test_commit_flushes_then_commits() {
        let (mut store, conn) = store();

        let person = store.new_object("person").unwrap();
        person.set("name", "Ada").unwrap();
        store.add(&person).unwrap();

        store.commit().unwrap();
        assert_eq!(conn.writes().len(), 1);
        assert_eq!(conn.state.lock().unwrap().commits, 1);
    }

    #[test]
    fn test_find_deduplicates_against_identity_map() {
        let (mut store, conn) = store();
        conn.script(vec![person_row(1, "Ada")]);

        let person = store.get("person", &[Value::Int(1)]).unwrap().unwrap();
        person.set("name", "Renamed").unwrap();

        // The query returns the stale row; the live object wins
        conn.script(vec![person_row(1, "Ada"), person_row(2, "Grace")]);
        let found = store
            .find("person", vec![Constraint::eq("email", Value::Null)])
            .unwrap()
            .all();

        assert_eq!(found.len(), 2);
        assert!(Arc::ptr_eq(&found[0], &person));
        assert_eq!(
            found[0].get("name").unwrap(),
            Value::Text("Renamed".to_string())
        );
        assert_eq!(
            found[1].get("name").unwrap(),
            Value::Text("Grace".to_string())
        );
    }

    #[test]
    fn test_result_set_one() {
        let (mut store, conn) = store();

        conn.script(vec![person_row(1, "Ada")]);
        let person = store
            .find("person", vec![Constraint::eq("name", "Ada")])
            .unwrap()
            .one()
            .unwrap();
        assert_eq!(person.get("name").unwrap(), Value::Text("Ada".to_string()));

        conn.script(vec![person_row(1, "Ada"), person_row(2, "Grace")]);
        let err = store
            .find("person", vec![])
            .unwrap()
            .one()
            .unwrap_err();
        assert!(matches!(err, Error::NotOne(NotOneError { count: 2 })));

        conn.script(vec![]);
        let err = store.find("person", vec![]).unwrap().one().unwrap_err();
        assert!(matches!(err, Error::NotOne(NotOneError { count: 0 })));
    }

    #[test]
    fn test_result_set_first() {
        let (mut store, conn) = store();
        conn.script(vec![person_row(1, "Ada"), person_row(2, "Grace")]);
        let set = store.find("person", vec![]).unwrap();
        let first = set.first().unwrap();
        assert_eq!(first.get("id").unwrap(), Value::Int(1));

        conn.script(vec![]);
        assert!(store.find("person", vec![]).unwrap().first().is_none());
    }

    #[test]
    fn test_wrong_store_is_rejected() {
        let (mut first, _conn1) = store();
        let (mut second, _conn2) = store();

        let person = first.new_object("person").unwrap();
        person.set("name", "Ada").unwrap();
        first.add(&person).unwrap();

        assert!(matches!(
            second.add(&person).unwrap_err(),
            Error::WrongStore(_)
        ));
        assert!(matches!(
            second.value(&person, "name").unwrap_err(),
            Error::WrongStore(_)
        ));
    }

    #[test]
    fn test_flush_before_find_config() {
        let conn = MockConnection::new();
        let mut store = Store::with_config(
            conn.clone(),
            StoreConfig {
                flush_before_find: true,
                ..StoreConfig::default()
            },
        );
        store.register(person_schema());

        let person = store.new_object("person").unwrap();
        person.set("name", "Ada").unwrap();
        store.add(&person).unwrap();

        conn.script(vec![person_row(1, "Ada")]);
        store.find("person", vec![Constraint::eq("name", "Ada")]).unwrap();

        // The pending insert was flushed before the query ran
        let statements = conn.statements();
        assert!(statements[0].starts_with("INSERT"));
        assert!(statements[1].starts_with("SELECT"));
    }

    #[test]
    fn test_unregistered_table_is_an_error() {
        let (mut store, _conn) = store();
        assert!(store.new_object("ghost").is_err());
        assert!(store.get("ghost", &[Value::Int(1)]).is_err());
    }

    #[test]
    fn test_get_checks_key_arity() {
        let (mut store, _conn) = store();
        assert!(store.get("person", &[]).is_err());
        assert!(
            store
                .get("person", &[Value::Int(1), Value::Int(2)])
                .is_err()
        );
    }

    #[test]
    fn test_remove_of_object_not_in_store_is_an_error() {
        let (mut store, _conn) = store();
        let person = store.new_object("person").unwrap();
        assert!(store.remove(&person).is_err());
    }
}
