//! Squall - an object cache and flush-ordering engine for SQL rows.
//!
//! Squall keeps a working set of row-backed objects in memory and writes
//! their changes back in dependency order:
//!
//! - One live object per row: fetching the same primary key twice from a
//!   store returns the same `Arc`, unflushed changes intact
//! - Change tracking per column, with changes batched until `flush`
//! - Inserts ordered so referenced rows exist before rows pointing at
//!   them; reference cycles are reported before anything is written
//! - Backend-generated keys resolved lazily, on first read after insert
//! - `commit` / `rollback` keep memory aligned with the transaction
//!
//! # Quick Start
//!
//! ```ignore
//! use squall::{ColumnDef, ColumnKind, Constraint, Store, TableSchema, Value};
//!
//! fn example(conn: impl squall::Connection) -> squall::Result<()> {
//!     let mut store = Store::new(conn);
//!     store.register(TableSchema::new(
//!         "person",
//!         vec![
//!             ColumnDef::new("id", ColumnKind::Int).primary().generated(),
//!             ColumnDef::new("name", ColumnKind::Text),
//!         ],
//!     ));
//!
//!     // Create and insert
//!     let person = store.new_object("person")?;
//!     person.set("name", "Ada")?;
//!     store.add(&person)?;
//!     store.commit()?;
//!
//!     // The generated key resolves on first read
//!     let id = store.value(&person, "id")?;
//!
//!     // Fetching by key returns the same instance
//!     let again = store.get("person", &[id])?;
//!
//!     // Query
//!     let named = store
//!         .find("person", vec![Constraint::eq("name", "Ada")])?
//!         .one()?;
//!     person.set("name", "Grace")?;
//!     store.commit()?;
//!     let _ = (again, named);
//!     Ok(())
//! }
//! ```

pub use squall_core::{
    // Statement shapes and compilation
    AnsiCompiler,
    // Column and table declarations
    ColumnDef,
    ColumnKind,
    CompareOp,
    Compiled,
    Compiler,
    // Backend access
    Connection,
    ConnectionError,
    ConnectionErrorKind,
    Constraint,
    Delete,
    // Errors
    Error,
    ExecuteResult,
    ForeignKey,
    Insert,
    LostObjectError,
    NotLoadedError,
    NotOneError,
    OrderLoopError,
    QueryError,
    QueryErrorKind,
    Result,
    // Rows and values
    Row,
    SchemaRegistry,
    Select,
    Statement,
    TableSchema,
    TypeError,
    Update,
    Value,
    WrongStoreError,
};

pub use squall_store::{
    EventKind, EventPayload, EventSystem, FlushResult, FlushState, HookAction, HookId,
    IdentityKey, LazyValue, ObjectInfo, ObjectRef, Pending, ResultSet, Store, StoreConfig,
    VarState, Variable,
};
