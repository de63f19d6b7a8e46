//! Core types and traits for Squall.
//!
//! This crate provides the foundational abstractions the store layer is
//! built on:
//!
//! - `Value` dynamic column values
//! - `Row` result rows with shared column metadata
//! - `Statement` abstract statement shapes and the `Compiler` that renders them
//! - `Connection` trait for blocking backend access
//! - `TableSchema` / `SchemaRegistry` mapped-type declarations
//! - the error taxonomy shared by every layer

pub mod compiler;
pub mod connection;
pub mod error;
pub mod row;
pub mod schema;
pub mod statement;
pub mod value;

pub use compiler::{AnsiCompiler, Compiled, Compiler};
pub use connection::{Connection, ExecuteResult};
pub use error::{
    ConnectionError, ConnectionErrorKind, Error, LostObjectError, NotLoadedError, NotOneError,
    OrderLoopError, QueryError, QueryErrorKind, Result, TypeError, WrongStoreError,
};
pub use row::{ColumnInfo, Row};
pub use schema::{ColumnDef, ColumnKind, ForeignKey, SchemaRegistry, TableSchema};
pub use statement::{CompareOp, Constraint, Delete, Insert, Select, Statement, Update};
pub use value::Value;
