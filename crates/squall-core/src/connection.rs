//! Backend connection trait.
//!
//! One connection serves one store. Calls block the calling thread until
//! the backend answers; the store layer never runs statements in parallel.
//!
//! # Error translation
//!
//! Implementations are responsible for translating backend failures into
//! the core taxonomy: lost connections become
//! [`ConnectionErrorKind::Disconnected`](crate::error::ConnectionErrorKind),
//! integrity violations become
//! [`QueryErrorKind::Constraint`](crate::error::QueryErrorKind) with the
//! original error chained as `source`. The store surfaces these untouched
//! and never reconnects on its own.

use crate::Result;
use crate::row::Row;
use crate::statement::{Select, Statement};

/// Result of executing a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteResult {
    /// Number of rows the statement touched.
    pub rows_affected: u64,
    /// Backend-assigned identity of the inserted row, when the backend
    /// reports one. Used to reload backend-generated columns later.
    pub insert_id: Option<i64>,
}

/// A blocking connection to a relational backend.
pub trait Connection {
    /// Run a SELECT and return all matching rows.
    fn query(&mut self, select: &Select) -> Result<Vec<Row>>;

    /// Execute a write statement.
    fn execute(&mut self, statement: &Statement) -> Result<ExecuteResult>;

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<()>;
}
