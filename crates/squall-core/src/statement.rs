//! Abstract statement shapes.
//!
//! The store emits these shapes instead of SQL text; a [`crate::Compiler`]
//! turns them into concrete syntax for a given backend. Nothing above the
//! connection layer depends on SQL strings.

use crate::value::Value;

/// A write or read statement in abstract form.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Select(Select),
}

impl Statement {
    /// The table this statement targets.
    pub fn table(&self) -> &str {
        match self {
            Statement::Insert(s) => &s.table,
            Statement::Update(s) => &s.table,
            Statement::Delete(s) => &s.table,
            Statement::Select(s) => &s.table,
        }
    }

    /// Short tag for logging.
    pub const fn verb(&self) -> &'static str {
        match self {
            Statement::Insert(_) => "INSERT",
            Statement::Update(_) => "UPDATE",
            Statement::Delete(_) => "DELETE",
            Statement::Select(_) => "SELECT",
        }
    }
}

/// INSERT: one row, explicit column list.
///
/// Columns whose values the backend generates are simply omitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

/// UPDATE: assignments for the dirty columns, keyed by constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub set: Vec<(String, Value)>,
    pub where_clause: Vec<Constraint>,
}

/// DELETE keyed by constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub where_clause: Vec<Constraint>,
}

/// SELECT of named columns, filtered by constraints ANDed together.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub columns: Vec<String>,
    pub where_clause: Vec<Constraint>,
}

impl Select {
    /// Select the given columns from `table` with no constraints.
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
            where_clause: Vec::new(),
        }
    }

    /// Add an equality constraint.
    pub fn filter(mut self, constraint: Constraint) -> Self {
        self.where_clause.push(constraint);
        self
    }
}

/// A single comparison in a WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Constraint {
    pub fn new(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Equality constraint, the common case.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, CompareOp::Eq, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub const fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_table_and_verb() {
        let stmt = Statement::Insert(Insert {
            table: "person".to_string(),
            columns: vec!["name".to_string()],
            values: vec![Value::Text("Ada".to_string())],
        });
        assert_eq!(stmt.table(), "person");
        assert_eq!(stmt.verb(), "INSERT");
    }

    #[test]
    fn test_select_builder() {
        let select = Select::new("person", vec!["id".to_string(), "name".to_string()])
            .filter(Constraint::eq("name", "Ada"));
        assert_eq!(select.table, "person");
        assert_eq!(select.where_clause.len(), 1);
        assert_eq!(select.where_clause[0].op, CompareOp::Eq);
        assert_eq!(
            select.where_clause[0].value,
            Value::Text("Ada".to_string())
        );
    }

    #[test]
    fn test_compare_op_sql() {
        assert_eq!(CompareOp::Eq.sql(), "=");
        assert_eq!(CompareOp::Ne.sql(), "<>");
        assert_eq!(CompareOp::Ge.sql(), ">=");
    }
}
