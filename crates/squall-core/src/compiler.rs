//! Statement compilation.
//!
//! A [`Compiler`] renders an abstract [`Statement`] into SQL text plus an
//! ordered parameter list. Connections own a compiler; everything above
//! them works with statement shapes only.

use crate::statement::{Delete, Insert, Select, Statement, Update};
use crate::value::Value;

/// A compiled statement: SQL text and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Renders abstract statements into backend syntax.
pub trait Compiler {
    fn compile(&self, statement: &Statement) -> Compiled;
}

/// ANSI-flavored compiler: double-quoted identifiers, `$n` placeholders.
///
/// Good enough for tests and backends with standard quoting; dialects with
/// different placeholder or quoting rules supply their own `Compiler`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiCompiler;

impl AnsiCompiler {
    fn quote(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn compile_insert(insert: &Insert) -> Compiled {
        let col_list: String = insert
            .columns
            .iter()
            .map(|c| Self::quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders: Vec<String> = (1..=insert.values.len())
            .map(|i| format!("${}", i))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            Self::quote(&insert.table),
            col_list,
            placeholders.join(", ")
        );
        Compiled {
            sql,
            params: insert.values.clone(),
        }
    }

    fn compile_update(update: &Update) -> Compiled {
        let mut params: Vec<Value> = Vec::new();
        let assignments: Vec<String> = update
            .set
            .iter()
            .enumerate()
            .map(|(i, (col, value))| {
                params.push(value.clone());
                format!("{} = ${}", Self::quote(col), i + 1)
            })
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {}",
            Self::quote(&update.table),
            assignments.join(", ")
        );
        Self::push_where(&mut sql, &mut params, &update.where_clause);
        Compiled { sql, params }
    }

    fn compile_delete(delete: &Delete) -> Compiled {
        let mut params: Vec<Value> = Vec::new();
        let mut sql = format!("DELETE FROM {}", Self::quote(&delete.table));
        Self::push_where(&mut sql, &mut params, &delete.where_clause);
        Compiled { sql, params }
    }

    fn compile_select(select: &Select) -> Compiled {
        let col_list: String = select
            .columns
            .iter()
            .map(|c| Self::quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut params: Vec<Value> = Vec::new();
        let mut sql = format!("SELECT {} FROM {}", col_list, Self::quote(&select.table));
        Self::push_where(&mut sql, &mut params, &select.where_clause);
        Compiled { sql, params }
    }

    fn push_where(
        sql: &mut String,
        params: &mut Vec<Value>,
        constraints: &[crate::statement::Constraint],
    ) {
        if constraints.is_empty() {
            return;
        }
        let clauses: Vec<String> = constraints
            .iter()
            .map(|c| {
                params.push(c.value.clone());
                format!(
                    "{} {} ${}",
                    Self::quote(&c.column),
                    c.op.sql(),
                    params.len()
                )
            })
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
}

impl Compiler for AnsiCompiler {
    fn compile(&self, statement: &Statement) -> Compiled {
        match statement {
            Statement::Insert(s) => Self::compile_insert(s),
            Statement::Update(s) => Self::compile_update(s),
            Statement::Delete(s) => Self::compile_delete(s),
            Statement::Select(s) => Self::compile_select(s),
        }
    }
}
