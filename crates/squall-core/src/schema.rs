//! Mapped-type declarations.
//!
//! A [`TableSchema`] describes one mapped table: its ordered columns, which
//! of them form the primary key, and which reference other tables. Schemas
//! are registered once in a [`SchemaRegistry`] owned by the store that uses
//! them; there is no process-global registry.

use std::collections::HashMap;
use std::sync::Arc;

/// The value kind a column holds. Drives normalization on variable set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Bool,
    Int,
    Float,
    Decimal,
    Text,
    Bytes,
    Date,
    Time,
    Timestamp,
    Uuid,
    Json,
}

/// A foreign key reference, `table.column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

/// Metadata about a mapped column.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Database column name
    pub name: String,
    /// Value kind for normalization
    pub kind: ColumnKind,
    /// Whether this column is part of the primary key
    pub primary_key: bool,
    /// Whether the backend generates this column's value (auto-increment,
    /// server default)
    pub generated: bool,
    /// Whether NULL is an acceptable value
    pub nullable: bool,
    /// Foreign key reference, if any
    pub foreign_key: Option<ForeignKey>,
}

impl ColumnDef {
    /// Create a plain, non-key, non-nullable column.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            primary_key: false,
            generated: false,
            nullable: false,
            foreign_key: None,
        }
    }

    /// Mark this column as part of the primary key.
    pub fn primary(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark this column as backend-generated.
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    /// Allow NULL.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Declare a foreign key reference to `table.column`.
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }
}

/// The schema of one mapped table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    table: String,
    columns: Vec<ColumnDef>,
    column_index: HashMap<String, usize>,
    primary_key: Vec<usize>,
}

impl TableSchema {
    /// Build a schema from its ordered columns.
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        let primary_key = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        Self {
            table: table.into(),
            columns,
            column_index,
            primary_key,
        }
    }

    /// The table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// All columns in declaration order.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the schema declares no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column by position.
    pub fn column(&self, index: usize) -> Option<&ColumnDef> {
        self.columns.get(index)
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_index.get(name).copied()
    }

    /// Positions of the primary key columns, in declaration order.
    pub fn primary_key(&self) -> &[usize] {
        &self.primary_key
    }

    /// Names of all columns, in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Table-id-keyed collection of schemas, built once and owned by a store.
///
/// The numeric table id doubles as the type component of identity keys, so
/// two registries never share ids.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: Vec<Arc<TableSchema>>,
    by_name: HashMap<String, usize>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, returning its table id. Registering the same
    /// table name twice replaces nothing and returns the existing id.
    pub fn register(&mut self, schema: TableSchema) -> usize {
        if let Some(&id) = self.by_name.get(schema.table()) {
            return id;
        }
        let id = self.tables.len();
        self.by_name.insert(schema.table().to_string(), id);
        self.tables.push(Arc::new(schema));
        id
    }

    /// Look up a schema by table id.
    pub fn get(&self, table_id: usize) -> Option<&Arc<TableSchema>> {
        self.tables.get(table_id)
    }

    /// Look up a table id by name.
    pub fn id_of(&self, table: &str) -> Option<usize> {
        self.by_name.get(table).copied()
    }

    /// Look up a schema by table name.
    pub fn by_name(&self, table: &str) -> Option<&Arc<TableSchema>> {
        self.id_of(table).and_then(|id| self.tables.get(id))
    }

    /// Number of registered tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether no tables are registered.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person_schema() -> TableSchema {
        TableSchema::new(
            "person",
            vec![
                ColumnDef::new("id", ColumnKind::Int).primary().generated(),
                ColumnDef::new("name", ColumnKind::Text),
                ColumnDef::new("team_id", ColumnKind::Int)
                    .nullable()
                    .references("team", "id"),
            ],
        )
    }

    #[test]
    fn test_schema_lookup() {
        let schema = person_schema();
        assert_eq!(schema.table(), "person");
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.column_index("name"), Some(1));
        assert_eq!(schema.column_index("missing"), None);
        assert_eq!(schema.primary_key(), &[0]);
    }

    #[test]
    fn test_column_flags() {
        let schema = person_schema();
        let id = schema.column(0).unwrap();
        assert!(id.primary_key);
        assert!(id.generated);

        let team_id = schema.column(2).unwrap();
        assert!(team_id.nullable);
        let fk = team_id.foreign_key.as_ref().unwrap();
        assert_eq!(fk.table, "team");
        assert_eq!(fk.column, "id");
    }

    #[test]
    fn test_registry_ids_are_stable() {
        let mut registry = SchemaRegistry::new();
        let person = registry.register(person_schema());
        let team = registry.register(TableSchema::new(
            "team",
            vec![ColumnDef::new("id", ColumnKind::Int).primary()],
        ));

        assert_ne!(person, team);
        assert_eq!(registry.id_of("person"), Some(person));
        assert_eq!(registry.by_name("team").unwrap().table(), "team");

        // Re-registering returns the existing id
        assert_eq!(registry.register(person_schema()), person);
        assert_eq!(registry.len(), 2);
    }
}
