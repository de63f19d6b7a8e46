//! Variable cells.
//!
//! Each mapped column of a live object is backed by a [`Variable`]: a cell
//! that is either undefined, holds a concrete value, or holds a lazy
//! sentinel to be resolved by the store. Setting a value applies the
//! deterministic normalization declared by the column's kind.

use std::sync::Weak;

use squall_core::schema::{ColumnDef, ColumnKind};
use squall_core::{Error, Result, TypeError, Value};

use crate::info::ObjectInfo;

/// A value the store still owes the variable.
#[derive(Debug, Clone)]
pub enum LazyValue {
    /// The backend generated this value during an insert; a reload
    /// round-trip fetches it on first read. `row_handle` carries the
    /// backend's insert identity so the reload can find the row.
    AutoReload { row_handle: Option<i64> },
    /// The value mirrors another object's primary-key column and becomes
    /// concrete once that key is known.
    Reference {
        target: Weak<ObjectInfo>,
        column: usize,
    },
}

/// The cell state.
#[derive(Debug, Clone, Default)]
pub enum VarState {
    /// Never assigned and never loaded.
    #[default]
    Undefined,
    /// Awaiting a value from the store.
    Lazy(LazyValue),
    /// Holds a concrete value.
    Set(Value),
}

/// Outcome of a `set` that actually changed the cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Changed {
    pub old: Option<Value>,
    pub new: Value,
}

/// One column's mutable cell.
#[derive(Debug, Clone, Default)]
pub struct Variable {
    state: VarState,
    dirty: bool,
}

impl Variable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &VarState {
        &self.state
    }

    /// The concrete value, if the cell holds one.
    pub fn value(&self) -> Option<&Value> {
        match &self.state {
            VarState::Set(v) => Some(v),
            _ => None,
        }
    }

    /// The lazy sentinel, if the cell holds one.
    pub fn lazy_value(&self) -> Option<&LazyValue> {
        match &self.state {
            VarState::Lazy(l) => Some(l),
            _ => None,
        }
    }

    /// Read the concrete value or fail with `NotLoaded` naming the column.
    pub fn get(&self, column: &str) -> Result<Value> {
        match &self.state {
            VarState::Set(v) => Ok(v.clone()),
            VarState::Undefined | VarState::Lazy(_) => Err(Error::not_loaded(column)),
        }
    }

    /// Assign a value, normalizing it for the column.
    ///
    /// Returns `Some(Changed)` when the stored value actually changed so
    /// the owner can mark itself dirty and publish the change. Hydration
    /// (`from_db`) never leaves the cell dirty.
    pub fn set(&mut self, def: &ColumnDef, value: Value, from_db: bool) -> Result<Option<Changed>> {
        let normalized = normalize(def, value)?;
        let old = self.value().cloned();
        let unchanged = matches!(&self.state, VarState::Set(v) if *v == normalized);
        self.state = VarState::Set(normalized.clone());
        if from_db {
            self.dirty = false;
            return Ok(None);
        }
        if unchanged {
            return Ok(None);
        }
        self.dirty = true;
        Ok(Some(Changed {
            old,
            new: normalized,
        }))
    }

    /// Install a lazy sentinel. A reference set by application code is a
    /// pending change (`dirty`); a post-insert auto-reload is not.
    pub fn set_lazy(&mut self, lazy: LazyValue, dirty: bool) {
        self.state = VarState::Lazy(lazy);
        self.dirty = dirty;
    }

    /// Fulfil a lazy sentinel with the backend's value. Resolution is a
    /// catch-up, not a change: the cell comes out clean.
    pub fn resolve(&mut self, def: &ColumnDef, value: Value) -> Result<()> {
        let normalized = normalize(def, value)?;
        self.state = VarState::Set(normalized);
        self.dirty = false;
        Ok(())
    }

    /// Discard the value entirely (rollback invalidation).
    pub fn unset(&mut self) {
        self.state = VarState::Undefined;
        self.dirty = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self.state, VarState::Undefined)
    }
}

/// Normalize `value` for a column, deterministically and without side
/// effects. NULL passes through for any kind; nullability is the
/// backend's constraint to enforce.
pub fn normalize(def: &ColumnDef, value: Value) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = |actual: &Value| {
        Error::Type(TypeError {
            expected: kind_name(def.kind),
            actual: actual.type_name().to_string(),
            column: Some(def.name.clone()),
        })
    };
    match def.kind {
        ColumnKind::Bool => match value {
            Value::Bool(_) => Ok(value),
            Value::Int(v) => Ok(Value::Bool(v != 0)),
            other => Err(mismatch(&other)),
        },
        ColumnKind::Int => match value {
            Value::Int(_) => Ok(value),
            Value::Bool(v) => Ok(Value::Int(i64::from(v))),
            other => Err(mismatch(&other)),
        },
        ColumnKind::Float => match value {
            Value::Float(_) => Ok(value),
            Value::Int(v) => Ok(Value::Float(v as f64)),
            Value::Decimal(s) => s
                .parse()
                .map(Value::Float)
                .map_err(|_| mismatch(&Value::Decimal(s.clone()))),
            other => Err(mismatch(&other)),
        },
        ColumnKind::Decimal => match value {
            Value::Decimal(_) => Ok(value),
            Value::Int(v) => Ok(Value::Decimal(v.to_string())),
            Value::Text(s) if s.parse::<f64>().is_ok() => Ok(Value::Decimal(s)),
            other => Err(mismatch(&other)),
        },
        ColumnKind::Text => match value {
            Value::Text(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
        ColumnKind::Bytes => match value {
            Value::Bytes(_) => Ok(value),
            Value::Text(s) => Ok(Value::Bytes(s.into_bytes())),
            other => Err(mismatch(&other)),
        },
        ColumnKind::Date => match value {
            Value::Date(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
        ColumnKind::Time => match value {
            Value::Time(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
        ColumnKind::Timestamp => match value {
            Value::Timestamp(_) => Ok(value),
            Value::Int(v) => Ok(Value::Timestamp(v)),
            other => Err(mismatch(&other)),
        },
        ColumnKind::Uuid => match value {
            Value::Uuid(_) => Ok(value),
            Value::Bytes(b) if b.len() == 16 => {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(&b);
                Ok(Value::Uuid(arr))
            }
            other => Err(mismatch(&other)),
        },
        ColumnKind::Json => match value {
            Value::Json(_) => Ok(value),
            Value::Text(s) => serde_json::from_str(&s).map(Value::Json).map_err(|e| {
                Error::Type(TypeError {
                    expected: "valid JSON",
                    actual: format!("invalid JSON: {}", e),
                    column: Some(def.name.clone()),
                })
            }),
            other => Err(mismatch(&other)),
        },
    }
}

const fn kind_name(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Bool => "BOOLEAN",
        ColumnKind::Int => "BIGINT",
        ColumnKind::Float => "DOUBLE",
        ColumnKind::Decimal => "DECIMAL",
        ColumnKind::Text => "TEXT",
        ColumnKind::Bytes => "BLOB",
        ColumnKind::Date => "DATE",
        ColumnKind::Time => "TIME",
        ColumnKind::Timestamp => "TIMESTAMP",
        ColumnKind::Uuid => "UUID",
        ColumnKind::Json => "JSON",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_col(name: &str) -> ColumnDef {
        ColumnDef::new(name, ColumnKind::Text)
    }

    #[test]
    fn test_undefined_read_fails() {
        let var = Variable::new();
        let err = var.get("name").unwrap_err();
        assert!(matches!(err, Error::NotLoaded(e) if e.column == "name"));
    }

    #[test]
    fn test_set_marks_dirty_once_value_changes() {
        let def = text_col("name");
        let mut var = Variable::new();

        let changed = var
            .set(&def, Value::Text("Ada".to_string()), false)
            .unwrap();
        assert!(changed.is_some());
        assert!(var.is_dirty());
        assert_eq!(var.get("name").unwrap(), Value::Text("Ada".to_string()));

        // Same value again: no change reported
        let changed = var
            .set(&def, Value::Text("Ada".to_string()), false)
            .unwrap();
        assert!(changed.is_none());
    }

    #[test]
    fn test_hydration_is_clean() {
        let def = text_col("name");
        let mut var = Variable::new();
        var.set(&def, Value::Text("Ada".to_string()), true).unwrap();
        assert!(!var.is_dirty());
        assert!(var.is_defined());
    }

    #[test]
    fn test_resolve_clears_lazy_without_dirtying() {
        let def = ColumnDef::new("id", ColumnKind::Int).primary().generated();
        let mut var = Variable::new();
        var.set_lazy(LazyValue::AutoReload { row_handle: Some(7) }, false);
        assert!(var.lazy_value().is_some());
        assert!(var.get("id").is_err());

        var.resolve(&def, Value::Int(7)).unwrap();
        assert_eq!(var.get("id").unwrap(), Value::Int(7));
        assert!(!var.is_dirty());
    }

    #[test]
    fn test_normalize_bool_coercion() {
        let def = ColumnDef::new("active", ColumnKind::Bool);
        assert_eq!(
            normalize(&def, Value::Int(2)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            normalize(&def, Value::Int(0)).unwrap(),
            Value::Bool(false)
        );
        assert!(normalize(&def, Value::Text("yes".to_string())).is_err());
    }

    #[test]
    fn test_normalize_numeric_widening() {
        let float_def = ColumnDef::new("score", ColumnKind::Float);
        assert_eq!(
            normalize(&float_def, Value::Int(3)).unwrap(),
            Value::Float(3.0)
        );

        let decimal_def = ColumnDef::new("price", ColumnKind::Decimal);
        assert_eq!(
            normalize(&decimal_def, Value::Int(5)).unwrap(),
            Value::Decimal("5".to_string())
        );
    }

    #[test]
    fn test_normalize_null_passes_through() {
        let def = text_col("name");
        assert_eq!(normalize(&def, Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_normalize_json_from_text() {
        let def = ColumnDef::new("meta", ColumnKind::Json);
        let v = normalize(&def, Value::Text("{\"a\":1}".to_string())).unwrap();
        assert!(matches!(v, Value::Json(_)));
        assert!(normalize(&def, Value::Text("not json".to_string())).is_err());
    }

    #[test]
    fn test_normalize_error_names_column() {
        let def = ColumnDef::new("name", ColumnKind::Text);
        let err = normalize(&def, Value::Int(1)).unwrap_err();
        match err {
            Error::Type(te) => assert_eq!(te.column.as_deref(), Some("name")),
            other => panic!("expected type error, got {other}"),
        }
    }

    #[test]
    fn test_unset_discards_value() {
        let def = text_col("name");
        let mut var = Variable::new();
        var.set(&def, Value::Text("Ada".to_string()), false).unwrap();
        var.unset();
        assert!(!var.is_defined());
        assert!(!var.is_dirty());
    }
}
