//! The alive cache: one in-memory instance per identity.
//!
//! Identity is (table, primary-key tuple). The map holds weak references;
//! an object nobody else holds is collected and a later retrieval builds a
//! fresh instance. Stale entries are pruned opportunistically and swept
//! during flush.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use squall_core::Value;

use crate::info::ObjectInfo;

/// Identity of one mapped object within a store.
///
/// `table_id` is the registry id of the object's schema; `hash` digests
/// the primary-key tuple. Objects not yet assigned a real key carry a
/// temporary identity derived from a store-local counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    table_id: usize,
    hash: u64,
    temporary: bool,
}

impl IdentityKey {
    /// Identity from a concrete primary-key tuple.
    pub fn of(table_id: usize, pk_values: &[Value]) -> Self {
        Self {
            table_id,
            hash: hash_values(pk_values),
            temporary: false,
        }
    }

    /// Placeholder identity for an object awaiting a real key.
    pub fn temporary(table_id: usize, serial: u64) -> Self {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        // Domain-separate from real key hashes
        hasher.write_u8(0xfe);
        hasher.write_u64(serial);
        Self {
            table_id,
            hash: hasher.finish(),
            temporary: true,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn table_id(&self) -> usize {
        self.table_id
    }
}

/// Hash a primary-key tuple.
///
/// Each value is tagged with a discriminant byte so values of different
/// types never collide structurally (e.g. `Int(1)` vs `Bool(true)`).
fn hash_values(values: &[Value]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for value in values {
        match value {
            Value::Null => hasher.write_u8(0),
            Value::Bool(v) => {
                hasher.write_u8(1);
                v.hash(&mut hasher);
            }
            Value::Int(v) => {
                hasher.write_u8(2);
                v.hash(&mut hasher);
            }
            Value::Float(v) => {
                hasher.write_u8(3);
                v.to_bits().hash(&mut hasher);
            }
            Value::Decimal(v) => {
                hasher.write_u8(4);
                v.hash(&mut hasher);
            }
            Value::Text(v) => {
                hasher.write_u8(5);
                v.hash(&mut hasher);
            }
            Value::Bytes(v) => {
                hasher.write_u8(6);
                v.hash(&mut hasher);
            }
            Value::Date(v) => {
                hasher.write_u8(7);
                v.hash(&mut hasher);
            }
            Value::Time(v) => {
                hasher.write_u8(8);
                v.hash(&mut hasher);
            }
            Value::Timestamp(v) => {
                hasher.write_u8(9);
                v.hash(&mut hasher);
            }
            Value::Uuid(v) => {
                hasher.write_u8(10);
                v.hash(&mut hasher);
            }
            Value::Json(v) => {
                hasher.write_u8(11);
                v.to_string().hash(&mut hasher);
            }
        }
    }
    hasher.finish()
}

/// Weak identity map from [`IdentityKey`] to live objects.
#[derive(Debug, Default)]
pub struct AliveMap {
    entries: HashMap<IdentityKey, Weak<ObjectInfo>>,
}

impl AliveMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the live object for a key, pruning the entry if it died.
    pub fn get(&mut self, key: &IdentityKey) -> Option<Arc<ObjectInfo>> {
        match self.entries.get(key) {
            Some(weak) => match weak.upgrade() {
                Some(obj) => Some(obj),
                None => {
                    self.entries.remove(key);
                    None
                }
            },
            None => None,
        }
    }

    /// Register a live object under a key.
    pub fn insert(&mut self, key: IdentityKey, obj: &Arc<ObjectInfo>) {
        self.entries.insert(key, Arc::downgrade(obj));
    }

    /// Drop a key.
    pub fn remove(&mut self, key: &IdentityKey) {
        self.entries.remove(key);
    }

    /// Move an object from one key to another (temporary -> real).
    pub fn rekey(&mut self, old: &IdentityKey, new: IdentityKey) {
        if let Some(weak) = self.entries.remove(old) {
            self.entries.insert(new, weak);
        }
    }

    /// Drop all entries whose objects have been collected. Returns how
    /// many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        before - self.entries.len()
    }

    /// Iterate live objects.
    pub fn live(&self) -> impl Iterator<Item = Arc<ObjectInfo>> + '_ {
        self.entries.values().filter_map(Weak::upgrade)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
