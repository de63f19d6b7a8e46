//! Object cache and flush engine for Squall.
//!
//! This crate keeps mapped objects and their rows in sync:
//!
//! - `Store` fronts one blocking connection with an identity map, so each
//!   row has at most one live object
//! - `ObjectInfo` tracks per-column changes and pending add/remove state
//! - the flush engine writes pending changes in dependency order,
//!   parents before the children referencing them
//! - `commit` / `rollback` align in-memory state with the transaction
//!
//! Reads prefer memory over the backend; writes are deferred until a
//! flush. See `Store` for the full contract.

pub mod alive;
pub mod cache;
pub mod event;
mod flush;
pub mod info;
pub mod store;
pub mod variable;

pub use alive::{AliveMap, IdentityKey};
pub use cache::RecencyCache;
pub use event::{EventKind, EventPayload, EventSystem, HookAction, HookId};
pub use flush::FlushResult;
pub use info::{FlushState, ObjectInfo, ObjectRef, Pending};
pub use store::{ResultSet, Store, StoreConfig};
pub use variable::{LazyValue, VarState, Variable};
