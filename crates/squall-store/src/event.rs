//! Per-object event system.
//!
//! Objects carry an [`EventSystem`] that the store and application hook
//! into: the store listens for changes to maintain its dirty log, the
//! application may listen for lifecycle notifications such as `PreFlush`.
//!
//! # Emission semantics
//!
//! `emit` snapshots the registered callbacks at the start of an emission
//! and releases the registry lock before invoking any of them. Hooks added
//! during an emission pass are not invoked in that pass; a callback that
//! returns [`HookAction::Unhook`] is removed after the pass completes, in
//! one atomic step. A callback that fails is logged and skipped; emission
//! continues with the remaining callbacks.
//!
//! Because the registry lock is never held while callbacks run, callbacks
//! may freely call `hook`, `unhook`, or `emit` on the same system. A
//! callback that emits its own event kind does not re-enter itself: an
//! entry is skipped by any pass that reaches it while it is running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use squall_core::Result;

/// The lifecycle moments an object can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A variable transitioned to a new value.
    Changed,
    /// The flush engine is about to write this object.
    PreFlush,
    /// This object's statement executed successfully.
    Flushed,
    /// The object's cached state was discarded (rollback).
    Invalidated,
    /// The object's delete statement executed successfully.
    Removed,
}

/// Payload delivered to callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPayload {
    /// A variable changed. `from_db` is true when the change came from
    /// hydration rather than application code.
    Changed { column: usize, from_db: bool },
    PreFlush,
    Flushed,
    Invalidated,
    Removed,
}

impl EventPayload {
    pub const fn kind(&self) -> EventKind {
        match self {
            EventPayload::Changed { .. } => EventKind::Changed,
            EventPayload::PreFlush => EventKind::PreFlush,
            EventPayload::Flushed => EventKind::Flushed,
            EventPayload::Invalidated => EventKind::Invalidated,
            EventPayload::Removed => EventKind::Removed,
        }
    }
}

/// What a callback wants done with itself after this invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Stay registered.
    Keep,
    /// Remove this hook once the current emission pass completes.
    Unhook,
}

/// Identifies a registered hook for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

type Callback = Box<dyn FnMut(&EventPayload) -> Result<HookAction> + Send>;

struct HookEntry {
    id: u64,
    /// Taken out for the duration of an invocation; `None` means the
    /// callback is currently running in some emission pass.
    callback: Mutex<Option<Callback>>,
}

#[derive(Default)]
struct Registry {
    hooks: HashMap<EventKind, Vec<Arc<HookEntry>>>,
}

/// Publish/subscribe registry for one object.
pub struct EventSystem {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSystem").finish_non_exhaustive()
    }
}

impl Default for EventSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSystem {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback for `kind`. Returns an id usable with `unhook`.
    pub fn hook<F>(&self, kind: EventKind, callback: F) -> HookId
    where
        F: FnMut(&EventPayload) -> Result<HookAction> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(HookEntry {
            id,
            callback: Mutex::new(Some(Box::new(callback))),
        });
        let mut registry = self.lock_registry();
        registry.hooks.entry(kind).or_default().push(entry);
        HookId(id)
    }

    /// Remove a previously registered callback. Removing an id twice, or
    /// an id already dropped by `HookAction::Unhook`, is a no-op.
    pub fn unhook(&self, id: HookId) {
        let mut registry = self.lock_registry();
        for entries in registry.hooks.values_mut() {
            entries.retain(|e| e.id != id.0);
        }
    }

    /// Invoke every callback registered for the payload's kind.
    pub fn emit(&self, payload: &EventPayload) {
        let snapshot: Vec<Arc<HookEntry>> = {
            let registry = self.lock_registry();
            registry
                .hooks
                .get(&payload.kind())
                .map(|entries| entries.to_vec())
                .unwrap_or_default()
        };

        let mut stale: Vec<u64> = Vec::new();
        for entry in &snapshot {
            // Take the callback out for the call: a re-entrant emit that
            // reaches this entry while it runs skips it instead of
            // deadlocking on its lock.
            let taken = entry
                .callback
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            let Some(mut callback) = taken else {
                continue;
            };
            let result = (callback)(payload);
            *entry
                .callback
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(callback);
            match result {
                Ok(HookAction::Keep) => {}
                Ok(HookAction::Unhook) => stale.push(entry.id),
                Err(e) => {
                    tracing::warn!(
                        event = ?payload.kind(),
                        error = %e,
                        "event callback failed; continuing emission"
                    );
                }
            }
        }

        if !stale.is_empty() {
            let mut registry = self.lock_registry();
            for entries in registry.hooks.values_mut() {
                entries.retain(|e| !stale.contains(&e.id));
            }
        }
    }

    /// Whether any callback is registered for `kind`.
    pub fn has_hooks(&self, kind: EventKind) -> bool {
        let registry = self.lock_registry();
        registry.hooks.get(&kind).is_some_and(|e| !e.is_empty())
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
