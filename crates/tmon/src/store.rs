//! Observable, persisted value store.
//!
//! A `Store<V>` owns one value, persists it through an injected
//! [`Persistence`] backend and notifies listeners after every write. Each
//! store is created explicitly with [`Store::init`]; there is no global
//! instance.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, warn};

use crate::error::Result;

// ============================================================================
// Persistence
// ============================================================================

/// Storage backend for a single value.
pub trait Persistence<V>: Send + Sync {
    /// Returns the stored value; `Ok(None)` when nothing is stored.
    fn load(&self) -> Result<Option<V>>;

    fn save(&self, value: &V) -> Result<()>;
}

/// Keeps the value in memory only.
#[derive(Debug, Default)]
pub struct MemoryPersistence<V> {
    slot: Mutex<Option<V>>,
}

impl<V> MemoryPersistence<V> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn with_value(value: V) -> Self {
        Self {
            slot: Mutex::new(Some(value)),
        }
    }
}

impl<V: Clone + Send> Persistence<V> for MemoryPersistence<V> {
    fn load(&self) -> Result<Option<V>> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, value: &V) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.clone());
        Ok(())
    }
}

// ============================================================================
// Store
// ============================================================================

type Listener = Arc<dyn Fn() + Send + Sync>;

struct State<V> {
    value: V,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
}

struct Inner<V> {
    state: Mutex<State<V>>,
    persistence: Box<dyn Persistence<V>>,
    default_fn: Box<dyn Fn() -> V + Send + Sync>,
}

impl<V> Inner<V> {
    fn lock(&self) -> MutexGuard<'_, State<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle to an observable value. Clones refer to the same store.
pub struct Store<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for Store<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + 'static> Store<V> {
    /// Loads the persisted value, or `default_fn()` when nothing usable is
    /// stored. Never fails.
    pub fn init(
        persistence: impl Persistence<V> + 'static,
        default_fn: impl Fn() -> V + Send + Sync + 'static,
    ) -> Self {
        let value = match persistence.load() {
            Ok(Some(value)) => value,
            Ok(None) => default_fn(),
            Err(e) => {
                debug!(error = %e, "Stored value unusable, using default");
                default_fn()
            }
        };

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    value,
                    listeners: Vec::new(),
                    next_listener_id: 0,
                }),
                persistence: Box::new(persistence),
                default_fn: Box::new(default_fn),
            }),
        }
    }

    /// The current value.
    pub fn read(&self) -> V {
        self.inner.lock().value.clone()
    }

    /// Replaces the value, persists it, then calls every listener
    /// registered before this call exactly once, in registration order.
    ///
    /// Persistence failures are logged and otherwise ignored.
    pub fn write(&self, value: V) {
        let listeners: Vec<Listener> = {
            let mut state = self.inner.lock();
            if let Err(e) = self.inner.persistence.save(&value) {
                warn!(error = %e, "Failed to persist value");
            }
            state.value = value;
            state
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };

        // Outside the lock, so listeners may read or write the store.
        for listener in listeners {
            listener();
        }
    }

    /// Registers `listener` to run after every write.
    #[must_use = "dropping the subscription makes it impossible to unsubscribe"]
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let mut state = self.inner.lock();
        let id = state.next_listener_id;
        state.next_listener_id = state.next_listener_id.saturating_add(1);
        state.listeners.push((id, Arc::new(listener)));

        let weak: Weak<Inner<V>> = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().listeners.retain(|(other, _)| *other != id);
                }
            })),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Restores the default value and drops every listener. Nothing is
    /// persisted.
    pub fn reset(&self) {
        let default = (self.inner.default_fn)();
        let mut state = self.inner.lock();
        state.value = default;
        state.listeners.clear();
    }
}

/// Handle for one registered listener.
///
/// Dropping it leaves the listener registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Removes exactly the listener this subscription registered.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
