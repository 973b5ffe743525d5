// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Event subscriber registry.
//!
//! Each event name maps to an immutable list of callbacks. Subscribing or
//! unsubscribing swaps in a new list; dispatch clones the current one and
//! calls it without holding the lock. Callbacks may therefore subscribe or
//! unsubscribe (themselves or others) while being dispatched. A callback
//! removed mid-dispatch still sees the event being dispatched, and nothing
//! after it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use serde_json::Value;

/// A subscriber callback.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

type Entries = Arc<Vec<(u64, Callback)>>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_event: HashMap<String, Entries>,
}

/// Shared handle to a subscriber registry.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<RwLock<Registry>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event`.
    pub fn on<F>(&self, event: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let event = event.into();
        let mut registry = self.inner.write().unwrap_or_else(|e| e.into_inner());
        registry.next_id += 1;
        let id = registry.next_id;

        let current = registry.by_event.get(&event).cloned().unwrap_or_default();
        let mut next: Vec<(u64, Callback)> = current.iter().cloned().collect();
        next.push((id, Arc::new(callback)));
        registry.by_event.insert(event.clone(), Arc::new(next));

        Subscription {
            registry: Arc::downgrade(&self.inner),
            event,
            id,
        }
    }

    /// Call every subscriber of `event` with `data`. Returns how many ran.
    pub fn dispatch(&self, event: &str, data: &Value) -> usize {
        let snapshot = {
            let registry = self.inner.read().unwrap_or_else(|e| e.into_inner());
            match registry.by_event.get(event) {
                Some(entries) => Arc::clone(entries),
                None => return 0,
            }
        };
        for (_, callback) in snapshot.iter() {
            callback(data);
        }
        snapshot.len()
    }

    /// Number of subscribers currently registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        let registry = self.inner.read().unwrap_or_else(|e| e.into_inner());
        registry.by_event.get(event).map_or(0, |entries| entries.len())
    }
}

fn remove(registry: &RwLock<Registry>, event: &str, id: u64) -> bool {
    let mut registry = registry.write().unwrap_or_else(|e| e.into_inner());
    let Some(current) = registry.by_event.get(event) else {
        return false;
    };
    if !current.iter().any(|(entry_id, _)| *entry_id == id) {
        return false;
    }
    let next: Vec<(u64, Callback)> = current
        .iter()
        .filter(|(entry_id, _)| *entry_id != id)
        .cloned()
        .collect();
    if next.is_empty() {
        registry.by_event.remove(event);
    } else {
        registry.by_event.insert(event.to_string(), Arc::new(next));
    }
    true
}

/// Handle returned by [`Listeners::on`].
///
/// Dropping the handle keeps the subscription alive; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<RwLock<Registry>>,
    event: String,
    id: u64,
}

impl Subscription {
    /// The event this subscription listens to.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove the callback. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => remove(&registry, &self.event, self.id),
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
