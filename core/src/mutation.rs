//! In-flight delete tracking.
//!
//! RULE: A key is in the set exactly while its delete request is
//! outstanding. `begin` hands out an InFlightGuard; dropping the guard
//! ends the mutation, so every exit path (success, error, panic, task
//! abort) releases the key.

use crate::types::ItemKey;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct MutationTracker {
    in_flight: Arc<Mutex<HashSet<ItemKey>>>,
}

impl MutationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `key`. Returns `None` if a delete for it is already in flight;
    /// the caller must not issue another request in that case.
    pub fn begin(&self, key: ItemKey) -> Option<InFlightGuard> {
        let admitted = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone());
        if !admitted {
            log::debug!("mutation: {key} already in flight, not admitted");
            return None;
        }
        Some(InFlightGuard {
            tracker: self.clone(),
            key,
        })
    }

    /// Remove `key`. Returns whether it was present.
    pub fn end(&self, key: &ItemKey) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }

    pub fn is_in_flight(&self, key: &ItemKey) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    /// Snapshot of the in-flight set, sorted.
    pub fn in_flight_keys(&self) -> Vec<ItemKey> {
        let mut keys: Vec<ItemKey> = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Proof that a key was admitted. Ends the mutation on drop.
pub struct InFlightGuard {
    tracker: MutationTracker,
    key:     ItemKey,
}

impl InFlightGuard {
    pub fn key(&self) -> &ItemKey {
        &self.key
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.end(&self.key);
    }
}
