//! The per-VM write-buffering overlay over the entity store (SPEC_FULL.md
//! §4.3). Short-lived: reset on allocation from the processor's store
//! pool, drained on finalization.

use crate::ids::{EntityId, PropertyId};
use crate::store::MasterStore;
use std::collections::HashMap;

/// Packs `(entity, property)` into a single 64-bit cache key.
fn cache_key(e: EntityId, p: u16) -> u64 {
    ((e.0 as u64) << 16) | (p as u64)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingWrite {
    pub entity: EntityId,
    pub property: u16,
    pub value: i32,
}

/// A short-lived overlay bound to one runtime. `subject`/`target` identify
/// which entity `read`/`write` (as opposed to `read_entity`/`write_entity`)
/// operate on.
#[derive(Default)]
pub struct VmStore {
    pub subject: EntityId,
    pub target: EntityId,
    local_cache: HashMap<u64, i32>,
    pending_writes: Vec<PendingWrite>,
}

impl VmStore {
    pub fn new() -> Self {
        Self { subject: EntityId::INVALID, target: EntityId::INVALID, local_cache: HashMap::new(), pending_writes: Vec::new() }
    }

    /// Reads the subject entity's property: cache first, then falls
    /// through to the backing store.
    pub fn read(&mut self, stash: &MasterStore, property: impl Into<PropertyId>) -> i32 {
        let subject = self.subject;
        self.read_entity(stash, subject, property)
    }

    /// Reads an explicit entity's property through the cache.
    pub fn read_entity(&mut self, stash: &MasterStore, entity: EntityId, property: impl Into<PropertyId>) -> i32 {
        let property = property.into();
        let key = cache_key(entity, property.0);
        if let Some(&v) = self.local_cache.get(&key) {
            return v;
        }
        let v = stash.get(entity, property.0);
        self.local_cache.insert(key, v);
        v
    }

    /// Writes the subject entity's property: updates the cache and
    /// appends a pending write, without touching the backing store.
    pub fn write(&mut self, property: impl Into<PropertyId>, value: i32) {
        let subject = self.subject;
        self.write_entity(subject, property, value);
    }

    pub fn write_entity(&mut self, entity: EntityId, property: impl Into<PropertyId>, value: i32) {
        let property = property.into();
        let key = cache_key(entity, property.0);
        self.local_cache.insert(key, value);
        self.pending_writes.push(PendingWrite { entity, property: property.0, value });
    }

    pub fn pending_writes(&self) -> &[PendingWrite] {
        &self.pending_writes
    }

    pub fn clear_pending(&mut self) {
        self.pending_writes.clear();
    }

    /// Resets the overlay to its just-allocated state for the next VM.
    pub fn reset(&mut self) {
        self.subject = EntityId::INVALID;
        self.target = EntityId::INVALID;
        self.local_cache.clear();
        self.pending_writes.clear();
    }
}
