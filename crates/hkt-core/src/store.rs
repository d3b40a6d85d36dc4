//! The entity store: a fixed-capacity, structure-of-arrays table of
//! entities by property, in its two policy variants.
//!
//! Both variants share the same storage and allocation rules; they differ
//! only in whether an out-of-range write implicitly materialises the slot
//! (`auto_create`), matching the source's stash-base-plus-two-concrete-
//! variants hierarchy without inheritance: a private inner struct carries
//! the shared behaviour, and [`MasterStore`]/[`VisibleStore`] wrap it with
//! their own additional methods.

use crate::ids::EntityId;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Entity snapshot: one entity's complete property row, as delivered to a
/// client that does not yet know the entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: EntityId,
    pub properties: Vec<i32>,
}

/// The full-state serialization format from SPEC_FULL.md §6, used for
/// diagnostics and save/restore -- not the hot path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullState {
    pub frame: i64,
    pub next_entity_id: u32,
    pub entities: Vec<EntitySnapshot>,
}

struct StoreInner {
    max_entities: usize,
    max_properties: usize,
    /// properties[property][entity]
    properties: Vec<Vec<i32>>,
    valid: Vec<bool>,
    /// Frame at which each slot most recently became valid (master only
    /// meaningfully tracked, but kept uniformly so both variants share one
    /// struct).
    creation_frame: Vec<i32>,
    free_list: Vec<u32>,
    next_index: u32,
    completed_frame: i64,
    dirty: Vec<bool>,
    auto_create: bool,
}

impl StoreInner {
    fn new(max_entities: usize, max_properties: usize, auto_create: bool) -> Self {
        Self {
            max_entities,
            max_properties,
            properties: vec![vec![0; max_entities]; max_properties],
            valid: vec![false; max_entities],
            creation_frame: vec![0; max_entities],
            free_list: Vec::new(),
            next_index: 0,
            completed_frame: 0,
            dirty: vec![false; max_entities],
            auto_create,
        }
    }

    fn allocate(&mut self, frame: i64) -> EntityId {
        let idx = if let Some(idx) = self.free_list.pop() {
            idx
        } else if (self.next_index as usize) < self.max_entities {
            let idx = self.next_index;
            self.next_index += 1;
            idx
        } else {
            error!(entities_max = self.max_entities, "entity store overflow on allocate");
            return EntityId::INVALID;
        };

        let i = idx as usize;
        self.valid[i] = true;
        self.creation_frame[i] = frame as i32;
        for col in &mut self.properties {
            col[i] = 0;
        }
        self.dirty[i] = true;
        EntityId(idx)
    }

    fn free(&mut self, e: EntityId) {
        if !self.is_valid(e) {
            return;
        }
        let i = e.index();
        self.valid[i] = false;
        self.free_list.push(e.0);
        self.dirty[i] = true;
    }

    fn is_valid(&self, e: EntityId) -> bool {
        e.is_valid_id() && e.index() < self.max_entities && self.valid[e.index()]
    }

    fn get(&self, e: EntityId, p: u16) -> i32 {
        if !self.is_valid(e) || p as usize >= self.max_properties {
            return 0;
        }
        self.properties[p as usize][e.index()]
    }

    fn set(&mut self, e: EntityId, p: u16, v: i32, frame: i64) {
        if p as usize >= self.max_properties {
            return;
        }
        if !self.is_valid(e) {
            if !self.auto_create || !e.is_valid_id() || e.index() >= self.max_entities {
                return;
            }
            let i = e.index();
            self.valid[i] = true;
            self.creation_frame[i] = frame as i32;
            if i as u32 >= self.next_index {
                self.next_index = i as u32 + 1;
            }
            for col in &mut self.properties {
                col[i] = 0;
            }
        }
        let i = e.index();
        if self.properties[p as usize][i] != v {
            self.properties[p as usize][i] = v;
            self.dirty[i] = true;
        }
    }

    fn for_each(&self, mut cb: impl FnMut(EntityId)) {
        for i in 0..self.max_entities {
            if self.valid[i] {
                cb(EntityId(i as u32));
            }
        }
    }

    /// The bit-rotation XOR fold mandated by SPEC_FULL.md §4.1 / §8. `fold_frame`
    /// controls whether the completed-frame counter is XORed in at the end
    /// (the master store's full `checksum()` does this; the radius-scoped
    /// partial variant used internally does not).
    fn checksum_inner(&self, fold_frame: bool) -> u32 {
        let mut checksum: u32 = 0;
        for i in 0..self.max_entities {
            if !self.valid[i] {
                continue;
            }
            for col in &self.properties {
                checksum ^= col[i] as u32;
                checksum = checksum.rotate_left(1);
            }
            checksum ^= i as u32;
        }
        if fold_frame {
            checksum ^= self.completed_frame as u32;
        }
        checksum
    }

    fn snapshot(&self, e: EntityId) -> Option<EntitySnapshot> {
        if !self.is_valid(e) {
            return None;
        }
        let properties = (0..self.max_properties).map(|p| self.properties[p][e.index()]).collect();
        Some(EntitySnapshot { entity_id: e, properties })
    }

    fn apply_snapshot(&mut self, snap: &EntitySnapshot, frame: i64) {
        let e = snap.entity_id;
        if !e.is_valid_id() || e.index() >= self.max_entities {
            return;
        }
        let i = e.index();
        if !self.valid[i] {
            self.valid[i] = true;
            self.creation_frame[i] = frame as i32;
            if i as u32 >= self.next_index {
                self.next_index = i as u32 + 1;
            }
        }
        let n = snap.properties.len().min(self.max_properties);
        for p in 0..n {
            self.properties[p][i] = snap.properties[p];
        }
        self.dirty[i] = true;
    }

    fn clear(&mut self) {
        for v in &mut self.valid {
            *v = false;
        }
        for col in &mut self.properties {
            col.iter_mut().for_each(|x| *x = 0);
        }
        self.free_list.clear();
        self.next_index = 0;
        self.completed_frame = 0;
    }

    fn full_state(&self) -> FullState {
        let mut entities = Vec::new();
        for i in 0..self.max_entities {
            if self.valid[i] {
                let properties = (0..self.max_properties).map(|p| self.properties[p][i]).collect();
                entities.push(EntitySnapshot { entity_id: EntityId(i as u32), properties });
            }
        }
        FullState { frame: self.completed_frame, next_entity_id: self.next_index, entities }
    }

    fn restore_full_state(&mut self, state: &FullState) {
        self.clear();
        self.completed_frame = state.frame;
        self.next_index = state.next_entity_id;
        for snap in &state.entities {
            let i = snap.entity_id.index();
            if i >= self.max_entities {
                continue;
            }
            self.valid[i] = true;
            let n = snap.properties.len().min(self.max_properties);
            for p in 0..n {
                self.properties[p][i] = snap.properties[p];
            }
        }
    }
}

/// Authoritative, server-side entity store. Rejects writes and reads on
/// invalid slots and tracks the frame each entity was created on so the
/// processor can validate event subjects against a validation horizon.
pub struct MasterStore {
    inner: StoreInner,
    dirty_set: Vec<EntityId>,
}

impl MasterStore {
    pub fn new(max_entities: usize, max_properties: usize) -> Self {
        Self { inner: StoreInner::new(max_entities, max_properties, false), dirty_set: Vec::new() }
    }

    pub fn max_entities(&self) -> usize {
        self.inner.max_entities
    }

    pub fn max_properties(&self) -> usize {
        self.inner.max_properties
    }

    pub fn allocate(&mut self, frame: i64) -> EntityId {
        let e = self.inner.allocate(frame);
        if e.is_valid_id() {
            self.dirty_set.push(e);
        }
        e
    }

    pub fn free(&mut self, e: EntityId) {
        if self.inner.is_valid(e) {
            self.dirty_set.push(e);
        }
        self.inner.free(e);
    }

    pub fn is_valid(&self, e: EntityId) -> bool {
        self.inner.is_valid(e)
    }

    pub fn get(&self, e: EntityId, p: u16) -> i32 {
        self.inner.get(e, p)
    }

    pub fn set(&mut self, e: EntityId, p: u16, v: i32, frame: i64) {
        let was_dirty_before = self.inner.is_valid(e) && self.inner.get(e, p) != v;
        self.inner.set(e, p, v, frame);
        if was_dirty_before {
            self.dirty_set.push(e);
        }
    }

    pub fn for_each(&self, cb: impl FnMut(EntityId)) {
        self.inner.for_each(cb);
    }

    /// The full checksum from SPEC_FULL.md §4.1: property fold plus the
    /// completed-frame counter.
    pub fn checksum(&self) -> u32 {
        self.inner.checksum_inner(true)
    }

    pub fn snapshot(&self, e: EntityId) -> Option<EntitySnapshot> {
        self.inner.snapshot(e)
    }

    /// Applies an ordered list of pending writes to the backing store.
    pub fn apply_writes(&mut self, writes: &[crate::vmstore::PendingWrite]) {
        let frame = self.inner.completed_frame;
        for w in writes {
            self.set(w.entity, w.property, w.value, frame);
        }
    }

    /// Linear scan filtered by integer squared distance, ascending entity
    /// id, skipping the centre entity and any entity sharing the centre's
    /// team. See SPEC_FULL.md §9 for why same-team is excluded here (the
    /// `ForEachInRadius`/`FindInRadius` inconsistency the spec resolves).
    pub fn for_each_in_radius(&self, centre: EntityId, radius_cm: i64, mut cb: impl FnMut(EntityId)) {
        if !self.is_valid(centre) {
            return;
        }
        let cx = self.get(centre, crate::ids::PropertyId::POS_X.0) as i64;
        let cy = self.get(centre, crate::ids::PropertyId::POS_Y.0) as i64;
        let cz = self.get(centre, crate::ids::PropertyId::POS_Z.0) as i64;
        let team = self.get(centre, crate::ids::PropertyId::TEAM.0);
        let r2 = radius_cm * radius_cm;

        self.for_each(|e| {
            if e == centre {
                return;
            }
            if self.get(e, crate::ids::PropertyId::TEAM.0) == team {
                return;
            }
            let dx = self.get(e, crate::ids::PropertyId::POS_X.0) as i64 - cx;
            let dy = self.get(e, crate::ids::PropertyId::POS_Y.0) as i64 - cy;
            let dz = self.get(e, crate::ids::PropertyId::POS_Z.0) as i64 - cz;
            let dist2 = dx * dx + dy * dy + dz * dz;
            if dist2 <= r2 {
                cb(e);
            }
        });
    }

    /// True iff `e` exists and was created no later than `frame`.
    pub fn validate_frame(&self, e: EntityId, frame: i64) -> bool {
        self.is_valid(e) && (self.inner.creation_frame[e.index()] as i64) <= frame
    }

    pub fn dirty_set(&self) -> &[EntityId] {
        &self.dirty_set
    }

    pub fn clear_dirty(&mut self) {
        self.dirty_set.clear();
    }

    pub fn advance_frame(&mut self, frame: i64) {
        debug_assert!(frame >= self.inner.completed_frame, "completed frame must be monotonic");
        self.inner.completed_frame = frame;
    }

    pub fn completed_frame(&self) -> i64 {
        self.inner.completed_frame
    }

    pub fn serialize_full(&self) -> FullState {
        self.inner.full_state()
    }

    pub fn deserialize_full(&mut self, state: &FullState) {
        self.inner.restore_full_state(state);
        self.dirty_set.clear();
    }
}

/// Client-side entity store. Writes to an invalid slot implicitly
/// materialise it, which is how attached snapshots instantiate entities
/// the client has not previously seen.
pub struct VisibleStore {
    inner: StoreInner,
}

impl VisibleStore {
    pub fn new(max_entities: usize, max_properties: usize) -> Self {
        Self { inner: StoreInner::new(max_entities, max_properties, true) }
    }

    pub fn is_valid(&self, e: EntityId) -> bool {
        self.inner.is_valid(e)
    }

    pub fn get(&self, e: EntityId, p: u16) -> i32 {
        self.inner.get(e, p)
    }

    pub fn set(&mut self, e: EntityId, p: u16, v: i32, frame: i64) {
        self.inner.set(e, p, v, frame);
    }

    pub fn for_each(&self, cb: impl FnMut(EntityId)) {
        self.inner.for_each(cb);
    }

    pub fn checksum(&self) -> u32 {
        self.inner.checksum_inner(true)
    }

    pub fn apply_snapshot(&mut self, snap: &EntitySnapshot, frame: i64) {
        self.inner.apply_snapshot(snap, frame);
    }

    pub fn apply_snapshots(&mut self, snaps: &[EntitySnapshot], frame: i64) {
        for s in snaps {
            self.apply_snapshot(s, frame);
        }
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PropertyId;

    #[test]
    fn allocate_reuses_free_list_before_extending() {
        let mut store = MasterStore::new(4, 2);
        let a = store.allocate(0);
        let b = store.allocate(0);
        store.free(a);
        let c = store.allocate(0);
        assert_eq!(c, a, "freed slot should be recycled before extending the tail");
        assert_ne!(b, c);
    }

    #[test]
    fn allocate_returns_sentinel_when_full() {
        let mut store = MasterStore::new(2, 1);
        let _a = store.allocate(0);
        let _b = store.allocate(0);
        let c = store.allocate(0);
        assert_eq!(c, EntityId::INVALID);
    }

    #[test]
    fn free_is_idempotent() {
        let mut store = MasterStore::new(2, 1);
        let a = store.allocate(0);
        store.free(a);
        store.free(a);
        assert!(!store.is_valid(a));
    }

    #[test]
    fn get_on_invalid_entity_is_zero() {
        let store = MasterStore::new(2, 2);
        assert_eq!(store.get(EntityId(0), 0), 0);
        assert_eq!(store.get(EntityId::INVALID, 0), 0);
    }

    #[test]
    fn set_out_of_range_property_is_noop() {
        let mut store = MasterStore::new(2, 2);
        let a = store.allocate(0);
        store.set(a, 99, 5, 0);
        assert_eq!(store.get(a, 99), 0);
    }

    #[test]
    fn master_rejects_write_to_invalid_slot() {
        let mut store = MasterStore::new(2, 2);
        store.set(EntityId(0), 0, 5, 0);
        assert!(!store.is_valid(EntityId(0)));
        assert_eq!(store.get(EntityId(0), 0), 0);
    }

    #[test]
    fn visible_auto_creates_on_write() {
        let mut store = VisibleStore::new(2, 2);
        store.set(EntityId(1), 0, 42, 3);
        assert!(store.is_valid(EntityId(1)));
        assert_eq!(store.get(EntityId(1), 0), 42);
    }

    #[test]
    fn for_each_visits_ascending_order() {
        let mut store = MasterStore::new(8, 1);
        let ids: Vec<_> = (0..5).map(|_| store.allocate(0)).collect();
        store.free(ids[2]);
        let mut seen = Vec::new();
        store.for_each(|e| seen.push(e));
        assert_eq!(seen, vec![ids[0], ids[1], ids[3], ids[4]]);
    }

    #[test]
    fn checksum_is_pure_function_of_state() {
        let mut a = MasterStore::new(4, 2);
        let mut b = MasterStore::new(4, 2);
        let ea = a.allocate(0);
        a.set(ea, 0, 7, 0);
        let eb = b.allocate(0);
        b.set(eb, 0, 7, 0);
        assert_eq!(a.checksum(), b.checksum());
    }

    #[test]
    fn checksum_changes_with_property_value() {
        let mut a = MasterStore::new(4, 2);
        let e = a.allocate(0);
        let before = a.checksum();
        a.set(e, 0, 123, 0);
        assert_ne!(before, a.checksum());
    }

    #[test]
    fn apply_snapshot_is_idempotent() {
        let mut store = VisibleStore::new(4, 3);
        let snap = EntitySnapshot { entity_id: EntityId(2), properties: vec![1, 2, 3] };
        store.apply_snapshot(&snap, 0);
        let first = (0..3).map(|p| store.get(EntityId(2), p)).collect::<Vec<_>>();
        store.apply_snapshot(&snap, 0);
        let second = (0..3).map(|p| store.get(EntityId(2), p)).collect::<Vec<_>>();
        assert_eq!(first, second);
    }

    #[test]
    fn full_state_round_trips() {
        let mut store = MasterStore::new(4, 2);
        let e = store.allocate(0);
        store.set(e, 0, 11, 0);
        store.set(e, 1, 22, 0);
        store.advance_frame(5);
        let state = store.serialize_full();

        let mut restored = MasterStore::new(4, 2);
        restored.deserialize_full(&state);
        assert_eq!(restored.get(e, 0), 11);
        assert_eq!(restored.get(e, 1), 22);
        assert_eq!(restored.completed_frame(), 5);
        assert_eq!(restored.serialize_full(), state);
    }

    #[test]
    fn for_each_in_radius_skips_centre_and_same_team() {
        let mut store = MasterStore::new(8, 16);
        let centre = store.allocate(0);
        store.set(centre, PropertyId::TEAM.0, 1, 0);

        let ally = store.allocate(0);
        store.set(ally, PropertyId::TEAM.0, 1, 0);

        let enemy = store.allocate(0);
        store.set(enemy, PropertyId::TEAM.0, 2, 0);
        store.set(enemy, PropertyId::POS_X.0, 10, 0);

        let mut found = Vec::new();
        store.for_each_in_radius(centre, 1000, |e| found.push(e));
        assert_eq!(found, vec![enemy]);
    }
}
