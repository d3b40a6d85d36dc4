//! Per-client filtering of per-tick events, with first-sight snapshot
//! attachment and removal-set emission (SPEC_FULL.md §4.7).

use crate::relevancy::{Cell, ClientId, RelevancyIndex};
use hkt_core::ids::{EntityId, PropertyId};
use hkt_core::store::{EntitySnapshot, MasterStore};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A single external request that, if its tag matches a registered
/// program, causes a runtime to be created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntentEvent {
    pub event_id: u32,
    pub subject: EntityId,
    pub target: EntityId,
    pub tag: String,
    pub location: (i32, i32, i32),
    pub payload: Vec<u8>,
    pub creation_frame: i64,
    pub is_global: bool,
}

/// Per-tick bundle handed to the transport for one client. Empty iff all
/// three inner collections are empty -- an empty batch must never be
/// dispatched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClientBatch {
    pub frame_number: i64,
    pub events: Vec<IntentEvent>,
    pub snapshots: Vec<EntitySnapshot>,
    pub removed_entities: Vec<EntityId>,
}

impl ClientBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.snapshots.is_empty() && self.removed_entities.is_empty()
    }
}

/// Per-client known-entity bookkeeping, reused across ticks.
#[derive(Default)]
struct ClientRelevancyRecord {
    known: HashSet<EntityId>,
}

/// Fans out per-tick event filtering across clients and tracks each
/// client's known-entity set between ticks.
#[derive(Default)]
pub struct Dispatcher {
    records: HashMap<ClientId, ClientRelevancyRecord>,
}

struct PrecomputedEvent<'a> {
    event: &'a IntentEvent,
    cell: Cell,
    is_global: bool,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_client(&mut self, client: ClientId) {
        self.records.entry(client).or_default();
    }

    pub fn unregister_client(&mut self, client: ClientId) {
        self.records.remove(&client);
    }

    /// Computes one batch per registered client for this tick.
    pub fn dispatch(
        &mut self,
        frame: i64,
        events: &[IntentEvent],
        relevancy: &RelevancyIndex,
        master: &MasterStore,
    ) -> HashMap<ClientId, ClientBatch> {
        // Relevance is keyed off the subject's own world position on the
        // master store, not the event's `location` payload (that field is
        // the target-location parameter copied into the subject's store,
        // an unrelated piece of event data).
        let precomputed: Vec<PrecomputedEvent> = events
            .iter()
            .map(|event| {
                let has_location = master.is_valid(event.subject);
                let cell = if has_location {
                    let x = master.get(event.subject, PropertyId::POS_X.0) as i64;
                    let y = master.get(event.subject, PropertyId::POS_Y.0) as i64;
                    relevancy.location_to_cell((x, y, 0))
                } else {
                    (0, 0)
                };
                PrecomputedEvent { event, cell, is_global: event.is_global || !has_location }
            })
            .collect();

        let clients: Vec<ClientId> = self.records.keys().copied().collect();
        let results: Vec<(ClientId, ClientBatch, HashSet<EntityId>)> = clients
            .into_par_iter()
            .map(|client| {
                let known = &self.records.get(&client).expect("client registered").known;
                let (batch, new_known) = Self::build_client_batch(frame, client, &precomputed, relevancy, master, known);
                (client, batch, new_known)
            })
            .collect();

        let mut out = HashMap::with_capacity(results.len());
        for (client, batch, new_known) in results {
            if let Some(record) = self.records.get_mut(&client) {
                record.known = new_known;
            }
            out.insert(client, batch);
        }
        out
    }

    fn build_client_batch(
        frame: i64,
        client: ClientId,
        precomputed: &[PrecomputedEvent],
        relevancy: &RelevancyIndex,
        master: &MasterStore,
        known: &HashSet<EntityId>,
    ) -> (ClientBatch, HashSet<EntityId>) {
        let mut batch = ClientBatch { frame_number: frame, ..Default::default() };
        let mut relevant_now: HashSet<EntityId> = HashSet::new();

        for pe in precomputed {
            let interested = pe.is_global || relevancy.is_interested(client, pe.cell);
            if !interested {
                continue;
            }
            batch.events.push(pe.event.clone());
            if pe.event.subject.is_valid_id() {
                relevant_now.insert(pe.event.subject);
            }
            if pe.event.target.is_valid_id() {
                relevant_now.insert(pe.event.target);
            }
        }

        let entered: Vec<EntityId> = relevant_now.difference(known).copied().collect();
        let exited: Vec<EntityId> = known.difference(&relevant_now).copied().collect();

        for id in &entered {
            if let Some(snapshot) = master.snapshot(*id) {
                batch.snapshots.push(snapshot);
            }
        }
        batch.removed_entities = exited;

        (batch, relevant_now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_event(id: u32, subject: EntityId, location: (i32, i32, i32)) -> IntentEvent {
        IntentEvent { event_id: id, subject, target: EntityId::INVALID, tag: "T".into(), location, payload: vec![], creation_frame: 0, is_global: false }
    }

    #[test]
    fn client_in_cell_receives_event_and_first_sight_snapshot() {
        let mut master = MasterStore::new(8, 4);
        let e = master.allocate(0);
        master.set(e, PropertyId::POS_X.0, 100, 0);

        let mut relevancy = RelevancyIndex::new(5_000, 1);
        let client = ClientId(1);
        relevancy.register_client(client);
        relevancy.set_client_position(client, (0, 0, 0));
        relevancy.update(0.016);

        let mut dispatcher = Dispatcher::new();
        dispatcher.register_client(client);

        let events = vec![make_event(1, e, (100, 0, 0))];
        let batches = dispatcher.dispatch(0, &events, &relevancy, &master);

        let batch = &batches[&client];
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.snapshots.len(), 1);
        assert_eq!(batch.snapshots[0].entity_id, e);
    }

    #[test]
    fn client_outside_cell_gets_empty_batch() {
        let mut master = MasterStore::new(8, 4);
        let e = master.allocate(0);
        master.set(e, PropertyId::POS_X.0, 50_000, 0);

        let mut relevancy = RelevancyIndex::new(5_000, 1);
        let client = ClientId(2);
        relevancy.register_client(client);
        relevancy.set_client_position(client, (0, 0, 0));
        relevancy.update(0.016);

        let mut dispatcher = Dispatcher::new();
        dispatcher.register_client(client);

        let events = vec![make_event(1, e, (50_000, 0, 0))];
        let batches = dispatcher.dispatch(0, &events, &relevancy, &master);
        assert!(batches[&client].is_empty());
    }

    #[test]
    fn entity_leaving_relevancy_produces_removal() {
        let mut master = MasterStore::new(8, 4);
        let e = master.allocate(0);
        master.set(e, PropertyId::POS_X.0, 0, 0);

        let mut relevancy = RelevancyIndex::new(5_000, 1);
        let client = ClientId(3);
        relevancy.register_client(client);
        relevancy.set_client_position(client, (0, 0, 0));
        relevancy.update(0.016);

        let mut dispatcher = Dispatcher::new();
        dispatcher.register_client(client);

        let first = vec![make_event(1, e, (0, 0, 0))];
        let batches1 = dispatcher.dispatch(0, &first, &relevancy, &master);
        assert_eq!(batches1[&client].snapshots.len(), 1);

        master.set(e, PropertyId::POS_X.0, 50_000, 1);
        let second = vec![make_event(2, e, (50_000, 0, 0))];
        let batches2 = dispatcher.dispatch(1, &second, &relevancy, &master);
        assert_eq!(batches2[&client].removed_entities, vec![e]);
    }
}
