//! End-to-end scenarios from SPEC_FULL.md §8, one test per scenario.

use hkt_core::ids::{entity_type, reg, EntityId, PropertyId};
use hkt_core::instruction::Op;
use hkt_core::program::{ProgramRegistry, VmProgram};
use hkt_core::store::MasterStore;
use hkt_sim::config::SimConfig;
use hkt_sim::dispatcher::{ClientBatch, Dispatcher, IntentEvent};
use hkt_sim::processor::Processor;
use hkt_sim::relevancy::{ClientId, RelevancyIndex};
use std::sync::Arc;

fn submit(tag: &str, subject: EntityId, target: EntityId, location: (i32, i32, i32)) -> IntentEvent {
    IntentEvent { event_id: 1, subject, target, tag: tag.to_string(), location, payload: vec![], creation_frame: 0, is_global: false }
}

#[test]
fn scenario_1_empty_tick() {
    let registry = Arc::new(ProgramRegistry::new());
    let mut processor = Processor::new(&SimConfig::default(), registry).unwrap();
    let mut master = MasterStore::new(8, 8);
    let before = master.checksum();

    let diag = processor.tick(0, 0.016, &mut master);
    assert_eq!(diag.active, 0);
    assert_eq!(diag.pending, 0);
    assert_eq!(diag.completed, 0);
    assert_eq!(master.checksum(), before);
}

#[test]
fn scenario_2_spawn_and_halt() {
    let registry = Arc::new(ProgramRegistry::new());
    registry.register(VmProgram::new("T", vec![Op::spawn_entity(0), Op::halt()]).with_strings(vec!["/class/Foo".into()]));
    let mut processor = Processor::new(&SimConfig::default(), registry).unwrap();
    let mut master = MasterStore::new(16, 32);
    // Pre-allocate entities 0..6 as filler so the subject lands on id 7,
    // matching the scenario's literal "subject = entity 7".
    for _ in 0..7 {
        master.allocate(0);
    }
    let subject = master.allocate(0);
    assert_eq!(subject, EntityId(7));

    processor.submit_event(submit("T", subject, EntityId::INVALID, (0, 0, 0)));
    let diag = processor.tick(1, 0.016, &mut master);
    assert_eq!(diag.completed, 1, "the submitting runtime should complete and return to the pool");
    assert_eq!(diag.active, 0);

    let mut spawned_count = 0;
    master.for_each(|e| {
        if e != subject {
            spawned_count += 1;
            assert_eq!(master.get(e, PropertyId::OWNER.0), subject.0 as i32);
            assert_eq!(master.get(e, PropertyId::ENTITY_TYPE.0), entity_type::PROJECTILE);
        }
    });
    assert_eq!(spawned_count, 1, "exactly one new entity should exist");
}

#[test]
fn scenario_3_arithmetic_and_compare() {
    let registry = Arc::new(ProgramRegistry::new());
    registry.register(VmProgram::new(
        "T",
        vec![
            Op::load_const(reg::R0, 10),
            Op::load_const(reg::R1, 3),
            Op::div(reg::R2, reg::R0, reg::R1),
            Op::mod_(reg::R3, reg::R0, reg::R1),
            Op::cmp_gt(reg::R4, reg::R2, reg::R3),
            Op::save_store_entity(reg::SELF, PropertyId::PARAM0.0, reg::R2),
            Op::save_store_entity(reg::SELF, PropertyId::PARAM1.0, reg::R3),
            Op::save_store_entity(reg::SELF, PropertyId::PARAM2.0, reg::R4),
            Op::halt(),
        ],
    ));
    let mut processor = Processor::new(&SimConfig::default(), registry).unwrap();
    let mut master = MasterStore::new(8, 32);
    let subject = master.allocate(0);

    processor.submit_event(submit("T", subject, EntityId::INVALID, (0, 0, 0)));
    let diag = processor.tick(1, 0.016, &mut master);
    assert_eq!(diag.completed, 1);

    assert_eq!(master.get(subject, PropertyId::PARAM0.0), 3);
    assert_eq!(master.get(subject, PropertyId::PARAM1.0), 1);
    assert_eq!(master.get(subject, PropertyId::PARAM2.0), 1);
}

#[test]
fn scenario_4_timer_wait() {
    let registry = Arc::new(ProgramRegistry::new());
    registry.register(VmProgram::new(
        "T",
        vec![
            Op::yield_seconds(100),
            Op::load_const(reg::R0, 1),
            Op::save_store_entity(reg::SELF, PropertyId::PARAM0.0, reg::R0),
            Op::halt(),
        ],
    ));
    let mut processor = Processor::new(&SimConfig::default(), registry).unwrap();
    let mut master = MasterStore::new(8, 32);
    let subject = master.allocate(0);

    processor.submit_event(submit("T", subject, EntityId::INVALID, (0, 0, 0)));
    let diag = processor.tick(0, 0.6, &mut master);
    assert_eq!(diag.active, 1);
    assert_eq!(diag.completed, 0);

    let diag = processor.tick(1, 0.6, &mut master);
    assert_eq!(diag.active, 1, "0.4s remaining after the first decrement, still waiting");
    assert_eq!(diag.completed, 0);

    let diag = processor.tick(2, 0.6, &mut master);
    assert_eq!(diag.completed, 1);
    assert_eq!(master.get(subject, PropertyId::PARAM0.0), 1);
}

#[test]
fn scenario_5_collision_wait() {
    let registry = Arc::new(ProgramRegistry::new());
    registry.register(VmProgram::new(
        "T",
        vec![
            Op::wait_collision(reg::SELF),
            Op::load_const(reg::R0, 1),
            Op::save_store_entity(reg::HIT, PropertyId::PARAM0.0, reg::R0),
            Op::halt(),
        ],
    ));
    let mut processor = Processor::new(&SimConfig::default(), registry).unwrap();
    let mut master = MasterStore::new(8, 32);
    let subject = master.allocate(0);
    let hitter = master.allocate(0);

    processor.submit_event(submit("T", subject, EntityId::INVALID, (0, 0, 0)));
    let diag = processor.tick(0, 0.016, &mut master);
    assert_eq!(diag.active, 1, "runtime parked waiting on collision with its own subject");

    assert!(processor.notify_collision(subject, hitter));

    let diag = processor.tick(1, 0.016, &mut master);
    assert_eq!(diag.completed, 1);
    assert_eq!(master.get(hitter, PropertyId::PARAM0.0), 1);
}

#[test]
fn scenario_6_relevancy_churn() {
    let mut master = MasterStore::new(8, 32);
    let e = master.allocate(0);
    master.set(e, PropertyId::POS_X.0, 0, 0);
    master.set(e, PropertyId::POS_Y.0, 0, 0);

    let mut relevancy = RelevancyIndex::new(5_000, 1);
    let client_a = ClientId(1);
    let client_b = ClientId(2);
    relevancy.register_client(client_a);
    relevancy.register_client(client_b);
    relevancy.set_client_position(client_a, (0, 0, 0));
    relevancy.set_client_position(client_b, (50_000, 50_000, 0));
    relevancy.update(0.016);

    let mut dispatcher = Dispatcher::new();
    dispatcher.register_client(client_a);
    dispatcher.register_client(client_b);

    let events = vec![submit("Noop", e, EntityId::INVALID, (0, 0, 0))];
    let batches = dispatcher.dispatch(0, &events, &relevancy, &master);
    assert_eq!(batches[&client_a].snapshots.len(), 1, "A sees e for the first time");
    assert_eq!(batches[&client_a].events.len(), 1);
    assert!(batches[&client_b].is_empty(), "B is outside the interest radius");

    master.set(e, PropertyId::POS_X.0, 48_000, 1);
    master.set(e, PropertyId::POS_Y.0, 48_000, 1);
    relevancy.set_client_position(client_a, (0, 0, 0));
    relevancy.update(0.016);

    let events = vec![submit("Noop", e, EntityId::INVALID, (48_000, 48_000, 0))];
    let batches: std::collections::HashMap<ClientId, ClientBatch> = dispatcher.dispatch(1, &events, &relevancy, &master);
    assert_eq!(batches[&client_a].removed_entities, vec![e], "A loses e once it leaves radius");
    assert_eq!(batches[&client_b].snapshots.len(), 1, "B sees e for the first time now that it's nearby");
}
