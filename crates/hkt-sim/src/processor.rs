//! The VM Processor: the three-phase Build/Execute/Cleanup tick pipeline
//! over a pool of runtimes and per-VM stores (SPEC_FULL.md §4.4/§5).

use crate::config::{ConfigError, SimConfig};
use crate::dispatcher::IntentEvent;
use hkt_core::ids::{reg, EntityId, PropertyId};
use hkt_core::interpreter::{Directive, Interpreter};
use hkt_core::program::{ProgramRegistry, VmProgram};
use hkt_core::runtime::{VmRuntime, VmStatus};
use hkt_core::store::MasterStore;
use hkt_core::vmstore::VmStore;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, info_span, warn};

/// One live program invocation paired with its write-buffering overlay.
struct Instance {
    runtime: VmRuntime,
    store: VmStore,
}

/// Per-tick summary, mirroring the fields `tracing::debug!` logs at the
/// tick boundary (SPEC_FULL.md §10.1).
#[derive(Debug, Default)]
pub struct TickDiagnostics {
    pub frame: i64,
    pub active: usize,
    pub pending: usize,
    pub completed: usize,
    pub dropped_events: usize,
    pub directives: Vec<Directive>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("invalid processor configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Owns the runtime/store pools and drives `tick`. Single-threaded:
/// Build, Execute, and Cleanup run sequentially on whichever thread calls
/// `tick`. The only concurrent entry point is [`Processor::submit_event`],
/// which only ever contends on a short-held queue mutex.
pub struct Processor {
    registry: Arc<ProgramRegistry>,
    max_runtimes: usize,
    inbox: Mutex<VecDeque<IntentEvent>>,
    deferred: Vec<IntentEvent>,
    pending: Vec<(u32, Instance)>,
    active: HashMap<u32, Instance>,
    free_runtimes: Vec<VmRuntime>,
    free_stores: Vec<VmStore>,
    next_id: u32,
}

impl Processor {
    pub fn new(config: &SimConfig, registry: Arc<ProgramRegistry>) -> Result<Self, ProcessorError> {
        config.validate()?;
        Ok(Self {
            registry,
            max_runtimes: config.max_runtimes,
            inbox: Mutex::new(VecDeque::new()),
            deferred: Vec::new(),
            pending: Vec::new(),
            active: HashMap::new(),
            free_runtimes: Vec::new(),
            free_stores: Vec::new(),
            next_id: 0,
        })
    }

    /// Thread-safe submission; appends to the inbox under a short-held lock.
    pub fn submit_event(&self, event: IntentEvent) {
        self.inbox.lock().expect("processor inbox lock poisoned").push_back(event);
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Runs Build, Execute, then Cleanup for one frame against `master`.
    pub fn tick(&mut self, frame: i64, dt: f32, master: &mut MasterStore) -> TickDiagnostics {
        let _span = info_span!("tick", frame).entered();
        master.advance_frame(frame);

        let dropped_events = self.build(frame, master);
        let mut directives = Vec::new();
        self.execute(frame, dt, master, &mut directives);
        let completed = self.cleanup(master);

        let diag = TickDiagnostics {
            frame,
            active: self.active.len(),
            pending: self.pending.len(),
            completed,
            dropped_events,
            directives,
        };
        debug!(frame, active = diag.active, pending = diag.pending, completed = diag.completed, "tick boundary");
        diag
    }

    /// Resolves a matching `Collision` wait among active runtimes.
    pub fn notify_collision(&mut self, watched: EntityId, hit: EntityId) -> bool {
        self.active.values_mut().any(|inst| Interpreter::notify_collision(&mut inst.runtime, watched, hit))
    }

    pub fn notify_anim_end(&mut self, entity: EntityId) -> bool {
        self.active.values_mut().any(|inst| Interpreter::notify_anim_end(&mut inst.runtime, entity))
    }

    pub fn notify_move_end(&mut self, entity: EntityId) -> bool {
        self.active.values_mut().any(|inst| Interpreter::notify_move_end(&mut inst.runtime, entity))
    }

    fn build(&mut self, frame: i64, master: &MasterStore) -> usize {
        let fresh: VecDeque<IntentEvent> = {
            let mut guard = self.inbox.lock().expect("processor inbox lock poisoned");
            std::mem::take(&mut *guard)
        };
        let retrying: Vec<IntentEvent> = std::mem::take(&mut self.deferred);

        let mut dropped = 0usize;
        for event in retrying {
            self.try_start(event, frame, master, &mut dropped, false);
        }
        for event in fresh {
            self.try_start(event, frame, master, &mut dropped, true);
        }
        dropped
    }

    /// Attempts to start one runtime for `event`. `allow_defer` is false
    /// when this is already a retry of a previously-deferred event, so a
    /// second frame-validation failure drops it instead of deferring again.
    fn try_start(&mut self, event: IntentEvent, frame: i64, master: &MasterStore, dropped: &mut usize, allow_defer: bool) {
        if self.active.len() + self.pending.len() >= self.max_runtimes {
            warn!(tag = %event.tag, max_runtimes = self.max_runtimes, "runtime pool exhausted, dropping event");
            *dropped += 1;
            return;
        }

        let Some(program) = self.registry.find(&event.tag) else {
            warn!(tag = %event.tag, "no program registered for event tag, dropping event");
            *dropped += 1;
            return;
        };

        if event.subject.is_valid_id() && !master.validate_frame(event.subject, frame) {
            if allow_defer {
                warn!(tag = %event.tag, subject = ?event.subject, "event subject not yet valid, deferring one tick");
                self.deferred.push(event);
            } else {
                warn!(tag = %event.tag, subject = ?event.subject, "event subject still invalid after deferral, dropping");
                *dropped += 1;
            }
            return;
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let mut runtime = self.take_runtime(program, frame, event.event_id);
        runtime.set_reg_entity(reg::SELF, event.subject);
        runtime.set_reg_entity(reg::TARGET, event.target);
        runtime.set_reg_entity(reg::SPAWNED, EntityId::INVALID);

        let mut store = self.take_store();
        store.subject = event.subject;
        store.target = event.target;
        if event.subject.is_valid_id() {
            store.write_entity(event.subject, PropertyId::MOVE_TARGET_X, event.location.0);
            store.write_entity(event.subject, PropertyId::MOVE_TARGET_Y, event.location.1);
            store.write_entity(event.subject, PropertyId::MOVE_TARGET_Z, event.location.2);
            for (slot, chunk) in event.payload.chunks(4).take(8).enumerate() {
                let mut bytes = [0u8; 4];
                bytes[..chunk.len()].copy_from_slice(chunk);
                let value = i32::from_le_bytes(bytes);
                store.write_entity(event.subject, PropertyId(PropertyId::PARAM0.0 + slot as u16), value);
            }
        }

        self.pending.push((id, Instance { runtime, store }));
    }

    fn execute(&mut self, frame: i64, dt: f32, master: &mut MasterStore, directives: &mut Vec<Directive>) {
        for (id, instance) in self.pending.drain(..) {
            self.active.insert(id, instance);
        }

        for instance in self.active.values_mut() {
            Interpreter::tick_timer(&mut instance.runtime, dt);
            if instance.runtime.status != VmStatus::Running && instance.runtime.status != VmStatus::Ready {
                if instance.runtime.status == VmStatus::Yielded {
                    if instance.runtime.yield_frames > 0 {
                        instance.runtime.yield_frames -= 1;
                    }
                    if instance.runtime.yield_frames > 0 {
                        continue;
                    }
                    instance.runtime.status = VmStatus::Ready;
                } else {
                    continue;
                }
            }

            let status = Interpreter::execute(&mut instance.runtime, &mut instance.store, master, frame, directives);
            if status == VmStatus::Failed {
                debug!(
                    tag = %instance.runtime.program.tag,
                    pc = instance.runtime.pc,
                    "vm runtime failed"
                );
            }
        }
    }

    fn cleanup(&mut self, master: &mut MasterStore) -> usize {
        let terminal_ids: Vec<u32> =
            self.active.iter().filter(|(_, inst)| inst.runtime.status.is_terminal()).map(|(id, _)| *id).collect();

        let completed = terminal_ids.len();
        for id in terminal_ids {
            let Some(mut instance) = self.active.remove(&id) else { continue };
            if instance.runtime.status == VmStatus::Completed {
                master.apply_writes(instance.store.pending_writes());
            }
            instance.store.reset();
            self.free_stores.push(instance.store);
            self.free_runtimes.push(instance.runtime);
        }
        completed
    }

    fn take_runtime(&mut self, program: Arc<VmProgram>, frame: i64, event_id: u32) -> VmRuntime {
        match self.free_runtimes.pop() {
            Some(mut rt) => {
                rt.program = program;
                rt.pc = 0;
                rt.registers = [0; reg::NUM_REGISTERS];
                rt.status = VmStatus::Ready;
                rt.event_wait.reset();
                rt.creation_frame = frame;
                rt.yield_frames = 0;
                rt.spatial_query.reset(Vec::new());
                #[cfg(debug_assertions)]
                {
                    rt.source_event_id = event_id;
                }
                rt
            }
            None => {
                let mut rt = VmRuntime::new(program, frame);
                #[cfg(debug_assertions)]
                {
                    rt.source_event_id = event_id;
                }
                rt
            }
        }
    }

    fn take_store(&mut self) -> VmStore {
        self.free_stores.pop().unwrap_or_default()
    }
}
