//! Execution state for one VM coroutine (SPEC_FULL.md §3/§4.4/§4.5).

use crate::ids::{reg, EntityId};
use crate::program::VmProgram;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmStatus {
    Ready,
    Running,
    Yielded,
    WaitingEvent,
    Completed,
    Failed,
}

impl VmStatus {
    pub fn is_runnable(self) -> bool {
        matches!(self, VmStatus::Ready | VmStatus::Running)
    }

    pub fn is_waiting_event(self) -> bool {
        matches!(self, VmStatus::WaitingEvent)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, VmStatus::Completed | VmStatus::Failed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitEventKind {
    None,
    Collision,
    AnimationEnd,
    MovementEnd,
    Timer,
}

/// What a runtime in `WaitingEvent` status is waiting for.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EventWaitState {
    pub kind: WaitEventKind,
    pub watched_entity: EntityId,
    pub remaining_seconds: f32,
}

impl Default for EventWaitState {
    fn default() -> Self {
        Self { kind: WaitEventKind::None, watched_entity: EntityId::INVALID, remaining_seconds: 0.0 }
    }
}

impl EventWaitState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The cursor over the results of a `FindInRadius` call, consumed one
/// entity at a time by `NextFound`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpatialQueryCursor {
    pub entities: Vec<EntityId>,
    pub index: usize,
}

impl SpatialQueryCursor {
    pub fn reset(&mut self, entities: Vec<EntityId>) {
        self.entities = entities;
        self.index = 0;
    }

    pub fn has_next(&self) -> bool {
        self.index < self.entities.len()
    }

    /// Advances the cursor, returning the next entity or `None` on
    /// exhaustion.
    pub fn next(&mut self) -> Option<EntityId> {
        if self.has_next() {
            let e = self.entities[self.index];
            self.index += 1;
            Some(e)
        } else {
            None
        }
    }
}

/// Execution state for one live program invocation.
pub struct VmRuntime {
    pub program: Arc<VmProgram>,
    pub pc: usize,
    pub registers: [i32; reg::NUM_REGISTERS],
    pub status: VmStatus,
    pub event_wait: EventWaitState,
    pub creation_frame: i64,
    pub yield_frames: u32,
    pub spatial_query: SpatialQueryCursor,
    #[cfg(debug_assertions)]
    pub source_event_id: u32,
}

impl VmRuntime {
    pub fn new(program: Arc<VmProgram>, creation_frame: i64) -> Self {
        Self {
            program,
            pc: 0,
            registers: [0; reg::NUM_REGISTERS],
            status: VmStatus::Ready,
            event_wait: EventWaitState::default(),
            creation_frame,
            yield_frames: 0,
            spatial_query: SpatialQueryCursor::default(),
            #[cfg(debug_assertions)]
            source_event_id: 0,
        }
    }

    pub fn get_reg(&self, index: u8) -> i32 {
        self.registers.get(index as usize).copied().unwrap_or(0)
    }

    pub fn set_reg(&mut self, index: u8, value: i32) {
        if let Some(slot) = self.registers.get_mut(index as usize) {
            *slot = value;
        }
    }

    pub fn get_reg_entity(&self, index: u8) -> EntityId {
        let raw = self.get_reg(index);
        if raw < 0 {
            EntityId::INVALID
        } else {
            EntityId(raw as u32)
        }
    }

    pub fn set_reg_entity(&mut self, index: u8, entity: EntityId) {
        self.set_reg(index, entity.0 as i32);
    }
}

impl fmt::Display for VmRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[VM] tag={} pc={} status={:?} self={:?} target={:?} spawned={:?}",
            self.program.tag,
            self.pc,
            self.status,
            self.get_reg_entity(reg::SELF),
            self.get_reg_entity(reg::TARGET),
            self.get_reg_entity(reg::SPAWNED),
        )
    }
}
