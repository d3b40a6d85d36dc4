//! Opcode dispatch over a [`VmRuntime`] (SPEC_FULL.md §4.5).

use crate::ids::{entity_type, reg, EntityId, PropertyId};
use crate::instruction::OpCode;
use crate::runtime::{EventWaitState, VmRuntime, VmStatus, WaitEventKind};
use crate::store::MasterStore;
use crate::vmstore::VmStore;
use tracing::{debug, warn};

/// Ceiling on instructions dispatched within a single `execute` call, so one
/// runaway program cannot starve the rest of a tick.
pub const MAX_INSTR_PER_TICK: u32 = 10_000;

/// A side effect emitted during interpretation, destined for the engine's
/// animation/VFX/audio/equipment layer. The core only produces these; it
/// never consumes them.
#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    PlayAnim { entity: EntityId, name: String },
    PlayAnimMontage { entity: EntityId, name: String },
    StopAnim { entity: EntityId },
    PlayVfx { position: (i32, i32, i32), name: String },
    PlayVfxAttached { entity: EntityId, name: String },
    PlaySound { name: String },
    PlaySoundAtLocation { position: (i32, i32, i32), name: String },
    ApplyEffect { target: EntityId, name: String },
    RemoveEffect { target: EntityId, name: String },
    Log { message: String },
}

/// Stateless opcode dispatcher. All mutable state lives in the runtime, the
/// per-VM store, and the backing entity store passed into `execute`.
pub struct Interpreter;

impl Interpreter {
    /// Decrements a `Timer` wait by `dt`; clears it and returns the runtime
    /// to `Ready` once it reaches zero. Call before `execute` each tick.
    pub fn tick_timer(runtime: &mut VmRuntime, dt: f32) {
        if runtime.status != VmStatus::WaitingEvent || runtime.event_wait.kind != WaitEventKind::Timer {
            return;
        }
        runtime.event_wait.remaining_seconds -= dt;
        if runtime.event_wait.remaining_seconds <= 0.0 {
            runtime.event_wait.reset();
            runtime.status = VmStatus::Ready;
        }
    }

    /// Resolves a matching `Collision` wait, writing `hit` into the `Hit`
    /// register. Returns `true` if this runtime was the match.
    pub fn notify_collision(runtime: &mut VmRuntime, watched: EntityId, hit: EntityId) -> bool {
        if runtime.status == VmStatus::WaitingEvent
            && runtime.event_wait.kind == WaitEventKind::Collision
            && runtime.event_wait.watched_entity == watched
        {
            runtime.event_wait.reset();
            runtime.set_reg_entity(reg::HIT, hit);
            runtime.status = VmStatus::Ready;
            true
        } else {
            false
        }
    }

    /// Resolves a matching `AnimationEnd` wait.
    pub fn notify_anim_end(runtime: &mut VmRuntime, entity: EntityId) -> bool {
        Self::notify_simple(runtime, WaitEventKind::AnimationEnd, entity)
    }

    /// Resolves a matching `MovementEnd` wait.
    pub fn notify_move_end(runtime: &mut VmRuntime, entity: EntityId) -> bool {
        Self::notify_simple(runtime, WaitEventKind::MovementEnd, entity)
    }

    fn notify_simple(runtime: &mut VmRuntime, kind: WaitEventKind, entity: EntityId) -> bool {
        if runtime.status == VmStatus::WaitingEvent
            && runtime.event_wait.kind == kind
            && runtime.event_wait.watched_entity == entity
        {
            runtime.event_wait.reset();
            runtime.status = VmStatus::Ready;
            true
        } else {
            false
        }
    }

    /// Runs `runtime` forward until it yields, waits, completes, fails, or
    /// exhausts `MAX_INSTR_PER_TICK` dispatches, whichever comes first.
    /// Appends any directives produced to `directives`.
    pub fn execute(
        runtime: &mut VmRuntime,
        store: &mut VmStore,
        stash: &mut MasterStore,
        frame: i64,
        directives: &mut Vec<Directive>,
    ) -> VmStatus {
        if !runtime.program.is_valid() {
            runtime.status = VmStatus::Failed;
            warn!(tag = %runtime.program.tag, "program invalid, runtime failed");
            return runtime.status;
        }
        if runtime.status == VmStatus::WaitingEvent {
            return runtime.status;
        }

        runtime.status = VmStatus::Running;
        store.subject = runtime.get_reg_entity(reg::SELF);
        store.target = runtime.get_reg_entity(reg::TARGET);

        for _ in 0..MAX_INSTR_PER_TICK {
            if runtime.pc >= runtime.program.code.len() {
                runtime.status = VmStatus::Completed;
                break;
            }
            let word = runtime.program.code[runtime.pc];
            runtime.pc += 1;

            let Some(op) = word.opcode() else {
                warn!(tag = %runtime.program.tag, pc = runtime.pc - 1, "unknown opcode, runtime failed");
                runtime.status = VmStatus::Failed;
                break;
            };

            match op {
                OpCode::Nop => {}
                OpCode::Halt => {
                    runtime.status = VmStatus::Completed;
                }
                OpCode::Yield => {
                    runtime.yield_frames = (word.imm12() as u32).max(1);
                    runtime.status = VmStatus::Yielded;
                }
                OpCode::YieldSeconds => {
                    let centiseconds = word.signed_imm20();
                    runtime.event_wait = EventWaitState {
                        kind: WaitEventKind::Timer,
                        watched_entity: EntityId::INVALID,
                        remaining_seconds: (centiseconds.max(0) as f32) / 100.0,
                    };
                    runtime.status = VmStatus::WaitingEvent;
                }
                OpCode::Jump => {
                    runtime.pc = word.imm20() as usize;
                }
                OpCode::JumpIf => {
                    if runtime.get_reg(word.src1()) != 0 {
                        runtime.pc = word.imm12() as usize;
                    }
                }
                OpCode::JumpIfNot => {
                    if runtime.get_reg(word.src1()) == 0 {
                        runtime.pc = word.imm12() as usize;
                    }
                }

                OpCode::WaitCollision => {
                    let watched = runtime.get_reg_entity(word.src1());
                    runtime.event_wait = EventWaitState { kind: WaitEventKind::Collision, watched_entity: watched, remaining_seconds: 0.0 };
                    runtime.status = VmStatus::WaitingEvent;
                }
                OpCode::WaitAnimEnd => {
                    let entity = runtime.get_reg_entity(word.src1());
                    runtime.event_wait = EventWaitState { kind: WaitEventKind::AnimationEnd, watched_entity: entity, remaining_seconds: 0.0 };
                    runtime.status = VmStatus::WaitingEvent;
                }
                OpCode::WaitMoveEnd => {
                    let entity = runtime.get_reg_entity(word.src1());
                    runtime.event_wait = EventWaitState { kind: WaitEventKind::MovementEnd, watched_entity: entity, remaining_seconds: 0.0 };
                    runtime.status = VmStatus::WaitingEvent;
                }

                OpCode::LoadConst => {
                    runtime.set_reg(word.dst(), word.signed_imm20());
                }
                OpCode::LoadConstHigh => {
                    let dst = word.dst();
                    let low = runtime.get_reg(dst) & 0xF_FFFF;
                    let high = (word.imm12() as i32) << 20;
                    runtime.set_reg(dst, high | low);
                }
                OpCode::LoadStore => {
                    let property: PropertyId = word.imm12().into();
                    let v = store.read(stash, property);
                    runtime.set_reg(word.dst(), v);
                }
                OpCode::LoadStoreEntity => {
                    let entity = runtime.get_reg_entity(word.src1());
                    let property: PropertyId = word.imm12().into();
                    let v = stash.get(entity, property.0);
                    runtime.set_reg(word.dst(), v);
                }
                OpCode::SaveStore => {
                    let property: PropertyId = word.imm12().into();
                    let v = runtime.get_reg(word.src1());
                    store.write(property, v);
                }
                OpCode::SaveStoreEntity => {
                    let entity = runtime.get_reg_entity(word.src1());
                    let property: PropertyId = word.imm12().into();
                    let v = runtime.get_reg(word.src2());
                    store.write_entity(entity, property, v);
                }
                OpCode::Move => {
                    let v = runtime.get_reg(word.src1());
                    runtime.set_reg(word.dst(), v);
                }

                OpCode::Add => {
                    let v = runtime.get_reg(word.src1()).wrapping_add(runtime.get_reg(word.src2()));
                    runtime.set_reg(word.dst(), v);
                }
                OpCode::Sub => {
                    let v = runtime.get_reg(word.src1()).wrapping_sub(runtime.get_reg(word.src2()));
                    runtime.set_reg(word.dst(), v);
                }
                OpCode::Mul => {
                    let v = runtime.get_reg(word.src1()).wrapping_mul(runtime.get_reg(word.src2()));
                    runtime.set_reg(word.dst(), v);
                }
                OpCode::Div => {
                    let b = runtime.get_reg(word.src2());
                    let v = if b == 0 { 0 } else { runtime.get_reg(word.src1()).wrapping_div(b) };
                    runtime.set_reg(word.dst(), v);
                }
                OpCode::Mod => {
                    let b = runtime.get_reg(word.src2());
                    let v = if b == 0 { 0 } else { runtime.get_reg(word.src1()).wrapping_rem(b) };
                    runtime.set_reg(word.dst(), v);
                }
                OpCode::AddImm => {
                    let v = runtime.get_reg(word.src1()).wrapping_add(word.signed_imm12());
                    runtime.set_reg(word.dst(), v);
                }

                OpCode::CmpEq => cmp(runtime, word, |a, b| a == b),
                OpCode::CmpNe => cmp(runtime, word, |a, b| a != b),
                OpCode::CmpLt => cmp(runtime, word, |a, b| a < b),
                OpCode::CmpLe => cmp(runtime, word, |a, b| a <= b),
                OpCode::CmpGt => cmp(runtime, word, |a, b| a > b),
                OpCode::CmpGe => cmp(runtime, word, |a, b| a >= b),

                OpCode::SpawnEntity => {
                    let new_entity = stash.allocate(frame);
                    runtime.set_reg_entity(reg::SPAWNED, new_entity);
                    if new_entity.is_valid_id() {
                        let subject = store.subject;
                        store.write_entity(new_entity, PropertyId::OWNER, subject.0 as i32);
                        store.write_entity(new_entity, PropertyId::ENTITY_TYPE, entity_type::PROJECTILE);
                    }
                }
                OpCode::DestroyEntity => {
                    let entity = runtime.get_reg_entity(word.src1());
                    stash.free(entity);
                }

                OpCode::GetPosition => {
                    let entity = runtime.get_reg_entity(word.src1());
                    let x = store.read_entity(stash, entity, PropertyId::POS_X);
                    let y = store.read_entity(stash, entity, PropertyId::POS_Y);
                    let z = store.read_entity(stash, entity, PropertyId::POS_Z);
                    let base = word.dst();
                    runtime.set_reg(base, x);
                    runtime.set_reg(base + 1, y);
                    runtime.set_reg(base + 2, z);
                }
                OpCode::SetPosition => {
                    let entity = runtime.get_reg_entity(word.dst());
                    let base = word.src1();
                    let x = runtime.get_reg(base);
                    let y = runtime.get_reg(base + 1);
                    let z = runtime.get_reg(base + 2);
                    store.write_entity(entity, PropertyId::POS_X, x);
                    store.write_entity(entity, PropertyId::POS_Y, y);
                    store.write_entity(entity, PropertyId::POS_Z, z);
                }
                OpCode::GetDistance => {
                    let e1 = runtime.get_reg_entity(word.src1());
                    let e2 = runtime.get_reg_entity(word.src2());
                    let dx = (store.read_entity(stash, e1, PropertyId::POS_X) - store.read_entity(stash, e2, PropertyId::POS_X)) as i64;
                    let dy = (store.read_entity(stash, e1, PropertyId::POS_Y) - store.read_entity(stash, e2, PropertyId::POS_Y)) as i64;
                    let dz = (store.read_entity(stash, e1, PropertyId::POS_Z) - store.read_entity(stash, e2, PropertyId::POS_Z)) as i64;
                    let sum = dx * dx + dy * dy + dz * dz;
                    let clamped = sum.min(i32::MAX as i64);
                    let dist = (clamped as f64).sqrt() as i32;
                    runtime.set_reg(word.dst(), dist);
                }
                OpCode::MoveToward => {
                    let entity = runtime.get_reg_entity(word.dst());
                    let base = word.src1();
                    let x = runtime.get_reg(base);
                    let y = runtime.get_reg(base + 1);
                    let z = runtime.get_reg(base + 2);
                    store.write_entity(entity, PropertyId::MOVE_TARGET_X, x);
                    store.write_entity(entity, PropertyId::MOVE_TARGET_Y, y);
                    store.write_entity(entity, PropertyId::MOVE_TARGET_Z, z);
                    store.write_entity(entity, PropertyId::MOVE_SPEED, word.imm12() as i32);
                    store.write_entity(entity, PropertyId::IS_MOVING, 1);
                }
                OpCode::MoveForward => {
                    let entity = runtime.get_reg_entity(word.src1());
                    store.write_entity(entity, PropertyId::MOVE_SPEED, word.imm12() as i32);
                    store.write_entity(entity, PropertyId::IS_MOVING, 1);
                }
                OpCode::StopMovement => {
                    let entity = runtime.get_reg_entity(word.src1());
                    store.write_entity(entity, PropertyId::IS_MOVING, 0);
                }

                OpCode::FindInRadius => {
                    let centre = runtime.get_reg_entity(word.src1());
                    let radius_cm = word.imm12() as i64;
                    if stash.get(centre, PropertyId::TEAM.0) == 0 {
                        debug!(entity = ?centre, "FindInRadius centre has unset team, same-team filter suppresses nothing");
                    }
                    let mut found = Vec::new();
                    stash.for_each_in_radius(centre, radius_cm, |e| found.push(e));
                    runtime.set_reg(reg::COUNT, found.len() as i32);
                    runtime.spatial_query.reset(found);
                }
                OpCode::NextFound => match runtime.spatial_query.next() {
                    Some(e) => {
                        runtime.set_reg_entity(reg::ITER, e);
                        runtime.set_reg(reg::FLAG, 1);
                    }
                    None => {
                        runtime.set_reg_entity(reg::ITER, EntityId::INVALID);
                        runtime.set_reg(reg::FLAG, 0);
                    }
                },

                OpCode::ApplyDamage => {
                    let target = runtime.get_reg_entity(word.src1());
                    let amount = runtime.get_reg(word.src2());
                    let health = store.read_entity(stash, target, PropertyId::HEALTH);
                    let defense = store.read_entity(stash, target, PropertyId::DEFENSE);
                    let actual = (amount - defense).max(1);
                    let new_health = (health - actual).max(0);
                    store.write_entity(target, PropertyId::HEALTH, new_health);
                }
                OpCode::ApplyEffect => {
                    let target = runtime.get_reg_entity(word.src1());
                    let name = runtime.program.string_at(word.imm12() as i32).unwrap_or_default().to_string();
                    directives.push(Directive::ApplyEffect { target, name });
                }
                OpCode::RemoveEffect => {
                    let target = runtime.get_reg_entity(word.src1());
                    let name = runtime.program.string_at(word.imm12() as i32).unwrap_or_default().to_string();
                    directives.push(Directive::RemoveEffect { target, name });
                }

                OpCode::PlayAnim => {
                    let entity = runtime.get_reg_entity(word.src1());
                    let name = runtime.program.string_at(word.imm12() as i32).unwrap_or_default().to_string();
                    directives.push(Directive::PlayAnim { entity, name });
                }
                OpCode::PlayAnimMontage => {
                    let entity = runtime.get_reg_entity(word.src1());
                    let name = runtime.program.string_at(word.imm12() as i32).unwrap_or_default().to_string();
                    directives.push(Directive::PlayAnimMontage { entity, name });
                }
                OpCode::StopAnim => {
                    let entity = runtime.get_reg_entity(word.src1());
                    directives.push(Directive::StopAnim { entity });
                }
                OpCode::PlayVFX => {
                    let base = word.src1();
                    let position = (runtime.get_reg(base), runtime.get_reg(base + 1), runtime.get_reg(base + 2));
                    let name = runtime.program.string_at(word.imm12() as i32).unwrap_or_default().to_string();
                    directives.push(Directive::PlayVfx { position, name });
                }
                OpCode::PlayVFXAttached => {
                    let entity = runtime.get_reg_entity(word.src1());
                    let name = runtime.program.string_at(word.imm12() as i32).unwrap_or_default().to_string();
                    directives.push(Directive::PlayVfxAttached { entity, name });
                }

                OpCode::PlaySound => {
                    let name = runtime.program.string_at(word.signed_imm20()).unwrap_or_default().to_string();
                    directives.push(Directive::PlaySound { name });
                }
                OpCode::PlaySoundAtLocation => {
                    let base = word.src1();
                    let position = (runtime.get_reg(base), runtime.get_reg(base + 1), runtime.get_reg(base + 2));
                    let name = runtime.program.string_at(word.imm12() as i32).unwrap_or_default().to_string();
                    directives.push(Directive::PlaySoundAtLocation { position, name });
                }

                OpCode::SpawnEquipment => {
                    // src2 carries a literal equipment-slot number, not a register.
                    let owner = runtime.get_reg_entity(word.src1());
                    let name = runtime.program.string_at(word.imm12() as i32).unwrap_or_default().to_string();
                    let new_entity = stash.allocate(frame);
                    if new_entity.is_valid_id() {
                        store.write_entity(new_entity, PropertyId::OWNER, owner.0 as i32);
                        store.write_entity(new_entity, PropertyId::ENTITY_TYPE, entity_type::EQUIPMENT);
                    }
                    directives.push(Directive::PlayVfxAttached { entity: new_entity, name });
                }

                OpCode::Log => {
                    let message = runtime.program.string_at(word.signed_imm20()).unwrap_or_default().to_string();
                    directives.push(Directive::Log { message: message.clone() });
                    debug!(tag = %runtime.program.tag, message = %message, "vm log");
                }
            }

            if runtime.status != VmStatus::Running {
                break;
            }
        }

        if runtime.status == VmStatus::Running {
            runtime.status = VmStatus::Yielded;
            runtime.yield_frames = 1;
        }
        runtime.status
    }
}

fn cmp(runtime: &mut VmRuntime, word: crate::instruction::Instruction, f: impl Fn(i32, i32) -> bool) {
    let a = runtime.get_reg(word.src1());
    let b = runtime.get_reg(word.src2());
    runtime.set_reg(word.dst(), if f(a, b) { 1 } else { 0 });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Op;
    use crate::program::VmProgram;
    use std::sync::Arc;

    fn exec(code: Vec<crate::instruction::Instruction>, strings: Vec<String>) -> (VmRuntime, Vec<Directive>, MasterStore) {
        let program = Arc::new(VmProgram::new("Test", code).with_strings(strings));
        let mut runtime = VmRuntime::new(program, 0);
        let mut store = VmStore::new();
        let mut stash = MasterStore::new(16, 32);
        let mut directives = Vec::new();
        Interpreter::execute(&mut runtime, &mut store, &mut stash, 0, &mut directives);
        (runtime, directives, stash)
    }

    #[test]
    fn load_const_high_builds_a_full_32_bit_value_with_load_const() {
        // LoadConst fills the low 20 bits, LoadConstHigh replaces the high
        // 12 bits without disturbing them -- together they can build any
        // i32 constant.
        let (runtime, _, _) = exec(
            vec![Op::load_const(reg::R0, 0xA_BCDE), Op::load_const_high(reg::R0, 0x123), Op::halt()],
            vec![],
        );
        assert_eq!(runtime.get_reg(reg::R0), 0x123A_BCDEu32 as i32);
    }

    #[test]
    fn halt_completes_immediately() {
        let (runtime, _, _) = exec(vec![Op::halt()], vec![]);
        assert_eq!(runtime.status, VmStatus::Completed);
    }

    #[test]
    fn yield_suspends_for_at_least_one_frame() {
        let (runtime, _, _) = exec(vec![Op::yield_frames(0), Op::halt()], vec![]);
        assert_eq!(runtime.status, VmStatus::Yielded);
        assert_eq!(runtime.yield_frames, 1);
        assert_eq!(runtime.pc, 1, "pc should sit on the not-yet-executed Halt");
    }

    #[test]
    fn division_by_zero_yields_zero_not_a_fault() {
        let (runtime, _, _) = exec(
            vec![Op::load_const(reg::R0, 10), Op::load_const(reg::R1, 0), Op::div(reg::R2, reg::R0, reg::R1), Op::halt()],
            vec![],
        );
        assert_eq!(runtime.get_reg(reg::R2), 0);
        assert_eq!(runtime.status, VmStatus::Completed);
    }

    #[test]
    fn unknown_opcode_fails_runtime() {
        let (runtime, _, _) = exec(vec![crate::instruction::Instruction(0xFF)], vec![]);
        assert_eq!(runtime.status, VmStatus::Failed);
    }

    #[test]
    fn spawn_entity_sets_owner_and_projectile_type() {
        let program = Arc::new(VmProgram::new("Test", vec![Op::spawn_entity(0), Op::halt()]));
        let mut runtime = VmRuntime::new(program, 0);
        runtime.set_reg_entity(reg::SELF, EntityId(0));
        let mut store = VmStore::new();
        let mut stash = MasterStore::new(16, 32);
        let subject = stash.allocate(0);
        assert_eq!(subject, EntityId(0));
        let mut directives = Vec::new();
        Interpreter::execute(&mut runtime, &mut store, &mut stash, 0, &mut directives);

        let spawned = runtime.get_reg_entity(reg::SPAWNED);
        assert!(spawned.is_valid_id());
        for w in store.pending_writes() {
            stash.set(w.entity, w.property, w.value, 0);
        }
        assert_eq!(stash.get(spawned, PropertyId::OWNER.0), 0);
        assert_eq!(stash.get(spawned, PropertyId::ENTITY_TYPE.0), entity_type::PROJECTILE);
    }

    #[test]
    fn apply_damage_floors_actual_damage_at_one() {
        let mut stash = MasterStore::new(16, 32);
        let target = stash.allocate(0);
        stash.set(target, PropertyId::HEALTH.0, 10, 0);
        stash.set(target, PropertyId::DEFENSE.0, 999, 0);

        let program = Arc::new(VmProgram::new("Test", vec![Op::apply_damage(reg::R0, reg::R1), Op::halt()]));
        let mut runtime = VmRuntime::new(program, 0);
        runtime.set_reg_entity(reg::R0, target);
        runtime.set_reg(reg::R1, 5);
        let mut store = VmStore::new();
        let mut directives = Vec::new();
        Interpreter::execute(&mut runtime, &mut store, &mut stash, 0, &mut directives);

        let write = store.pending_writes().iter().find(|w| w.property == PropertyId::HEALTH.0).expect("health write");
        assert_eq!(write.value, 9, "actual damage floors at 1, so health drops by exactly 1");
    }

    #[test]
    fn find_in_radius_then_next_found_walks_results_in_order() {
        let mut stash = MasterStore::new(16, 32);
        let centre = stash.allocate(0);
        stash.set(centre, PropertyId::TEAM.0, 1, 0);
        let enemy = stash.allocate(0);
        stash.set(enemy, PropertyId::TEAM.0, 2, 0);

        let program = Arc::new(VmProgram::new(
            "Test",
            vec![Op::find_in_radius(reg::R0, 1000), Op::next_found(), Op::next_found(), Op::halt()],
        ));
        let mut runtime = VmRuntime::new(program, 0);
        runtime.set_reg_entity(reg::R0, centre);
        let mut store = VmStore::new();
        let mut directives = Vec::new();
        Interpreter::execute(&mut runtime, &mut store, &mut stash, 0, &mut directives);

        assert_eq!(runtime.get_reg(reg::COUNT), 1);
        // first NextFound ran mid-loop; after the second, the cursor is exhausted.
        assert_eq!(runtime.get_reg_entity(reg::ITER), EntityId::INVALID);
        assert_eq!(runtime.get_reg(reg::FLAG), 0);
        let _ = enemy;
    }
}
