//! The packed 32-bit instruction word and its opcode catalogue.
//!
//! Every instruction is a single `u32`. Bits 0..7 hold the opcode; the
//! remaining 24 bits are sliced into `dst`/`src1`/`src2`/`imm12` or a wider
//! `imm20`, depending on which fields a given opcode actually consumes (see
//! the field table in each `Op::*` constructor below). The layout is a
//! fixed physical bit assignment, not a tagged union -- an opcode simply
//! reads the accessors it needs and ignores the rest.

use serde::{Deserialize, Serialize};

/// The closed set of opcodes the interpreter understands. Discriminants
/// are explicit because they are also the on-the-wire byte value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpCode {
    Nop = 0,
    Halt = 1,
    Yield = 2,
    YieldSeconds = 3,
    Jump = 4,
    JumpIf = 5,
    JumpIfNot = 6,

    WaitCollision = 10,
    WaitAnimEnd = 11,
    WaitMoveEnd = 12,

    LoadConst = 20,
    LoadConstHigh = 21,
    LoadStore = 22,
    LoadStoreEntity = 23,
    SaveStore = 24,
    SaveStoreEntity = 25,
    Move = 26,

    Add = 30,
    Sub = 31,
    Mul = 32,
    Div = 33,
    Mod = 34,
    AddImm = 35,

    CmpEq = 40,
    CmpNe = 41,
    CmpLt = 42,
    CmpLe = 43,
    CmpGt = 44,
    CmpGe = 45,

    SpawnEntity = 50,
    DestroyEntity = 51,

    GetPosition = 60,
    SetPosition = 61,
    GetDistance = 62,
    MoveToward = 63,
    MoveForward = 64,
    StopMovement = 65,

    FindInRadius = 70,
    NextFound = 71,

    ApplyDamage = 80,
    ApplyEffect = 81,
    RemoveEffect = 82,

    PlayAnim = 90,
    PlayAnimMontage = 91,
    StopAnim = 92,
    PlayVFX = 93,
    PlayVFXAttached = 94,

    PlaySound = 100,
    PlaySoundAtLocation = 101,

    SpawnEquipment = 110,

    Log = 120,
}

impl OpCode {
    /// Decode a raw opcode byte, or `None` for an unassigned value.
    pub fn from_byte(b: u8) -> Option<OpCode> {
        use OpCode::*;
        Some(match b {
            0 => Nop,
            1 => Halt,
            2 => Yield,
            3 => YieldSeconds,
            4 => Jump,
            5 => JumpIf,
            6 => JumpIfNot,
            10 => WaitCollision,
            11 => WaitAnimEnd,
            12 => WaitMoveEnd,
            20 => LoadConst,
            21 => LoadConstHigh,
            22 => LoadStore,
            23 => LoadStoreEntity,
            24 => SaveStore,
            25 => SaveStoreEntity,
            26 => Move,
            30 => Add,
            31 => Sub,
            32 => Mul,
            33 => Div,
            34 => Mod,
            35 => AddImm,
            40 => CmpEq,
            41 => CmpNe,
            42 => CmpLt,
            43 => CmpLe,
            44 => CmpGt,
            45 => CmpGe,
            50 => SpawnEntity,
            51 => DestroyEntity,
            60 => GetPosition,
            61 => SetPosition,
            62 => GetDistance,
            63 => MoveToward,
            64 => MoveForward,
            65 => StopMovement,
            70 => FindInRadius,
            71 => NextFound,
            80 => ApplyDamage,
            81 => ApplyEffect,
            82 => RemoveEffect,
            90 => PlayAnim,
            91 => PlayAnimMontage,
            92 => StopAnim,
            93 => PlayVFX,
            94 => PlayVFXAttached,
            100 => PlaySound,
            101 => PlaySoundAtLocation,
            110 => SpawnEquipment,
            120 => Log,
            _ => return None,
        })
    }
}

/// A single packed 32-bit instruction word.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction(pub u32);

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

impl Instruction {
    pub fn raw_opcode(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    pub fn opcode(self) -> Option<OpCode> {
        OpCode::from_byte(self.raw_opcode())
    }

    pub fn dst(self) -> u8 {
        ((self.0 >> 8) & 0xF) as u8
    }

    pub fn src1(self) -> u8 {
        ((self.0 >> 12) & 0xF) as u8
    }

    pub fn src2(self) -> u8 {
        ((self.0 >> 16) & 0xF) as u8
    }

    pub fn imm12(self) -> u16 {
        ((self.0 >> 20) & 0xFFF) as u16
    }

    pub fn signed_imm12(self) -> i32 {
        sign_extend(self.imm12() as u32, 12)
    }

    pub fn imm20(self) -> u32 {
        (self.0 >> 12) & 0xF_FFFF
    }

    pub fn signed_imm20(self) -> i32 {
        sign_extend(self.imm20(), 20)
    }

    fn pack(opcode: OpCode, dst: u8, src1: u8, src2: u8, imm12: u16) -> Self {
        let word = (opcode as u32 & 0xFF)
            | ((dst as u32 & 0xF) << 8)
            | ((src1 as u32 & 0xF) << 12)
            | ((src2 as u32 & 0xF) << 16)
            | ((imm12 as u32 & 0xFFF) << 20);
        Instruction(word)
    }

    fn pack_imm20(opcode: OpCode, dst: u8, imm20: i32) -> Self {
        let word = (opcode as u32 & 0xFF) | ((dst as u32 & 0xF) << 8) | ((imm20 as u32 & 0xF_FFFF) << 12);
        Instruction(word)
    }
}

/// Ergonomic constructors, one per opcode, for program authors (the flow
/// library under `demos/` and the test fixtures) instead of hand-packing
/// bits. These mirror the field usage of the reference interpreter
/// exactly -- notably `SetPosition`'s `dst` field carries the *entity*
/// register and `src1` carries the source-base register, not the other
/// way around, and `SpawnEquipment`'s `src2` field is a literal slot
/// number rather than a register to read.
pub struct Op;

impl Op {
    pub fn nop() -> Instruction {
        Instruction::pack(OpCode::Nop, 0, 0, 0, 0)
    }
    pub fn halt() -> Instruction {
        Instruction::pack(OpCode::Halt, 0, 0, 0, 0)
    }
    pub fn yield_frames(frames: u16) -> Instruction {
        Instruction::pack(OpCode::Yield, 0, 0, 0, frames)
    }
    pub fn yield_seconds(centiseconds: i32) -> Instruction {
        Instruction::pack_imm20(OpCode::YieldSeconds, 0, centiseconds)
    }
    pub fn jump(target: u32) -> Instruction {
        Instruction::pack_imm20(OpCode::Jump, 0, target as i32)
    }
    pub fn jump_if(cond: u8, target: u16) -> Instruction {
        Instruction::pack(OpCode::JumpIf, 0, cond, 0, target)
    }
    pub fn jump_if_not(cond: u8, target: u16) -> Instruction {
        Instruction::pack(OpCode::JumpIfNot, 0, cond, 0, target)
    }
    pub fn wait_collision(watched: u8) -> Instruction {
        Instruction::pack(OpCode::WaitCollision, 0, watched, 0, 0)
    }
    pub fn wait_anim_end(entity: u8) -> Instruction {
        Instruction::pack(OpCode::WaitAnimEnd, 0, entity, 0, 0)
    }
    pub fn wait_move_end(entity: u8) -> Instruction {
        Instruction::pack(OpCode::WaitMoveEnd, 0, entity, 0, 0)
    }
    pub fn load_const(dst: u8, value: i32) -> Instruction {
        Instruction::pack_imm20(OpCode::LoadConst, dst, value)
    }
    pub fn load_const_high(dst: u8, high_bits: u16) -> Instruction {
        Instruction::pack(OpCode::LoadConstHigh, dst, 0, 0, high_bits)
    }
    pub fn load_store(dst: u8, property: u16) -> Instruction {
        Instruction::pack(OpCode::LoadStore, dst, 0, 0, property)
    }
    pub fn load_store_entity(dst: u8, entity_reg: u8, property: u16) -> Instruction {
        Instruction::pack(OpCode::LoadStoreEntity, dst, entity_reg, 0, property)
    }
    pub fn save_store(property: u16, src: u8) -> Instruction {
        Instruction::pack(OpCode::SaveStore, 0, src, 0, property)
    }
    pub fn save_store_entity(entity_reg: u8, property: u16, src: u8) -> Instruction {
        Instruction::pack(OpCode::SaveStoreEntity, 0, entity_reg, src, property)
    }
    pub fn move_(dst: u8, src: u8) -> Instruction {
        Instruction::pack(OpCode::Move, dst, src, 0, 0)
    }
    pub fn add(dst: u8, src1: u8, src2: u8) -> Instruction {
        Instruction::pack(OpCode::Add, dst, src1, src2, 0)
    }
    pub fn sub(dst: u8, src1: u8, src2: u8) -> Instruction {
        Instruction::pack(OpCode::Sub, dst, src1, src2, 0)
    }
    pub fn mul(dst: u8, src1: u8, src2: u8) -> Instruction {
        Instruction::pack(OpCode::Mul, dst, src1, src2, 0)
    }
    pub fn div(dst: u8, src1: u8, src2: u8) -> Instruction {
        Instruction::pack(OpCode::Div, dst, src1, src2, 0)
    }
    pub fn mod_(dst: u8, src1: u8, src2: u8) -> Instruction {
        Instruction::pack(OpCode::Mod, dst, src1, src2, 0)
    }
    pub fn add_imm(dst: u8, src: u8, imm: i32) -> Instruction {
        Instruction::pack(OpCode::AddImm, dst, src, 0, (imm & 0xFFF) as u16)
    }
    pub fn cmp_eq(dst: u8, src1: u8, src2: u8) -> Instruction {
        Instruction::pack(OpCode::CmpEq, dst, src1, src2, 0)
    }
    pub fn cmp_ne(dst: u8, src1: u8, src2: u8) -> Instruction {
        Instruction::pack(OpCode::CmpNe, dst, src1, src2, 0)
    }
    pub fn cmp_lt(dst: u8, src1: u8, src2: u8) -> Instruction {
        Instruction::pack(OpCode::CmpLt, dst, src1, src2, 0)
    }
    pub fn cmp_le(dst: u8, src1: u8, src2: u8) -> Instruction {
        Instruction::pack(OpCode::CmpLe, dst, src1, src2, 0)
    }
    pub fn cmp_gt(dst: u8, src1: u8, src2: u8) -> Instruction {
        Instruction::pack(OpCode::CmpGt, dst, src1, src2, 0)
    }
    pub fn cmp_ge(dst: u8, src1: u8, src2: u8) -> Instruction {
        Instruction::pack(OpCode::CmpGe, dst, src1, src2, 0)
    }
    pub fn spawn_entity(string_index: i32) -> Instruction {
        Instruction::pack_imm20(OpCode::SpawnEntity, 0, string_index)
    }
    pub fn destroy_entity(entity: u8) -> Instruction {
        Instruction::pack(OpCode::DestroyEntity, 0, entity, 0, 0)
    }
    pub fn get_position(dst_base: u8, entity: u8) -> Instruction {
        Instruction::pack(OpCode::GetPosition, dst_base, entity, 0, 0)
    }
    pub fn set_position(entity: u8, src_base: u8) -> Instruction {
        Instruction::pack(OpCode::SetPosition, entity, src_base, 0, 0)
    }
    pub fn get_distance(dst: u8, e1: u8, e2: u8) -> Instruction {
        Instruction::pack(OpCode::GetDistance, dst, e1, e2, 0)
    }
    pub fn move_toward(entity: u8, target_base: u8, speed: u16) -> Instruction {
        Instruction::pack(OpCode::MoveToward, entity, target_base, 0, speed)
    }
    pub fn move_forward(entity: u8, speed: u16) -> Instruction {
        Instruction::pack(OpCode::MoveForward, 0, entity, 0, speed)
    }
    pub fn stop_movement(entity: u8) -> Instruction {
        Instruction::pack(OpCode::StopMovement, 0, entity, 0, 0)
    }
    pub fn find_in_radius(centre_entity: u8, radius_cm: u16) -> Instruction {
        Instruction::pack(OpCode::FindInRadius, 0, centre_entity, 0, radius_cm)
    }
    pub fn next_found() -> Instruction {
        Instruction::pack(OpCode::NextFound, 0, 0, 0, 0)
    }
    pub fn apply_damage(target: u8, amount_reg: u8) -> Instruction {
        Instruction::pack(OpCode::ApplyDamage, 0, target, amount_reg, 0)
    }
    pub fn apply_effect(target: u8, string_index: u16) -> Instruction {
        Instruction::pack(OpCode::ApplyEffect, 0, target, 0, string_index)
    }
    pub fn remove_effect(target: u8, string_index: u16) -> Instruction {
        Instruction::pack(OpCode::RemoveEffect, 0, target, 0, string_index)
    }
    pub fn play_anim(entity: u8, string_index: u16) -> Instruction {
        Instruction::pack(OpCode::PlayAnim, 0, entity, 0, string_index)
    }
    pub fn play_anim_montage(entity: u8, string_index: u16) -> Instruction {
        Instruction::pack(OpCode::PlayAnimMontage, 0, entity, 0, string_index)
    }
    pub fn stop_anim(entity: u8) -> Instruction {
        Instruction::pack(OpCode::StopAnim, 0, entity, 0, 0)
    }
    pub fn play_vfx(pos_base: u8, string_index: u16) -> Instruction {
        Instruction::pack(OpCode::PlayVFX, 0, pos_base, 0, string_index)
    }
    pub fn play_vfx_attached(entity: u8, string_index: u16) -> Instruction {
        Instruction::pack(OpCode::PlayVFXAttached, 0, entity, 0, string_index)
    }
    pub fn play_sound(string_index: i32) -> Instruction {
        Instruction::pack_imm20(OpCode::PlaySound, 0, string_index)
    }
    pub fn play_sound_at_location(pos_base: u8, string_index: u16) -> Instruction {
        Instruction::pack(OpCode::PlaySoundAtLocation, 0, pos_base, 0, string_index)
    }
    pub fn spawn_equipment(owner: u8, slot: u8, string_index: u16) -> Instruction {
        Instruction::pack(OpCode::SpawnEquipment, 0, owner, slot, string_index)
    }
    pub fn log(string_index: i32) -> Instruction {
        Instruction::pack_imm20(OpCode::Log, 0, string_index)
    }
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.opcode() {
            Some(op) => write!(
                f,
                "Instruction {{ op: {:?}, dst: {}, src1: {}, src2: {}, imm12: {} }}",
                op,
                self.dst(),
                self.src1(),
                self.src2(),
                self.imm12()
            ),
            None => write!(f, "Instruction {{ raw_opcode: {} (unknown) }}", self.raw_opcode()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_const_round_trips_negative_value() {
        let inst = Op::load_const(reg_r0(), -42);
        assert_eq!(inst.opcode(), Some(OpCode::LoadConst));
        assert_eq!(inst.signed_imm20(), -42);
    }

    #[test]
    fn jump_target_is_unsigned_20_bit() {
        let inst = Op::jump(1000);
        assert_eq!(inst.imm20(), 1000);
    }

    #[test]
    fn add_imm_sign_extends() {
        let inst = Op::add_imm(0, 1, -5);
        assert_eq!(inst.signed_imm12(), -5);
    }

    #[test]
    fn unknown_opcode_decodes_to_none() {
        let inst = Instruction(0xFF);
        assert_eq!(inst.opcode(), None);
    }

    fn reg_r0() -> u8 {
        crate::ids::reg::R0
    }
}
