//! Entity and property identifiers, and the conventional register-role
//! assignments shared by every compiled program.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-bit index into entity-indexed arrays.
///
/// Unlike a generational handle, an `EntityId` carries no liveness
/// information of its own -- the store's validity bitmap is the only
/// source of truth for whether a given id currently denotes a live entity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    /// Sentinel denoting "no entity".
    pub const INVALID: EntityId = EntityId(u32::MAX);

    #[inline]
    pub fn is_valid_id(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid_id() {
            write!(f, "EntityId({})", self.0)
        } else {
            write!(f, "EntityId(INVALID)")
        }
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::INVALID
    }
}

/// A 16-bit index into property-indexed arrays.
///
/// The property space is a closed, enumerated catalogue; the named
/// constants below cover the properties the interpreter and the flow
/// library reference by name, plus a run of generic `ParamN` slots for
/// event payload data. Raw instruction operands still carry a bare `u16`
/// so the decoder never has to validate against this catalogue -- an
/// out-of-range id is simply treated as "out of range" per the store's
/// defensive `get`/`set` contract.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyId(pub u16);

impl PropertyId {
    pub const POS_X: PropertyId = PropertyId(0);
    pub const POS_Y: PropertyId = PropertyId(1);
    pub const POS_Z: PropertyId = PropertyId(2);
    pub const ROTATION_YAW: PropertyId = PropertyId(3);
    pub const HEALTH: PropertyId = PropertyId(4);
    pub const MAX_HEALTH: PropertyId = PropertyId(5);
    pub const MANA: PropertyId = PropertyId(6);
    pub const MAX_MANA: PropertyId = PropertyId(7);
    pub const ATTACK_POWER: PropertyId = PropertyId(8);
    pub const DEFENSE: PropertyId = PropertyId(9);
    pub const TEAM: PropertyId = PropertyId(10);
    pub const ENTITY_TYPE: PropertyId = PropertyId(11);
    pub const OWNER: PropertyId = PropertyId(12);
    pub const MOVE_TARGET_X: PropertyId = PropertyId(13);
    pub const MOVE_TARGET_Y: PropertyId = PropertyId(14);
    pub const MOVE_TARGET_Z: PropertyId = PropertyId(15);
    pub const MOVE_SPEED: PropertyId = PropertyId(16);
    pub const IS_MOVING: PropertyId = PropertyId(17);
    pub const PARAM0: PropertyId = PropertyId(18);
    pub const PARAM1: PropertyId = PropertyId(19);
    pub const PARAM2: PropertyId = PropertyId(20);
    pub const PARAM3: PropertyId = PropertyId(21);
    pub const PARAM4: PropertyId = PropertyId(22);
    pub const PARAM5: PropertyId = PropertyId(23);
    pub const PARAM6: PropertyId = PropertyId(24);
    pub const PARAM7: PropertyId = PropertyId(25);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyId({})", self.0)
    }
}

impl From<u16> for PropertyId {
    fn from(v: u16) -> Self {
        PropertyId(v)
    }
}

/// Entity-type values written into [`PropertyId::ENTITY_TYPE`]. Only the
/// values the interpreter itself assigns are enumerated here; gameplay
/// content is free to use other values for its own purposes.
pub mod entity_type {
    pub const DEFAULT: i32 = 0;
    pub const PROJECTILE: i32 = 1;
    pub const EQUIPMENT: i32 = 2;
}

/// Conventional register-role assignments. All 16 registers are plain
/// signed 32-bit slots; these constants exist only so program authors and
/// tests can refer to them by role instead of by number.
pub mod reg {
    pub const SELF: u8 = 0;
    pub const TARGET: u8 = 1;
    pub const SPAWNED: u8 = 2;
    pub const HIT: u8 = 3;
    pub const ITER: u8 = 4;
    pub const COUNT: u8 = 5;
    pub const FLAG: u8 = 6;
    pub const R0: u8 = 7;
    pub const R1: u8 = 8;
    pub const R2: u8 = 9;
    pub const R3: u8 = 10;
    pub const R4: u8 = 11;
    pub const R5: u8 = 12;
    pub const R6: u8 = 13;
    pub const R7: u8 = 14;
    pub const R8: u8 = 15;

    pub const NUM_REGISTERS: usize = 16;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_entity_is_not_valid() {
        assert!(!EntityId::INVALID.is_valid_id());
        assert!(EntityId(0).is_valid_id());
    }

    #[test]
    fn property_id_from_raw() {
        let p: PropertyId = 4u16.into();
        assert_eq!(p, PropertyId::HEALTH);
    }
}
