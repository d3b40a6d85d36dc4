//! Hand-assembled program fixtures, stand-ins for the small flow library an
//! out-of-scope builder would normally emit. Used by interpreter and
//! end-to-end tests, not a public API of the engine itself.

use hkt_core::ids::{reg, PropertyId};
use hkt_core::instruction::Op;
use hkt_core::program::VmProgram;

/// Costs mana, damages the target, spawns a projectile, and plays its
/// impact effects.
pub fn fireball() -> VmProgram {
    VmProgram::new(
        "Ability.Fireball",
        vec![
            Op::load_store_entity(reg::R0, reg::SELF, PropertyId::MANA.0),
            Op::load_const(reg::R1, 10),
            Op::cmp_lt(reg::FLAG, reg::R0, reg::R1),
            Op::jump_if(reg::FLAG, 11),
            Op::sub(reg::R0, reg::R0, reg::R1),
            Op::save_store_entity(reg::SELF, PropertyId::MANA.0, reg::R0),
            Op::load_const(reg::R2, 25),
            Op::apply_damage(reg::TARGET, reg::R2),
            Op::spawn_entity(0),
            Op::play_vfx_attached(reg::SPAWNED, 1),
            Op::play_sound(2),
            Op::halt(),
        ],
    )
    .with_strings(vec!["/class/FireballProjectile".into(), "fx.fireball.impact".into(), "sfx.fireball.cast".into()])
}

/// Walks the subject toward the event's target location and blocks until
/// movement completes.
pub fn move_to() -> VmProgram {
    VmProgram::new(
        "Ability.MoveTo",
        vec![
            Op::load_store(reg::R0, PropertyId::MOVE_TARGET_X.0),
            Op::load_store(reg::R1, PropertyId::MOVE_TARGET_Y.0),
            Op::load_store(reg::R2, PropertyId::MOVE_TARGET_Z.0),
            Op::move_toward(reg::SELF, reg::R0, 400),
            Op::wait_move_end(reg::SELF),
            Op::halt(),
        ],
    )
}

/// Spawns a new entity owned by the triggering subject and sets its
/// starting stats before announcing it.
pub fn character_spawn() -> VmProgram {
    VmProgram::new(
        "System.CharacterSpawn",
        vec![
            Op::spawn_entity(0),
            Op::load_const(reg::R0, 100),
            Op::save_store_entity(reg::SPAWNED, PropertyId::HEALTH.0, reg::R0),
            Op::save_store_entity(reg::SPAWNED, PropertyId::MAX_HEALTH.0, reg::R0),
            Op::load_store_entity(reg::R1, reg::SELF, PropertyId::TEAM.0),
            Op::save_store_entity(reg::SPAWNED, PropertyId::TEAM.0, reg::R1),
            Op::play_anim(reg::SPAWNED, 1),
            Op::halt(),
        ],
    )
    .with_strings(vec!["/class/Character".into(), "anim.spawn".into()])
}

/// Melee swing: only lands if the target is still within range by the
/// time the windup finishes, otherwise plays a whiff animation.
pub fn basic_attack() -> VmProgram {
    VmProgram::new(
        "Ability.BasicAttack",
        vec![
            Op::play_anim_montage(reg::SELF, 0),
            Op::wait_anim_end(reg::SELF),
            Op::get_distance(reg::R0, reg::SELF, reg::TARGET),
            Op::load_const(reg::R1, 250),
            Op::cmp_le(reg::FLAG, reg::R0, reg::R1),
            Op::jump_if_not(reg::FLAG, 9),
            Op::load_const(reg::R2, 15),
            Op::apply_damage(reg::TARGET, reg::R2),
            Op::jump(10),
            Op::play_anim(reg::SELF, 1),
            Op::halt(),
        ],
    )
    .with_strings(vec!["anim.attack.swing".into(), "anim.attack.whiff".into()])
}

/// Restores health to the target, clamped to its max.
pub fn heal() -> VmProgram {
    VmProgram::new(
        "Ability.Heal",
        vec![
            Op::load_store_entity(reg::R0, reg::TARGET, PropertyId::HEALTH.0),
            Op::load_store_entity(reg::R1, reg::TARGET, PropertyId::MAX_HEALTH.0),
            Op::load_const(reg::R2, 30),
            Op::add(reg::R3, reg::R0, reg::R2),
            Op::cmp_gt(reg::FLAG, reg::R3, reg::R1),
            Op::jump_if_not(reg::FLAG, 7),
            Op::move_(reg::R3, reg::R1),
            Op::save_store_entity(reg::TARGET, PropertyId::HEALTH.0, reg::R3),
            Op::play_vfx_attached(reg::TARGET, 0),
            Op::halt(),
        ],
    )
    .with_strings(vec!["fx.heal.sparkle".into()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_demo_program_is_well_formed() {
        for program in [fireball(), move_to(), character_spawn(), basic_attack(), heal()] {
            assert!(program.is_valid());
            assert!(!program.tag.is_empty());
        }
    }
}
