//! hkt-core -- the deterministic gameplay simulation core: a byte-packed
//! register VM that interprets pre-compiled behavior programs against a
//! structure-of-arrays entity store.
//!
//! This crate holds the "pure" simulation layer: the entity store, the
//! program and program registry, the per-VM write-buffering overlay, the
//! runtime, and the interpreter. Tick orchestration, client relevancy, and
//! snapshot dispatch live one layer up in `hkt-sim`.
//!
//! # Quick Start
//!
//! ```
//! use hkt_core::prelude::*;
//!
//! let mut stash = MasterStore::new(64, 32);
//! let subject = stash.allocate(0);
//!
//! let program = std::sync::Arc::new(VmProgram::new("Ability.Fireball", vec![Op::halt()]));
//! let mut runtime = VmRuntime::new(program, 0);
//! runtime.set_reg_entity(hkt_core::ids::reg::SELF, subject);
//!
//! let mut store = VmStore::new();
//! let mut directives = Vec::new();
//! let status = Interpreter::execute(&mut runtime, &mut store, &mut stash, 0, &mut directives);
//! assert_eq!(status, VmStatus::Completed);
//! ```

#![deny(unsafe_code)]

pub mod ids;
pub mod instruction;
pub mod interpreter;
pub mod program;
pub mod runtime;
pub mod store;
pub mod vmstore;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by core simulation operations. Store overflow and
/// interpreter failure are not modelled as `Result` returns -- they are
/// recoverable in-band states (a sentinel id, a `Failed` status) per
/// SPEC_FULL.md -- this enum covers the boundary-crossing failure modes
/// instead: program (de)serialization and full-state restore.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("program '{tag}' failed to decode: {details}")]
    ProgramDecode { tag: String, details: String },

    #[error("full-state snapshot references entity {entity:?} outside capacity {max_entities}")]
    SnapshotOutOfRange { entity: ids::EntityId, max_entities: usize },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::ids::{entity_type, reg, EntityId, PropertyId};
    pub use crate::instruction::{Instruction, Op, OpCode};
    pub use crate::interpreter::{Directive, Interpreter, MAX_INSTR_PER_TICK};
    pub use crate::program::{ProgramRegistry, VmProgram};
    pub use crate::runtime::{EventWaitState, SpatialQueryCursor, VmRuntime, VmStatus, WaitEventKind};
    pub use crate::store::{EntitySnapshot, FullState, MasterStore, VisibleStore};
    pub use crate::vmstore::{PendingWrite, VmStore};
    pub use crate::CoreError;
}
