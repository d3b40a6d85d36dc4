//! Immutable compiled programs, keyed by event tag, and the registry that
//! holds them.

use crate::instruction::Instruction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// An immutable, byte-packed instruction sequence together with its
/// constant and string pools. Constructed by an out-of-scope compiler
/// (see SPEC_FULL.md §4.2) and registered once; never mutated afterward.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VmProgram {
    pub tag: String,
    pub code: Vec<Instruction>,
    pub constants: Vec<i32>,
    pub strings: Vec<String>,
    pub line_numbers: Vec<i32>,
}

impl VmProgram {
    pub fn new(tag: impl Into<String>, code: Vec<Instruction>) -> Self {
        Self { tag: tag.into(), code, constants: Vec::new(), strings: Vec::new(), line_numbers: Vec::new() }
    }

    pub fn with_strings(mut self, strings: Vec<String>) -> Self {
        self.strings = strings;
        self
    }

    pub fn with_constants(mut self, constants: Vec<i32>) -> Self {
        self.constants = constants;
        self
    }

    pub fn is_valid(&self) -> bool {
        !self.code.is_empty()
    }

    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    pub fn string_at(&self, index: i32) -> Option<&str> {
        if index < 0 {
            return None;
        }
        self.strings.get(index as usize).map(String::as_str)
    }
}

/// Tag -> shared, immutable program. Registration is write-rare; lookup is
/// on the hot path and must tolerate many concurrent readers, hence the
/// reader/writer lock rather than a mutex.
#[derive(Default)]
pub struct ProgramRegistry {
    programs: RwLock<HashMap<String, Arc<VmProgram>>>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self { programs: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, program: VmProgram) {
        let tag = program.tag.clone();
        let mut guard = self.programs.write().expect("program registry lock poisoned");
        guard.insert(tag.clone(), Arc::new(program));
        info!(tag = %tag, "registered program");
    }

    pub fn find(&self, tag: &str) -> Option<Arc<VmProgram>> {
        let guard = self.programs.read().expect("program registry lock poisoned");
        guard.get(tag).cloned()
    }

    pub fn clear(&self) {
        let mut guard = self.programs.write().expect("program registry lock poisoned");
        guard.clear();
        info!("cleared program registry");
    }

    pub fn len(&self) -> usize {
        self.programs.read().expect("program registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
