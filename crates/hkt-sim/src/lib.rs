//! hkt-sim -- the orchestration layer over `hkt-core`: configuration, the
//! three-phase VM processor, the per-client relevancy index, and the
//! snapshot/batch dispatcher that turns per-tick events into per-client
//! batches.
//!
//! `hkt-core` stays pure simulation (entity store, VM, interpreter); this
//! crate is everything that decides *which runtimes run this tick* and
//! *which client sees what*.
//!
//! # Quick Start
//!
//! ```
//! use hkt_sim::prelude::*;
//! use hkt_core::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(ProgramRegistry::new());
//! registry.register(VmProgram::new("Ability.Noop", vec![Op::halt()]));
//!
//! let config = SimConfig::default();
//! let mut processor = Processor::new(&config, registry).unwrap();
//! let mut master = MasterStore::new(config.max_entities, config.max_properties);
//!
//! let diag = processor.tick(0, 1.0 / 60.0, &mut master);
//! assert_eq!(diag.active, 0);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod processor;
pub mod relevancy;

pub mod prelude {
    pub use crate::config::{ConfigError, SimConfig};
    pub use crate::dispatcher::{ClientBatch, Dispatcher, IntentEvent};
    pub use crate::processor::{Processor, ProcessorError, TickDiagnostics};
    pub use crate::relevancy::{Cell, ClientId, RelevancyIndex};
}
