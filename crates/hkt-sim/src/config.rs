//! Layered configuration for a simulation instance (SPEC_FULL.md §6/§10.3).

use serde::{Deserialize, Serialize};

/// The six tunables from SPEC_FULL.md §6, plus the relevancy
/// movement-reassessment threshold. `Default` reproduces the spec's
/// defaults exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    pub max_entities: usize,
    pub max_properties: usize,
    pub max_instructions_per_tick: u32,
    pub max_runtimes: usize,
    pub cell_size_cm: i64,
    pub interest_radius_cells: u32,
    pub movement_threshold_cm: i64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_entities: 1024,
            max_properties: 256,
            max_instructions_per_tick: 10_000,
            max_runtimes: 256,
            cell_size_cm: 5_000,
            interest_radius_cells: 1,
            movement_threshold_cm: 100,
        }
    }
}

/// Construction-time configuration failure. This is the one place in the
/// crate where a misconfiguration is a hard error rather than a logged,
/// in-band condition -- a zero-capacity store cannot be reasoned about at
/// runtime.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("max_entities must be non-zero")]
    ZeroEntities,
    #[error("max_properties must be non-zero")]
    ZeroProperties,
    #[error("max_instructions_per_tick must be non-zero")]
    ZeroInstructionBudget,
    #[error("max_runtimes must be non-zero")]
    ZeroRuntimes,
    #[error("cell_size_cm must be positive, got {0}")]
    NonPositiveCellSize(i64),
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entities == 0 {
            return Err(ConfigError::ZeroEntities);
        }
        if self.max_properties == 0 {
            return Err(ConfigError::ZeroProperties);
        }
        if self.max_instructions_per_tick == 0 {
            return Err(ConfigError::ZeroInstructionBudget);
        }
        if self.max_runtimes == 0 {
            return Err(ConfigError::ZeroRuntimes);
        }
        if self.cell_size_cm <= 0 {
            return Err(ConfigError::NonPositiveCellSize(self.cell_size_cm));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.max_entities, 1024);
        assert_eq!(config.max_properties, 256);
        assert_eq!(config.max_instructions_per_tick, 10_000);
        assert_eq!(config.max_runtimes, 256);
        assert_eq!(config.cell_size_cm, 5_000);
        assert_eq!(config.interest_radius_cells, 1);
        assert_eq!(config.movement_threshold_cm, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = SimConfig { max_entities: 0, ..SimConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroEntities)));
    }

    #[test]
    fn non_positive_cell_size_is_rejected() {
        let config = SimConfig { cell_size_cm: 0, ..SimConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::NonPositiveCellSize(0))));
    }
}
