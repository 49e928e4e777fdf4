//! The one configuration surface callers touch: every environment
//! variable is read through a single [`EngineConfig`], assembled from
//! the per-crate config structs each component already knows how to
//! build from the environment.

use forge_filehash::ConflictPolicy;
use forge_historic::HistoricCacheConfig;
use forge_materialize::MaterializeConfig;

/// Aggregate tunables for an [`crate::Engine`].
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub historic: HistoricCacheConfig,
    pub materialize: MaterializeConfig,
    /// Whether a second, differing report for the same [`forge_types::FileArtifact`]
    /// is fatal (`Strict`) or a downgraded warning that keeps the first
    /// report (`Warn`). Not itself driven by an environment variable;
    /// callers wanting it env-driven can override the field after
    /// `from_env()`.
    pub conflict_policy: ConflictPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            historic: HistoricCacheConfig::default(),
            materialize: MaterializeConfig::default(),
            conflict_policy: ConflictPolicy::Strict,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            historic: HistoricCacheConfig::from_env(),
            materialize: MaterializeConfig::from_env(),
            conflict_policy: ConflictPolicy::Strict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_the_documented_historic_and_materialize_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.historic.default_ttl, 5);
        assert!(config.materialize.concurrency > 0);
    }
}
