//! Runtime knobs for the materialization coordinator, read the way the
//! rest of this workspace reads deployment configuration: parse, warn
//! and fall back to a default on a bad value, never fail construction.

/// Tunables for [`crate::MaterializationCoordinator`].
#[derive(Debug, Clone, Copy)]
pub struct MaterializeConfig {
    /// Upper bound on concurrently in-flight top-level materializations,
    /// sizing the global semaphore.
    pub concurrency: u32,
    /// Skip re-pinning files already known materialized at the correct
    /// content instead of re-verifying them on every request.
    pub skip_extraneous_pins: bool,
    /// Size of the bounded action block used for content recovery's
    /// store-from-disk reads, separate from `concurrency` so recovery
    /// traffic cannot starve ordinary materialization.
    pub recovery_concurrency: u32,
}

impl Default for MaterializeConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            concurrency: 64,
            skip_extraneous_pins: false,
            recovery_concurrency: u32::try_from(cpus.saturating_mul(2)).unwrap_or(u32::MAX),
        }
    }
}

impl MaterializeConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            concurrency: parse_env_u32("MaterializationConcurrency", default.concurrency),
            skip_extraneous_pins: parse_env_bool("SkipExtraneousPins", default.skip_extraneous_pins),
            recovery_concurrency: default.recovery_concurrency,
        }
    }
}

fn parse_env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Err(_) => default,
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(name, raw, "invalid boolean in environment; using default");
            default
        }),
    }
}

fn parse_env_u32(name: &str, default: u32) -> u32 {
    match std::env::var(name) {
        Err(_) => default,
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(name, raw, "invalid integer in environment; using default");
            default
        }),
    }
}
