//! Runtime knobs for the historic metadata cache, read from the
//! environment the way the rest of this workspace reads deployment
//! configuration (parse, warn and fall back to a default on a bad value,
//! never fail construction over it).

/// Tunables for the historic metadata cache.
#[derive(Debug, Clone, Copy)]
pub struct HistoricCacheConfig {
    /// Skip entries on their way out at save time rather than waiting
    /// until half the group has expired.
    pub proactive_purging: bool,
    /// TTL assigned to a freshly published or freshly refreshed entry,
    /// and the hard cap on entries retained per weak fingerprint.
    pub default_ttl: u8,
    /// Mixed into weak-fingerprint computation upstream of this crate;
    /// carried here only so `from_env` can read it alongside the other
    /// historic-cache knobs and hand it to whichever layer computes
    /// fingerprints.
    pub debug_fingerprint_salt: Option<String>,
    /// Number of build ages between a column rotation. Not named by the
    /// externally observable environment variables; exposed as a knob
    /// here because the remap table's rotation cadence has to come from
    /// somewhere and a fixed constant would make it untestable.
    pub remap_ttl_builds: u64,
}

impl Default for HistoricCacheConfig {
    fn default() -> Self {
        Self {
            proactive_purging: false,
            default_ttl: 5,
            debug_fingerprint_salt: None,
            remap_ttl_builds: 100,
        }
    }
}

impl HistoricCacheConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            proactive_purging: parse_env_bool(
                "ProactivePurgeHistoricMetadataEntries",
                default.proactive_purging,
            ),
            default_ttl: parse_env_u8(
                "HistoricMetadataCacheDefaultTimeToLive",
                default.default_ttl,
            ),
            debug_fingerprint_salt: std::env::var("DebugHistoricMetadataCacheFingerprintSalt").ok(),
            remap_ttl_builds: default.remap_ttl_builds,
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

fn parse_env_u8(name: &str, default: u8) -> u8 {
    match std::env::var(name) {
        Err(_) => default,
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(name, raw, "invalid integer in environment; using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttl_matches_the_documented_default() {
        assert_eq!(HistoricCacheConfig::default().default_ttl, 5);
    }
}
