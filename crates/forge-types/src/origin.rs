use serde::{Deserialize, Serialize};

/// The outcome category of a placement (glossary: "Origin").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// The pip ran and produced this output directly.
    Produced,
    /// The content was fetched from the cache and written to disk.
    DeployedFromCache,
    /// The target already held the correct content; nothing was written.
    UpToDate,
    /// No materialization was attempted for this artifact.
    NotMaterialized,
}

impl Origin {
    /// Precedence used when an [`Origin`] is derived for a result carrying
    /// multiple origins.
    const fn rank(self) -> u8 {
        match self {
            Self::Produced => 3,
            Self::DeployedFromCache => 2,
            Self::UpToDate => 1,
            Self::NotMaterialized => 0,
        }
    }

    /// Combine two origins, keeping the higher-precedence one.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }

    /// Fold an iterator of origins down to the single overall origin,
    /// defaulting to [`Origin::NotMaterialized`] for an empty set.
    pub fn overall(origins: impl IntoIterator<Item = Self>) -> Self {
        origins
            .into_iter()
            .fold(Self::NotMaterialized, Self::combine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_order_is_produced_over_deployed_over_uptodate_over_not_materialized() {
        assert_eq!(
            Origin::overall([Origin::UpToDate, Origin::Produced, Origin::DeployedFromCache]),
            Origin::Produced
        );
        assert_eq!(
            Origin::overall([Origin::UpToDate, Origin::DeployedFromCache]),
            Origin::DeployedFromCache
        );
        assert_eq!(Origin::overall([Origin::UpToDate]), Origin::UpToDate);
        assert_eq!(Origin::overall([]), Origin::NotMaterialized);
    }
}
