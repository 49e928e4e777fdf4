//! Virtualization/hydration bookkeeping.
//!
//! A virtualized file is placed as a lightweight placeholder that the
//! host's provider fills in lazily on first read ("hydration"). This
//! module only tracks which state each path is in; the provider itself
//! is out of scope, so hydration here is just "open the file and read
//! one byte".

use dashmap::DashMap;
use forge_types::AbsolutePath;

/// Where a path sits in the virtualize/hydrate lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualizationState {
    /// Will be placed as a virtual placeholder once materialization runs.
    PendingVirtual,
    /// Already virtual; a historical read path marked it for hydration.
    PendingHydration,
    /// Was virtual, now needs a full (non-virtual) materialization.
    PendingFullMaterialization,
    /// Placed with real content, never virtualized.
    FullMaterialized,
    /// Placed as a virtual placeholder, not yet hydrated.
    Virtual,
    /// Was virtual, has since been hydrated with real bytes.
    Hydrated,
}

/// Tracks [`VirtualizationState`] per path across one materialization
/// run. Not persisted between runs — callers hand this a fresh instance
/// unless they deliberately want to resume a prior run's bookkeeping.
#[derive(Debug, Default)]
pub struct VirtualizationTracker {
    states: DashMap<AbsolutePath, VirtualizationState>,
}

impl VirtualizationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_of(&self, path: &AbsolutePath) -> Option<VirtualizationState> {
        self.states.get(path).map(|entry| *entry)
    }

    pub fn set(&self, path: AbsolutePath, state: VirtualizationState) {
        self.states.insert(path, state);
    }

    /// A historical "read path" from the host marks `path` for hydration:
    /// `Virtual` becomes `PendingHydration`, and a path
    /// not yet placed at all (`PendingVirtual`) is upgraded straight to
    /// `PendingFullMaterialization` since there is nothing to hydrate yet.
    pub fn mark_read(&self, path: &AbsolutePath) {
        if let Some(mut entry) = self.states.get_mut(path) {
            *entry = match *entry {
                VirtualizationState::Virtual => VirtualizationState::PendingHydration,
                VirtualizationState::PendingVirtual => VirtualizationState::PendingFullMaterialization,
                other => other,
            };
        }
    }

    /// Paths currently awaiting hydration after their materialization
    /// completes.
    pub fn pending_hydration(&self) -> Vec<AbsolutePath> {
        self.states
            .iter()
            .filter(|entry| matches!(*entry.value(), VirtualizationState::PendingHydration))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Mark `path` hydrated after its one-byte forced read.
    pub fn mark_hydrated(&self, path: &AbsolutePath) {
        self.states.insert(path.clone(), VirtualizationState::Hydrated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> AbsolutePath {
        AbsolutePath::new(s)
    }

    #[test]
    fn marking_a_virtual_file_read_queues_it_for_hydration() {
        let tracker = VirtualizationTracker::new();
        let p = path("/out/a.txt");
        tracker.set(p.clone(), VirtualizationState::Virtual);

        tracker.mark_read(&p);

        assert_eq!(tracker.state_of(&p), Some(VirtualizationState::PendingHydration));
        assert_eq!(tracker.pending_hydration(), vec![p]);
    }

    #[test]
    fn marking_a_pending_virtual_file_read_forces_full_materialization() {
        let tracker = VirtualizationTracker::new();
        let p = path("/out/b.txt");
        tracker.set(p.clone(), VirtualizationState::PendingVirtual);

        tracker.mark_read(&p);

        assert_eq!(
            tracker.state_of(&p),
            Some(VirtualizationState::PendingFullMaterialization)
        );
        assert!(tracker.pending_hydration().is_empty());
    }

    #[test]
    fn hydrating_a_path_clears_it_from_the_pending_set() {
        let tracker = VirtualizationTracker::new();
        let p = path("/out/c.txt");
        tracker.set(p.clone(), VirtualizationState::PendingHydration);

        tracker.mark_hydrated(&p);

        assert_eq!(tracker.state_of(&p), Some(VirtualizationState::Hydrated));
        assert!(tracker.pending_hydration().is_empty());
    }
}
