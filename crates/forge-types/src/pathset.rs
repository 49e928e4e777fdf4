use serde::{Deserialize, Serialize};

use crate::artifact::AbsolutePath;

/// Per-path observation flags recorded while forming a strong fingerprint
///.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationFlags {
    /// The path was probed for existence (and found to exist or not).
    pub existence: bool,
    /// The path's content was hashed.
    pub content: bool,
    /// The path was enumerated as a directory.
    pub enumeration: bool,
}

impl ObservationFlags {
    pub const NONE: Self = Self {
        existence: false,
        content: false,
        enumeration: false,
    };

    pub const EXISTENCE: Self = Self {
        existence: true,
        content: false,
        enumeration: false,
    };

    pub const CONTENT: Self = Self {
        existence: true,
        content: true,
        enumeration: false,
    };
}

/// One entry in an [`ObservedPathSet`]: a path plus the observation made
/// of it while executing (or probing for) a pip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathObservation {
    pub path: AbsolutePath,
    pub flags: ObservationFlags,
}

/// Ordered observation list used to form a strong fingerprint. Order is significant: serialization is deterministic
/// only if the list is already in its canonical (producer-assigned)
/// order, so this type does not sort on insert — callers are expected to
/// build it in a stable order up front.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedPathSet {
    pub entries: Vec<PathObservation>,
}

impl ObservedPathSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: AbsolutePath, flags: ObservationFlags) {
        self.entries.push(PathObservation { path, flags });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
