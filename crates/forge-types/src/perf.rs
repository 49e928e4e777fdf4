use std::sync::atomic::{AtomicU64, Ordering};

/// A struct of atomics replacing the "global mutable counters" pattern
/// (DESIGN NOTES), guarded at the call site by a read/write lock per §5
/// ("a read/write lock guards per-tree perf counters: write lock on
/// snapshot merge, read lock on read") — the lock lives with whichever
/// component owns a tree of these, this struct only owns the atomics.
#[derive(Debug, Default)]
pub struct PerfCounters {
    pub historic_hits: AtomicU64,
    pub historic_misses: AtomicU64,
    pub files_materialized: AtomicU64,
    pub files_up_to_date: AtomicU64,
    pub files_recovered: AtomicU64,
    pub bytes_deployed: AtomicU64,
}

/// Point-in-time copy of [`PerfCounters`], safe to log or serialize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfSnapshot {
    pub historic_hits: u64,
    pub historic_misses: u64,
    pub files_materialized: u64,
    pub files_up_to_date: u64,
    pub files_recovered: u64,
    pub bytes_deployed: u64,
}

impl PerfCounters {
    pub fn snapshot(&self) -> PerfSnapshot {
        PerfSnapshot {
            historic_hits: self.historic_hits.load(Ordering::Relaxed),
            historic_misses: self.historic_misses.load(Ordering::Relaxed),
            files_materialized: self.files_materialized.load(Ordering::Relaxed),
            files_up_to_date: self.files_up_to_date.load(Ordering::Relaxed),
            files_recovered: self.files_recovered.load(Ordering::Relaxed),
            bytes_deployed: self.bytes_deployed.load(Ordering::Relaxed),
        }
    }

    pub fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}
