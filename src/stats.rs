use crate::checkpoint::CheckpointStats;
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics collected during a pipeline run
#[derive(Default, Debug)]
pub struct PipelineStats {
    pub ids_processed: AtomicU64,
    pub entries_written: AtomicU64,
    pub entries_empty: AtomicU64,
    pub connections_written: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub normalize_failures: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_processed(&self) {
        self.ids_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_written(&self) {
        self.entries_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_empty(&self) {
        self.entries_empty.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_connections(&self, count: u64) {
        self.connections_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_fetch_failures(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_normalize_failures(&self) {
        self.normalize_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.ids_processed.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.entries_written.load(Ordering::Relaxed)
    }

    pub fn empty(&self) -> u64 {
        self.entries_empty.load(Ordering::Relaxed)
    }

    pub fn connections(&self) -> u64 {
        self.connections_written.load(Ordering::Relaxed)
    }

    pub fn fetch_failed(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }

    pub fn normalize_failed(&self) -> u64 {
        self.normalize_failures.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.fetch_failed() + self.normalize_failed()
    }

    /// Create stats initialized from a checkpoint
    pub fn from_checkpoint(cp: &CheckpointStats) -> Self {
        Self {
            ids_processed: AtomicU64::new(cp.ids_processed),
            entries_written: AtomicU64::new(cp.entries_written),
            entries_empty: AtomicU64::new(cp.entries_empty),
            connections_written: AtomicU64::new(cp.connections_written),
            fetch_failures: AtomicU64::new(cp.fetch_failures),
            normalize_failures: AtomicU64::new(cp.normalize_failures),
        }
    }

    /// Convert to checkpoint stats for persistence
    pub fn to_checkpoint(&self) -> CheckpointStats {
        CheckpointStats {
            ids_processed: self.processed(),
            entries_written: self.written(),
            entries_empty: self.empty(),
            connections_written: self.connections(),
            fetch_failures: self.fetch_failed(),
            normalize_failures: self.normalize_failed(),
        }
    }
}
