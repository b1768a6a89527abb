//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters for store traffic since process start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses caused by an entry outliving its TTL
    pub expired: u64,
    pub writes: u64,
    pub write_failures: u64,
}

/// Outcome of a single sweep cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub files_deleted: u64,
    pub bytes_freed: u64,
    pub dirs_pruned: u64,
    pub failures: u64,
}

impl SweepReport {
    pub fn freed_mb(&self) -> f64 {
        self.bytes_freed as f64 / (1024.0 * 1024.0)
    }
}

/// Cumulative sweeper activity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepStats {
    pub cycles: u64,
    pub files_deleted: u64,
    pub bytes_freed: u64,
    pub dirs_pruned: u64,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SweepStats {
    pub fn record(&mut self, report: &SweepReport) {
        self.cycles += 1;
        self.files_deleted += report.files_deleted;
        self.bytes_freed += report.bytes_freed;
        self.dirs_pruned += report.dirs_pruned;
        self.last_completed_at = Some(Utc::now());
        self.last_error = None;
    }
}
