//! Response payloads for the image optimizer

use image_cache::{CacheStats, SweepStats};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
    pub sweeper: SweepStats,
}
