//! Filesystem image cache with sliding TTL expiration
//!
//! Stores processed image payloads on disk under a two-level shard layout
//! keyed by a SHA-256 fingerprint of the processing request, and reclaims
//! expired entries with a periodic background sweep.

mod config;
mod error;
mod key;
mod store;
mod sweeper;
mod types;

pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use key::{derive_key, CacheKey, ImageFormat, RequestDescriptor, KEY_LEN};
pub use store::CacheStore;
pub use sweeper::Sweeper;
pub use types::{CacheStats, SweepReport, SweepStats};

/// Environment variable names read by [`CacheConfig::from_env`]
pub mod env {
    pub use crate::config::{ENV_CACHE_DIR, ENV_SWEEP_INTERVAL_HOURS, ENV_TTL_HOURS};
}
