//! Cache configuration

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DIR_NAME: &str = "ImageOptimizerCache";
const DEFAULT_TTL_HOURS: f64 = 24.0;
const DEFAULT_SWEEP_INTERVAL_HOURS: f64 = 6.0;

pub const ENV_CACHE_DIR: &str = "IMAGE_CACHE_DIR";
pub const ENV_TTL_HOURS: &str = "IMAGE_CACHE_TTL_HOURS";
pub const ENV_SWEEP_INTERVAL_HOURS: &str = "IMAGE_CACHE_CLEANUP_INTERVAL_HOURS";

/// Where the cache lives and how long entries survive without being read.
///
/// Built once at startup and handed by value to [`crate::CacheStore`] and
/// [`crate::Sweeper`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub root: PathBuf,
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join(DEFAULT_DIR_NAME),
            ttl: hours(DEFAULT_TTL_HOURS),
            sweep_interval: hours(DEFAULT_SWEEP_INTERVAL_HOURS),
        }
    }
}

impl CacheConfig {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
            sweep_interval,
        }
    }

    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let root = lookup(ENV_CACHE_DIR)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.root);

        let ttl = parse_hours(lookup(ENV_TTL_HOURS)).unwrap_or(defaults.ttl);

        let sweep_interval =
            parse_hours(lookup(ENV_SWEEP_INTERVAL_HOURS)).unwrap_or(defaults.sweep_interval);

        Self {
            root,
            ttl,
            sweep_interval,
        }
    }
}

fn hours(h: f64) -> Duration {
    Duration::from_secs_f64(h * 3600.0)
}

/// Fractional hours; rejects non-finite, non-positive, and overflowing values
fn parse_hours(value: Option<String>) -> Option<Duration> {
    let h = value?.trim().parse::<f64>().ok()?;
    if !h.is_finite() || h <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(h * 3600.0).ok()
}
