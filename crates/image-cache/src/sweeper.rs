//! Periodic expiry sweep over the cache root
//!
//! A cycle is two passes: delete every regular file whose access time is older
//! than the TTL, then remove directories left empty, children before parents.
//! The root itself is never removed.

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::store::is_expired;
use crate::types::{SweepReport, SweepStats};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Background reclaimer for expired cache entries
#[derive(Debug, Clone)]
pub struct Sweeper {
    root: PathBuf,
    ttl: Duration,
    interval: Duration,
    stats: Arc<RwLock<SweepStats>>,
}

impl Sweeper {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            root: config.root.clone(),
            ttl: config.ttl,
            interval: config.sweep_interval,
            stats: Arc::new(RwLock::new(SweepStats::default())),
        }
    }

    pub async fn stats(&self) -> SweepStats {
        self.stats.read().await.clone()
    }

    /// Sweep immediately, then once per interval, until `shutdown` fires.
    ///
    /// A failed cycle is logged and the next one runs on schedule.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            ttl_secs = self.ttl.as_secs(),
            "Cache sweeper started"
        );

        loop {
            if let Err(e) = self.sweep_until(&shutdown).await {
                error!(error = %e, "Error during cache sweep");
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Cache sweeper stopped");
    }

    /// Run one full cycle
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_until(&CancellationToken::new()).await
    }

    async fn sweep_until(&self, shutdown: &CancellationToken) -> Result<SweepReport> {
        info!("Starting cache sweep");

        let root = self.root.clone();
        let ttl = self.ttl;
        let token = shutdown.clone();
        let outcome = match tokio::task::spawn_blocking(move || {
            sweep_dir(&root, ttl, SystemTime::now(), &token)
        })
        .await
        {
            Ok(report) => report,
            Err(e) => Err(CacheError::from(e)),
        };

        let mut stats = self.stats.write().await;
        match &outcome {
            Ok(report) if shutdown.is_cancelled() => {
                info!(
                    files_deleted = report.files_deleted,
                    "Cache sweep interrupted, cycle not recorded"
                );
            }
            Ok(report) => {
                stats.record(report);
                info!(
                    files_deleted = report.files_deleted,
                    freed_mb = format!("{:.2}", report.freed_mb()),
                    dirs_pruned = report.dirs_pruned,
                    failures = report.failures,
                    "Cache sweep completed"
                );
            }
            Err(e) => stats.last_error = Some(e.to_string()),
        }

        outcome
    }
}

/// One sweep cycle as of `now`; stops early once `shutdown` is cancelled
pub(crate) fn sweep_dir(
    root: &Path,
    ttl: Duration,
    now: SystemTime,
    shutdown: &CancellationToken,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    match std::fs::metadata(root) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => return Err(CacheError::InvalidRoot(root.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(cache_dir = ?root, "Cache root missing, nothing to sweep");
            return Ok(report);
        }
        Err(e) => return Err(e.into()),
    }

    delete_expired(root, ttl, now, shutdown, &mut report);
    if shutdown.is_cancelled() {
        info!("Cache sweep interrupted by shutdown");
        return Ok(report);
    }
    prune_empty_dirs(root, shutdown, &mut report);

    Ok(report)
}

fn delete_expired(
    root: &Path,
    ttl: Duration,
    now: SystemTime,
    shutdown: &CancellationToken,
    report: &mut SweepReport,
) {
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        if shutdown.is_cancelled() {
            return;
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                note_walk_error(&err, report);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                note_walk_error(&err, report);
                continue;
            }
        };
        if !is_expired(&metadata, now, ttl) {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                report.files_deleted += 1;
                report.bytes_freed += metadata.len();
            }
            // Already taken by an expiring read
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                report.failures += 1;
                error!(path = %entry.path().display(), error = %e, "Failed to delete expired file");
            }
        }
    }
}

fn prune_empty_dirs(root: &Path, shutdown: &CancellationToken, report: &mut SweepReport) {
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .contents_first(true);

    for entry in walker {
        if shutdown.is_cancelled() {
            return;
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                note_walk_error(&err, report);
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path();
        match is_empty_dir(path) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to list cache directory");
                }
                continue;
            }
        }

        match std::fs::remove_dir(path) {
            Ok(()) => report.dirs_pruned += 1,
            // A concurrent put refilled it, or someone else removed it first
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::NotFound | ErrorKind::DirectoryNotEmpty
                ) => {}
            Err(e) => {
                report.failures += 1;
                error!(path = %path.display(), error = %e, "Failed to delete empty directory");
            }
        }
    }
}

fn is_empty_dir(path: &Path) -> std::io::Result<bool> {
    Ok(std::fs::read_dir(path)?.next().is_none())
}

fn note_walk_error(err: &walkdir::Error, report: &mut SweepReport) {
    // Entries vanish under us whenever a read expires them concurrently.
    let vanished = err
        .io_error()
        .is_some_and(|io_err| io_err.kind() == ErrorKind::NotFound);
    if vanished {
        return;
    }

    report.failures += 1;
    let path = err.path().map(|p| p.display().to_string());
    warn!(path, error = %err, "Failed to walk cache directory");
}
