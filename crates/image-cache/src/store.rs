//! Sharded on-disk cache store with sliding TTL
//!
//! Entries live at `<root>/<key[0:2]>/<key[2:4]>/<key>` as raw payload bytes.
//! The file's access time is the only liveness signal: a read refreshes it,
//! and an entry whose access time is older than the TTL is treated as gone.

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::types::CacheStats;
use filetime::FileTime;
use std::fs::Metadata;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

/// Tries at creating a shard directory and temp file before giving up
const CREATE_ATTEMPTS: u32 = 3;

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
}

/// Filesystem cache keyed by [`CacheKey`]
///
/// Cloning is cheap and clones share counters. No locking is done between
/// callers: concurrent puts for a key are last-writer-wins, and every write is
/// a temp-file-then-rename so readers never see a partial payload.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    ttl: Duration,
    counters: Arc<Counters>,
}

impl CacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            root: config.root.clone(),
            ttl: config.ttl,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the cache root exists
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        info!(cache_dir = ?self.root, ttl_secs = self.ttl.as_secs(), "Cache initialized");
        Ok(())
    }

    /// Shard path for a key
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        let (first, second) = key.shards();
        self.root.join(first).join(second).join(key.as_str())
    }

    /// Read an entry, refreshing its access time on a hit.
    ///
    /// Expired entries are deleted on the way out. Every I/O problem on this
    /// path is reported as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        match self.lookup(key).await {
            Some(data) => Some(data),
            None => self.miss(),
        }
    }

    /// Like [`get`](Self::get), but a miss is not counted.
    ///
    /// For re-checking a key whose miss was already recorded, e.g. after
    /// waiting for another writer.
    pub async fn recheck(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.lookup(key).await
    }

    async fn lookup(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.path_for(key);

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                warn!(key = %key, path = ?path, "Cache path is not a regular file");
                return None;
            }
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(key = %key, error = %e, "Failed to stat cached file");
                }
                return None;
            }
        };

        if is_expired(&metadata, SystemTime::now(), self.ttl) {
            info!(key = %key, "Cache expired");
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = ?path, error = %e, "Error deleting expired cache file");
                }
            }
            return None;
        }

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(key = %key, "Cached file removed before it could be read");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cached file");
                return None;
            }
        };

        if let Err(e) = touch(path).await {
            debug!(key = %key, error = %e, "Failed to refresh access time");
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, size = data.len(), "Cache hit");
        Some(data)
    }

    /// Store an entry, replacing any previous payload for the key
    pub async fn put(&self, key: &CacheKey, data: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let payload = data.to_vec();

        let outcome = match tokio::task::spawn_blocking(move || write_atomic(&path, &payload)).await
        {
            Ok(written) => written.map_err(CacheError::from),
            Err(e) => Err(CacheError::from(e)),
        };

        match &outcome {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, size = data.len(), "Cached image");
            }
            Err(e) => {
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Failed to write cache entry");
            }
        }

        outcome
    }

    /// Remove every entry and recreate an empty root.
    ///
    /// Puts racing with a clear may or may not survive it.
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.root).await?;
        info!(cache_dir = ?self.root, "Cache cleared");
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
        }
    }

    fn miss(&self) -> Option<Vec<u8>> {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }
}

/// Whether an entry last accessed per `metadata` has outlived `ttl` at `now`.
///
/// Falls back to the modification time where access times are unsupported;
/// a timestamp in the future counts as age zero.
pub(crate) fn is_expired(metadata: &Metadata, now: SystemTime, ttl: Duration) -> bool {
    let last_access = match metadata.accessed().or_else(|_| metadata.modified()) {
        Ok(time) => time,
        Err(_) => return false,
    };
    match now.duration_since(last_access) {
        Ok(age) => age > ttl,
        Err(_) => false,
    }
}

async fn touch(path: PathBuf) -> io::Result<()> {
    tokio::task::spawn_blocking(move || filetime::set_file_atime(&path, FileTime::now()))
        .await
        .map_err(io::Error::other)?
}

fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "cache path has no parent"))?;
    let prefix = match path.file_name() {
        Some(name) => format!(".{}.", name.to_string_lossy()),
        None => ".".to_string(),
    };

    let mut attempts = 0;
    let mut tmp = loop {
        attempts += 1;
        let created = std::fs::create_dir_all(dir).and_then(|()| {
            tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(".tmp")
                .tempfile_in(dir)
        });
        match created {
            Ok(tmp) => break tmp,
            // The sweeper can prune shard directories between creation and use.
            Err(e) if e.kind() == ErrorKind::NotFound && attempts < CREATE_ATTEMPTS => {
                debug!(dir = ?dir, attempts, "Shard directory vanished, retrying");
            }
            Err(e) => return Err(e),
        }
    };

    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{derive_key, ImageFormat, RequestDescriptor};
    use tempfile::tempdir;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    fn store_in(dir: &Path, ttl: Duration) -> CacheStore {
        CacheStore::new(&CacheConfig::new(dir.join("cache"), ttl, HOUR))
    }

    fn key(n: u8) -> CacheKey {
        derive_key(&RequestDescriptor::new(
            format!("https://example.com/{}.png", n),
            100,
            0,
            ImageFormat::Webp,
            80,
        ))
    }

    fn set_last_access(path: &Path, ago: Duration) {
        let at = SystemTime::now() - ago;
        filetime::set_file_atime(path, FileTime::from_system_time(at)).unwrap();
    }

    fn last_access(path: &Path) -> SystemTime {
        std::fs::metadata(path).unwrap().accessed().unwrap()
    }

    #[tokio::test]
    async fn test_init_creates_root() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), HOUR);
        assert!(!store.root().exists());

        store.init().await.unwrap();
        assert!(store.root().is_dir());

        // Idempotent
        store.init().await.unwrap();
    }

    #[test]
    fn test_shard_layout() {
        let store = CacheStore::new(&CacheConfig::new("/cache", HOUR, HOUR));
        let key: CacheKey = "abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789"
            .parse()
            .unwrap();

        assert_eq!(
            store.path_for(&key),
            PathBuf::from("/cache/ab/cd").join(key.as_str())
        );
    }

    #[tokio::test]
    async fn test_put_and_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), HOUR);
        store.init().await.unwrap();

        let key = key(1);
        store.put(&key, &[0x01, 0x02]).await.unwrap();

        assert!(store.path_for(&key).is_file());
        assert_eq!(store.get(&key).await, Some(vec![0x01, 0x02]));
    }

    #[tokio::test]
    async fn test_put_without_init_creates_shards() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), HOUR);

        let key = key(2);
        store.put(&key, b"payload").await.unwrap();
        assert_eq!(store.get(&key).await.as_deref(), Some(&b"payload"[..]));
    }

    #[tokio::test]
    async fn test_put_replaces_existing_content() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), HOUR);

        let key = key(3);
        store.put(&key, b"first version").await.unwrap();
        store.put(&key, b"second").await.unwrap();

        assert_eq!(store.get(&key).await.as_deref(), Some(&b"second"[..]));

        // Only the entry itself remains in the shard directory
        let shard = store.path_for(&key).parent().unwrap().to_path_buf();
        let names: Vec<_> = std::fs::read_dir(shard)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(key.as_str())]);
    }

    #[tokio::test]
    async fn test_get_miss() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), HOUR);
        store.init().await.unwrap();

        assert!(store.get(&key(4)).await.is_none());

        let stats = store.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[tokio::test]
    async fn test_recheck_does_not_count_misses() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), HOUR);

        assert!(store.get(&key(5)).await.is_none());
        assert!(store.recheck(&key(5)).await.is_none());
        assert_eq!(store.stats().misses, 1);

        store.put(&key(5), b"late").await.unwrap();
        assert_eq!(store.recheck(&key(5)).await.unwrap(), b"late");

        let stats = store.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss_and_deleted() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), HOUR);

        let key = key(5);
        store.put(&key, b"stale").await.unwrap();
        let path = store.path_for(&key);
        set_last_access(&path, 2 * HOUR);

        assert!(store.get(&key).await.is_none());
        assert!(!path.exists());

        let stats = store.stats();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_hit_refreshes_access_time() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), HOUR);

        let key = key(6);
        store.put(&key, b"fresh").await.unwrap();
        let path = store.path_for(&key);

        // Accessed every half TTL, the entry never expires
        for _ in 0..4 {
            set_last_access(&path, HOUR / 2);
            assert_eq!(store.get(&key).await.as_deref(), Some(&b"fresh"[..]));

            let age = SystemTime::now()
                .duration_since(last_access(&path))
                .unwrap_or_default();
            assert!(age < Duration::from_secs(60), "atime not refreshed: {:?}", age);
        }

        assert_eq!(store.stats().hits, 4);
    }

    #[tokio::test]
    async fn test_future_access_time_is_not_expired() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), HOUR);

        let key = key(7);
        store.put(&key, b"skewed").await.unwrap();
        let future = SystemTime::now() + 10 * HOUR;
        filetime::set_file_atime(store.path_for(&key), FileTime::from_system_time(future))
            .unwrap();

        assert!(store.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_directory_at_entry_path_is_miss() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), HOUR);

        let key = key(8);
        std::fs::create_dir_all(store.path_for(&key)).unwrap();

        assert!(store.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_removes_entries_and_keeps_root() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), HOUR);
        store.init().await.unwrap();

        let keys: Vec<_> = (10..15).map(key).collect();
        for k in &keys {
            store.put(k, b"data").await.unwrap();
        }

        store.clear().await.unwrap();

        assert!(store.root().is_dir());
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
        for k in &keys {
            assert!(store.get(k).await.is_none());
        }

        // Root still accepts writes
        store.put(&keys[0], b"again").await.unwrap();
        assert_eq!(store.get(&keys[0]).await.as_deref(), Some(&b"again"[..]));
    }

    #[tokio::test]
    async fn test_clear_missing_root() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), HOUR);

        store.clear().await.unwrap();
        assert!(store.root().is_dir());
    }

    #[tokio::test]
    async fn test_put_failure_is_reported() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), HOUR);

        // A regular file where the root directory should be
        std::fs::write(store.root(), b"not a directory").unwrap();

        let result = store.put(&key(16), b"data").await;
        assert!(matches!(result, Err(CacheError::Io(_))));
        assert_eq!(store.stats().write_failures, 1);
        assert_eq!(store.stats().writes, 0);
    }

    #[tokio::test]
    async fn test_concurrent_puts_never_expose_partial_files() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), HOUR);
        store.init().await.unwrap();

        let key = key(17);
        let size = 256 * 1024;
        store.put(&key, &vec![0u8; size]).await.unwrap();

        let mut tasks = Vec::new();
        for i in 1..=8u8 {
            let writer = store.clone();
            let write_key = key.clone();
            tasks.push(tokio::spawn(async move {
                writer.put(&write_key, &vec![i; size]).await.unwrap();
            }));
            let reader = store.clone();
            let read_key = key.clone();
            tasks.push(tokio::spawn(async move {
                if let Some(data) = reader.get(&read_key).await {
                    assert_eq!(data.len(), size);
                    assert!(data.iter().all(|b| *b == data[0]));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let data = store.get(&key).await.unwrap();
        assert_eq!(data.len(), size);
        assert!(data.iter().all(|b| *b == data[0]));
    }

    #[tokio::test]
    async fn test_clones_share_counters() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), HOUR);
        let other = store.clone();

        let key = key(18);
        store.put(&key, b"x").await.unwrap();
        other.get(&key).await.unwrap();

        assert_eq!(store.stats().writes, 1);
        assert_eq!(store.stats().hits, 1);
    }

    #[test]
    fn test_is_expired_boundaries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entry");
        std::fs::write(&path, b"x").unwrap();
        set_last_access(&path, 2 * HOUR);
        let metadata = std::fs::metadata(&path).unwrap();

        assert!(is_expired(&metadata, SystemTime::now(), HOUR));
        assert!(!is_expired(&metadata, SystemTime::now(), 3 * HOUR));
    }
}
