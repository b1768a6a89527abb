//! Cache-first image processing pipeline
//!
//! A request is answered from the [`CacheStore`] when possible. On a miss the
//! source is fetched, transformed on the blocking pool, and written back.
//! Identical requests that miss together are serialized on a per-key lock and
//! the late arrivals are served from the entry the first one wrote.

use crate::error::Result;
use crate::fetcher::SourceFetcher;
use crate::transform::transform;
use image_cache::{CacheKey, CacheStore, ImageFormat, RequestDescriptor};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

type KeyLocks = Mutex<HashMap<CacheKey, Weak<tokio::sync::Mutex<()>>>>;

/// Whether a response came from disk or was computed for this request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// A processed image ready to be served
#[derive(Debug)]
pub struct Processed {
    pub data: Vec<u8>,
    pub format: ImageFormat,
    pub status: CacheStatus,
}

pub struct ImageProcessor {
    store: CacheStore,
    fetcher: Arc<dyn SourceFetcher>,
    locks: Arc<KeyLocks>,
}

impl ImageProcessor {
    pub fn new(store: CacheStore, fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self {
            store,
            fetcher,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub async fn process(&self, descriptor: &RequestDescriptor) -> Result<Processed> {
        let key = CacheKey::derive(descriptor);

        if let Some(data) = self.store.get(&key).await {
            return Ok(self.processed(data, descriptor, CacheStatus::Hit));
        }

        let _lock = KeyLock::acquire(&self.locks, &key).await;

        // Another request may have filled the entry while we waited
        if let Some(data) = self.store.recheck(&key).await {
            debug!(key = %key, "Served from a concurrent computation");
            return Ok(self.processed(data, descriptor, CacheStatus::Hit));
        }

        let source = self.fetcher.fetch(&descriptor.source_url).await?;

        let job = descriptor.clone();
        let data = tokio::task::spawn_blocking(move || transform(&source, &job)).await??;

        self.store.put(&key, &data).await?;
        info!(
            key = %key,
            url = %descriptor.source_url,
            size = data.len(),
            "Processed and cached image"
        );

        Ok(self.processed(data, descriptor, CacheStatus::Miss))
    }

    fn processed(
        &self,
        data: Vec<u8>,
        descriptor: &RequestDescriptor,
        status: CacheStatus,
    ) -> Processed {
        Processed {
            data,
            format: descriptor.format,
            status,
        }
    }

    #[cfg(test)]
    fn pending_keys(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Exclusive hold on one key; the map entry goes away with the last holder
struct KeyLock {
    locks: Arc<KeyLocks>,
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLock {
    async fn acquire(locks: &Arc<KeyLocks>, key: &CacheKey) -> Self {
        let lock = {
            let mut map = locks.lock().unwrap_or_else(|e| e.into_inner());
            match map.get(key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    map.insert(key.clone(), Arc::downgrade(&lock));
                    lock
                }
            }
        };

        // Built before awaiting so a cancelled waiter still cleans up
        let mut held = Self {
            locks: Arc::clone(locks),
            key: key.clone(),
            guard: None,
        };
        held.guard = Some(lock.lock_owned().await);
        held
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        self.guard.take();

        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if map
            .get(&self.key)
            .is_some_and(|lock| lock.strong_count() == 0)
        {
            map.remove(&self.key);
        }
    }
}
