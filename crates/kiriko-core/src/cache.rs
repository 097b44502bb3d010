//! Client-side caches with explicit invalidation.
//!
//! Nothing here expires on a clock: every mutation that changes a cached
//! record (connect, disconnect, selection save, job completion) invalidates it
//! explicitly, and the next read re-fetches.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use kiriko_api::types::{ConnectionStatus, MediaFile, MediaStats};
use kiriko_api::ApiError;

/// A single cached value.
#[derive(Debug)]
pub struct Cached<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T: Clone> Cached<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peek(&self) -> Option<T> {
        self.slot.lock().expect("cache lock poisoned").clone()
    }

    pub fn put(&self, value: T) {
        *self.slot.lock().expect("cache lock poisoned") = Some(value);
    }

    pub fn invalidate(&self) {
        *self.slot.lock().expect("cache lock poisoned") = None;
    }

    /// Return the cached value, fetching and filling the cache on a miss.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        if let Some(value) = self.peek() {
            return Ok(value);
        }
        let value = fetch().await?;
        self.put(value.clone());
        Ok(value)
    }
}

/// Per-id media records plus a generation counter for listing consumers.
///
/// The generation bumps on any invalidation; a view holding listing results
/// re-queries when the generation it rendered no longer matches.
#[derive(Debug, Default)]
pub struct MediaCache {
    records: Mutex<HashMap<i64, MediaFile>>,
    generation: AtomicU64,
}

impl MediaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peek(&self, id: i64) -> Option<MediaFile> {
        self.records
            .lock()
            .expect("cache lock poisoned")
            .get(&id)
            .cloned()
    }

    pub async fn get_or_fetch<F, Fut>(&self, id: i64, fetch: F) -> Result<MediaFile, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<MediaFile, ApiError>>,
    {
        if let Some(record) = self.peek(id) {
            return Ok(record);
        }
        let record = fetch().await?;
        self.records
            .lock()
            .expect("cache lock poisoned")
            .insert(id, record.clone());
        Ok(record)
    }

    /// Drop one record, e.g. after a trim rewrote the file.
    pub fn invalidate(&self, id: i64) {
        self.records.lock().expect("cache lock poisoned").remove(&id);
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop everything, e.g. after a scan or sync changed the library.
    pub fn invalidate_all(&self) {
        self.records.lock().expect("cache lock poisoned").clear();
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }
}

/// The caches shared across the orchestration layer.
#[derive(Debug, Default)]
pub struct Caches {
    pub connection: Cached<ConnectionStatus>,
    pub stats: Cached<MediaStats>,
    pub media: MediaCache,
}

impl Caches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate everything derived from library contents. Called once per
    /// job-completion transition, never per poll tick.
    pub fn invalidate_listings(&self) {
        self.media.invalidate_all();
        self.stats.invalidate();
    }
}
