//! In-process TTL cache that collapses concurrent fetches for a key.
//!
//! At most one fetch per key is in flight; later callers await the same
//! shared future. The fetch runs on its own task, so a caller that gives up
//! waiting does not cancel it for the others. When a fetch fails and an
//! expired value is still held, that value is served instead of the error.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::CacheError;

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, String>>>;

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub stale_served: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    stale_served: AtomicU64,
}

struct Inner<T> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    in_flight: Mutex<HashMap<String, (u64, SharedFetch<T>)>>,
    next_fetch_id: AtomicU64,
    counters: Counters,
}

/// Clears the in-flight marker when the fetch task ends, however it ends.
struct InFlightGuard<T> {
    inner: Arc<Inner<T>>,
    key: String,
    id: u64,
}

impl<T> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        if matches!(in_flight.get(&self.key), Some((id, _)) if *id == self.id) {
            in_flight.remove(&self.key);
        }
    }
}

pub struct CoalescingCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for CoalescingCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for CoalescingCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CoalescingCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// Fresh value for `key`, if any. Expiry is checked here, at read time.
    pub fn get(&self, key: &str) -> Option<T> {
        let entries = self.inner.entries.read();
        entries
            .get(key)
            .filter(|e| e.is_fresh(Instant::now()))
            .map(|e| e.value.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: T, ttl: Duration) {
        self.inner.entries.write().insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Return the cached value, or run `fetch` once for all concurrent callers.
    ///
    /// `fetch` is only invoked by the caller that starts the fetch. On failure
    /// the last value stored under `key` is returned even if it has expired;
    /// with nothing stored the failure is returned.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        if let Some(value) = self.get(key) {
            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        let pending = {
            let mut in_flight = self.inner.in_flight.lock();
            // A fetch may have completed between the read above and this lock.
            if let Some(value) = self.get(key) {
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }
            match in_flight.get(key) {
                Some((_, pending)) => {
                    self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "Joining in-flight fetch");
                    pending.clone()
                }
                None => {
                    self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                    let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                    let pending = self.spawn_fetch(key, id, ttl, fetch());
                    in_flight.insert(key.to_string(), (id, pending.clone()));
                    pending
                }
            }
        };

        match pending.await {
            Ok(value) => Ok(value),
            Err(message) => self.stale_or(key, message),
        }
    }

    fn spawn_fetch<Fut, E>(&self, key: &str, id: u64, ttl: Duration, fut: Fut) -> SharedFetch<T>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let guard = InFlightGuard {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            id,
        };

        let task = tokio::spawn(async move {
            let guard = guard;
            match fut.await {
                Ok(value) => {
                    // A fetch detached by `expire` or `invalidate` still answers
                    // its own waiters but must not overwrite the entry.
                    let in_flight = guard.inner.in_flight.lock();
                    if matches!(in_flight.get(&guard.key), Some((id, _)) if *id == guard.id) {
                        guard.inner.entries.write().insert(
                            guard.key.clone(),
                            CacheEntry {
                                value: value.clone(),
                                inserted_at: Instant::now(),
                                ttl,
                            },
                        );
                    } else {
                        debug!(key = %guard.key, "Discarding result of detached fetch");
                    }
                    drop(in_flight);
                    Ok(value)
                }
                Err(e) => Err(e.to_string()),
            }
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(format!("fetch task failed: {e}")),
            }
        }
        .boxed()
        .shared()
    }

    fn stale_or(&self, key: &str, message: String) -> Result<T, CacheError> {
        let stale = self.inner.entries.read().get(key).map(|e| e.value.clone());
        match stale {
            Some(value) => {
                self.inner.counters.stale_served.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %message, "Fetch failed, serving stale value");
                Ok(value)
            }
            None => Err(CacheError::Fetch {
                key: key.to_string(),
                message,
            }),
        }
    }

    /// Mark the value for `key` as expired without dropping it.
    ///
    /// The next `get_or_fetch` goes to the source, but the old value stays
    /// available as a stale fallback. A fetch already in flight is detached,
    /// so its result cannot land as fresh after this call.
    pub fn expire(&self, key: &str) -> bool {
        let mut in_flight = self.inner.in_flight.lock();
        in_flight.remove(key);
        let now = Instant::now();
        let mut entries = self.inner.entries.write();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.ttl = entry.ttl.min(now.saturating_duration_since(entry.inserted_at));
                true
            }
            None => false,
        }
    }

    /// Drop the value for `key` and detach any in-flight fetch.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut in_flight = self.inner.in_flight.lock();
        in_flight.remove(key);
        self.inner.entries.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut in_flight = self.inner.in_flight.lock();
        in_flight.clear();
        self.inner.entries.write().clear();
    }

    /// Drop entries that expired more than `retain_stale_for` ago.
    ///
    /// Expired entries are kept for a while so they can still stand in for a
    /// failed fetch. Returns the number removed.
    pub fn purge_expired(&self, retain_stale_for: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.inner.entries.write();
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.inserted_at) < e.ttl + retain_stale_for);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.in_flight.lock().contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            entries: self.len(),
            in_flight: self.inner.in_flight.lock().len(),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            stale_served: c.stale_served.load(Ordering::Relaxed),
        }
    }
}
