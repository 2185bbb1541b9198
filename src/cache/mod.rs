//! Fingerprint-keyed result cache with single-flight computation.
//!
//! At most one computation runs per fingerprint. Callers arriving while it
//! runs subscribe to its outcome instead of starting their own. Failures are
//! never cached: the slot is cleared and every subscriber receives the same
//! error.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::canonical::Fingerprint;
use crate::config::CacheConfig;
use crate::error::{AnalysisError, AnalysisResult};

type Outcome<V> = Option<Result<Arc<V>, AnalysisError>>;

struct ReadyEntry<V> {
    value: Arc<V>,
    created_at: Instant,
    hits: u64,
    last_access: Instant,
}

enum Slot<V> {
    Ready(ReadyEntry<V>),
    InFlight {
        id: u64,
        rx: watch::Receiver<Outcome<V>>,
    },
}

/// Counters and occupancy reported by [`ResultCache::stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub in_flight: usize,
}

enum Action<V> {
    Wait {
        id: u64,
        rx: watch::Receiver<Outcome<V>>,
    },
    Compute {
        id: u64,
        tx: watch::Sender<Outcome<V>>,
    },
}

/// Sharded cache of shared, immutable values.
pub struct ResultCache<V> {
    shards: Vec<Mutex<HashMap<Fingerprint, Slot<V>>>>,
    ttl: Duration,
    capacity: usize,
    next_id: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V> ResultCache<V> {
    /// Create a cache sized from configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let shards = config.shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
            ttl: Duration::from_secs(config.ttl_secs),
            capacity: config.capacity.max(1),
            next_id: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn shard_index(&self, fingerprint: &Fingerprint) -> usize {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&fingerprint.as_bytes()[..8]);
        (u64::from_le_bytes(prefix) % self.shards.len() as u64) as usize
    }

    fn lock_shard(&self, index: usize) -> MutexGuard<'_, HashMap<Fingerprint, Slot<V>>> {
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn shard(&self, fingerprint: &Fingerprint) -> MutexGuard<'_, HashMap<Fingerprint, Slot<V>>> {
        self.lock_shard(self.shard_index(fingerprint))
    }

    fn is_expired(&self, entry: &ReadyEntry<V>, now: Instant) -> bool {
        now.duration_since(entry.created_at) >= self.ttl
    }

    /// Return the cached value for `fingerprint`, or run `compute` exactly
    /// once across all concurrent callers for it.
    pub async fn get_or_compute<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        compute: F,
    ) -> AnalysisResult<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AnalysisResult<V>>,
    {
        let mut compute = Some(compute);

        loop {
            let action = {
                let now = Instant::now();
                let mut shard = self.shard(&fingerprint);
                let waiting = match shard.get_mut(&fingerprint) {
                    Some(Slot::Ready(entry)) if !self.is_expired(entry, now) => {
                        entry.hits += 1;
                        entry.last_access = now;
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(Arc::clone(&entry.value));
                    }
                    Some(Slot::InFlight { id, rx }) => Some(Action::Wait {
                        id: *id,
                        rx: rx.clone(),
                    }),
                    Some(Slot::Ready(_)) => {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                        debug!(fingerprint = %fingerprint, "Cache entry expired");
                        None
                    }
                    None => None,
                };
                match waiting {
                    Some(action) => action,
                    None => {
                        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                        let (tx, rx) = watch::channel(None);
                        shard.insert(fingerprint, Slot::InFlight { id, rx });
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        Action::Compute { id, tx }
                    }
                }
            };

            match action {
                Action::Wait { id, mut rx } => {
                    debug!(fingerprint = %fingerprint, "Joining in-flight computation");
                    let outcome = rx.wait_for(Option::is_some).await.ok().and_then(|v| v.clone());
                    match outcome {
                        Some(Ok(value)) => {
                            self.hits.fetch_add(1, Ordering::Relaxed);
                            return Ok(value);
                        }
                        Some(Err(e)) => return Err(e),
                        None => {
                            let err = AnalysisError::CacheInconsistency {
                                message: format!(
                                    "in-flight computation for {} ended without an outcome",
                                    fingerprint
                                ),
                            };
                            warn!(fingerprint = %fingerprint, error = %err, "Restarting cache lookup");
                            self.remove_in_flight(&fingerprint, id);
                        }
                    }
                }
                Action::Compute { id, tx } => {
                    let Some(compute) = compute.take() else {
                        return Err(AnalysisError::CacheInconsistency {
                            message: "computation requested twice".to_string(),
                        });
                    };
                    let guard = InFlightGuard {
                        cache: self,
                        fingerprint,
                        id,
                        tx: Some(tx),
                    };
                    return match compute().await {
                        Ok(value) => {
                            let value = Arc::new(value);
                            guard.succeed(Arc::clone(&value));
                            self.enforce_capacity();
                            Ok(value)
                        }
                        Err(e) => {
                            guard.fail(e.clone());
                            Err(e)
                        }
                    };
                }
            }
        }
    }

    fn remove_in_flight(&self, fingerprint: &Fingerprint, id: u64) {
        let mut shard = self.shard(fingerprint);
        if matches!(shard.get(fingerprint), Some(Slot::InFlight { id: current, .. }) if *current == id)
        {
            shard.remove(fingerprint);
        }
    }

    /// Drop expired entries, then evict least-recently-used entries until
    /// the cache is within capacity. Equal access times evict the entry with
    /// fewer hits first.
    fn enforce_capacity(&self) {
        loop {
            let now = Instant::now();
            let mut ready = 0usize;
            let mut candidates = Vec::new();

            for index in 0..self.shards.len() {
                let mut shard = self.lock_shard(index);
                let before = shard.len();
                shard.retain(|_, slot| match slot {
                    Slot::Ready(entry) => !self.is_expired(entry, now),
                    Slot::InFlight { .. } => true,
                });
                let expired = before - shard.len();
                if expired > 0 {
                    self.evictions.fetch_add(expired as u64, Ordering::Relaxed);
                }
                for (fp, slot) in shard.iter() {
                    if let Slot::Ready(entry) = slot {
                        ready += 1;
                        candidates.push((*fp, entry.last_access, entry.hits));
                    }
                }
            }

            if ready <= self.capacity {
                return;
            }
            let Some(victim) = pick_victim(candidates) else {
                return;
            };

            let mut shard = self.shard(&victim);
            if matches!(shard.get(&victim), Some(Slot::Ready(_))) {
                shard.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %victim, "Evicted least recently used entry");
            }
        }
    }

    /// Remove a completed entry. In-flight computations are left alone.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        let mut shard = self.shard(fingerprint);
        if matches!(shard.get(fingerprint), Some(Slot::Ready(_))) {
            shard.remove(fingerprint);
            true
        } else {
            false
        }
    }

    /// Remove every completed entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        for index in 0..self.shards.len() {
            let mut shard = self.lock_shard(index);
            let before = shard.len();
            shard.retain(|_, slot| matches!(slot, Slot::InFlight { .. }));
            removed += before - shard.len();
        }
        removed
    }

    /// Live (unexpired) value for `fingerprint` without computing.
    pub fn peek(&self, fingerprint: &Fingerprint) -> Option<Arc<V>> {
        let now = Instant::now();
        match self.shard(fingerprint).get(fingerprint) {
            Some(Slot::Ready(entry)) if !self.is_expired(entry, now) => {
                Some(Arc::clone(&entry.value))
            }
            _ => None,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            ..Default::default()
        };
        for index in 0..self.shards.len() {
            for slot in self.lock_shard(index).values() {
                match slot {
                    Slot::Ready(_) => stats.entries += 1,
                    Slot::InFlight { .. } => stats.in_flight += 1,
                }
            }
        }
        stats
    }
}

/// Least recently used candidate, lower hit count first on ties.
fn pick_victim(candidates: Vec<(Fingerprint, Instant, u64)>) -> Option<Fingerprint> {
    candidates
        .into_iter()
        .min_by(|a, b| (a.1, a.2, a.0).cmp(&(b.1, b.2, b.0)))
        .map(|(fp, _, _)| fp)
}

/// Owns an in-flight slot. Dropping it without an outcome (the computing
/// future was cancelled) resolves every waiter with `Cancelled` and frees
/// the slot.
struct InFlightGuard<'a, V> {
    cache: &'a ResultCache<V>,
    fingerprint: Fingerprint,
    id: u64,
    tx: Option<watch::Sender<Outcome<V>>>,
}

impl<V> InFlightGuard<'_, V> {
    fn succeed(mut self, value: Arc<V>) {
        {
            let mut shard = self.cache.shard(&self.fingerprint);
            let owned = matches!(
                shard.get(&self.fingerprint),
                Some(Slot::InFlight { id, .. }) if *id == self.id
            );
            if owned {
                let now = Instant::now();
                shard.insert(
                    self.fingerprint,
                    Slot::Ready(ReadyEntry {
                        value: Arc::clone(&value),
                        created_at: now,
                        hits: 0,
                        last_access: now,
                    }),
                );
            }
        }
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(Ok(value)));
        }
    }

    fn fail(mut self, error: AnalysisError) {
        self.resolve_err(error);
    }

    fn resolve_err(&mut self, error: AnalysisError) {
        if let Some(tx) = self.tx.take() {
            self.cache.remove_in_flight(&self.fingerprint, self.id);
            tx.send_replace(Some(Err(error)));
        }
    }
}

impl<V> Drop for InFlightGuard<'_, V> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(fingerprint = %self.fingerprint, "In-flight computation cancelled");
            self.resolve_err(AnalysisError::Cancelled);
        }
    }
}
