//! Cache of past epochs' indices. The current epoch's index lives in the
//! open state and never goes through here; past epochs are loaded lazily on
//! first read, bounded to the most-recently-used few, and expired by a
//! background worker once unused for long enough.

use crate::index::{PrimaryIndex, SecondaryEntry};
use chain_history::EpochNo;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How many past epochs to keep cached.
    pub max_past_epochs: usize,
    /// Evict entries unused for this long.
    pub expire_unused_after: Duration,
    /// How often the background worker looks for expired entries.
    pub expiry_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_past_epochs: 10,
            expire_unused_after: Duration::from_secs(60),
            expiry_interval: Duration::from_secs(5),
        }
    }
}

/// One past epoch's indices, shared read-only.
#[derive(Debug)]
pub(crate) struct CachedEpoch<H> {
    pub primary: Arc<PrimaryIndex>,
    pub entries: Arc<Vec<SecondaryEntry<H>>>,
}

impl<H> Clone for CachedEpoch<H> {
    fn clone(&self) -> Self {
        CachedEpoch {
            primary: Arc::clone(&self.primary),
            entries: Arc::clone(&self.entries),
        }
    }
}

struct Slot<H> {
    cached: CachedEpoch<H>,
    last_used: Instant,
}

struct Inner<H> {
    epochs: HashMap<EpochNo, Slot<H>>,
    shutdown: bool,
}

pub(crate) struct IndexCache<H> {
    config: CacheConfig,
    inner: Arc<(Mutex<Inner<H>>, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl<H: Send + Sync + 'static> IndexCache<H> {
    pub fn new(config: CacheConfig) -> Self {
        let inner = Arc::new((
            Mutex::new(Inner {
                epochs: HashMap::new(),
                shutdown: false,
            }),
            Condvar::new(),
        ));

        let worker_state = Arc::clone(&inner);
        let expire_after = config.expire_unused_after;
        let interval = config.expiry_interval;
        let worker = thread::Builder::new()
            .name("immutable-index-cache".into())
            .spawn(move || expiry_loop(worker_state, expire_after, interval))
            .expect("failed to spawn cache expiry thread");

        IndexCache {
            config,
            inner,
            worker: Some(worker),
        }
    }

    /// Look up an epoch, loading and caching it on a miss.
    pub fn get_or_load<E>(
        &self,
        epoch: EpochNo,
        load: impl FnOnce() -> Result<(PrimaryIndex, Vec<SecondaryEntry<H>>), E>,
    ) -> Result<CachedEpoch<H>, E> {
        {
            let mut guard = self.inner.0.lock();
            if let Some(slot) = guard.epochs.get_mut(&epoch) {
                slot.last_used = Instant::now();
                return Ok(slot.cached.clone());
            }
        }

        // Load outside the lock; concurrent loaders of the same epoch would
        // produce identical data.
        let (primary, entries) = load()?;
        let cached = CachedEpoch {
            primary: Arc::new(primary),
            entries: Arc::new(entries),
        };

        let mut guard = self.inner.0.lock();
        guard.epochs.insert(
            epoch,
            Slot {
                cached: cached.clone(),
                last_used: Instant::now(),
            },
        );
        let over = guard.epochs.len().saturating_sub(self.config.max_past_epochs);
        for _ in 0..over {
            if let Some(oldest) = guard
                .epochs
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(epoch, _)| *epoch)
            {
                guard.epochs.remove(&oldest);
                tracing::debug!(epoch = oldest.0, "cache evicted past epoch");
            }
        }
        Ok(cached)
    }

    /// Drop everything, e.g. after `delete_after` invalidated past epochs.
    pub fn restart(&self) {
        let mut guard = self.inner.0.lock();
        guard.epochs.clear();
    }
}

impl<H> Drop for IndexCache<H> {
    fn drop(&mut self) {
        {
            let mut guard = self.inner.0.lock();
            guard.shutdown = true;
        }
        self.inner.1.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn expiry_loop<H>(
    state: Arc<(Mutex<Inner<H>>, Condvar)>,
    expire_after: Duration,
    interval: Duration,
) {
    let (lock, signal) = &*state;
    let mut guard = lock.lock();
    loop {
        signal.wait_for(&mut guard, interval);
        if guard.shutdown {
            return;
        }
        let now = Instant::now();
        let expired: Vec<EpochNo> = guard
            .epochs
            .iter()
            .filter(|(_, slot)| now.duration_since(slot.last_used) >= expire_after)
            .map(|(epoch, _)| *epoch)
            .collect();
        for epoch in expired {
            guard.epochs.remove(&epoch);
            tracing::debug!(epoch = epoch.0, "cache expired past epoch");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::TestHash;
    use chain_history::EpochSize;

    fn payload() -> (PrimaryIndex, Vec<SecondaryEntry<TestHash>>) {
        (PrimaryIndex::empty(EpochSize(4)), Vec::new())
    }

    #[test]
    fn loads_once_and_bounds_the_population() {
        let cache: IndexCache<TestHash> = IndexCache::new(CacheConfig {
            max_past_epochs: 2,
            expire_unused_after: Duration::from_secs(3600),
            expiry_interval: Duration::from_secs(3600),
        });

        let mut loads = 0;
        for _ in 0..3 {
            cache
                .get_or_load(EpochNo(0), || -> Result<_, ()> {
                    loads += 1;
                    Ok(payload())
                })
                .unwrap();
        }
        assert_eq!(loads, 1);

        cache
            .get_or_load(EpochNo(1), || -> Result<_, ()> { Ok(payload()) })
            .unwrap();
        cache
            .get_or_load(EpochNo(2), || -> Result<_, ()> { Ok(payload()) })
            .unwrap();

        // Epoch 0 was the least recently used of the three.
        let mut reloaded = false;
        cache
            .get_or_load(EpochNo(0), || -> Result<_, ()> {
                reloaded = true;
                Ok(payload())
            })
            .unwrap();
        assert!(reloaded);
    }

    #[test]
    fn restart_empties_the_cache() {
        let cache: IndexCache<TestHash> = IndexCache::new(CacheConfig::default());
        cache
            .get_or_load(EpochNo(5), || -> Result<_, ()> { Ok(payload()) })
            .unwrap();
        cache.restart();

        let mut reloaded = false;
        cache
            .get_or_load(EpochNo(5), || -> Result<_, ()> {
                reloaded = true;
                Ok(payload())
            })
            .unwrap();
        assert!(reloaded);
    }

    #[test]
    fn failed_loads_are_not_cached() {
        let cache: IndexCache<TestHash> = IndexCache::new(CacheConfig::default());
        let missing = cache.get_or_load(EpochNo(9), || Err("disk trouble"));
        assert_eq!(missing.err(), Some("disk trouble"));

        let mut reloaded = false;
        cache
            .get_or_load(EpochNo(9), || -> Result<_, ()> {
                reloaded = true;
                Ok(payload())
            })
            .unwrap();
        assert!(reloaded);
    }
}
