//! # Route Cache
//!
//! Bounded store of resolved routes keyed by [`RouteFingerprint`].
//!
//! ## Expiry
//!
//! Every entry carries an absolute `expires_at`. A lookup at or after that
//! instant behaves exactly like a missing entry. Stale entries are dropped by
//! [`RouteCache::remove_expired`] (run by the maintenance task) or when an
//! insert finds the cache full.
//!
//! ## Eviction
//!
//! Only runs when an insert would exceed `max_entries`. Expired entries go
//! first; after that the configured [`EvictionPolicy`] picks the victim. The
//! default ranks by access count and breaks ties by evicting the oldest
//! entry, so a commuter's daily route outlives one-off queries.
//!
//! ## Locking
//!
//! One `RwLock` guards the entry map. Lookups take the shared lock and bump
//! per-entry atomics, so concurrent readers never serialize. Inserts,
//! eviction, sweeps and `clear` take the exclusive lock. Nothing here awaits
//! or calls out while holding either lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::persistence::{CacheSnapshot, PersistenceError, PersistenceStore, SnapshotEntry, SNAPSHOT_VERSION};
use crate::{Clock, GeoPoint, RouteFingerprint, RoutePayload};

/// How the victim is chosen when the cache is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Fewest accesses first; ties evict the oldest entry.
    #[default]
    LeastFrequent,
    /// Like `LeastFrequent`, but an entry's count halves for every
    /// `half_life_secs` since its last access, so an early burst of hits
    /// cannot pin an entry forever.
    DecayingFrequency { half_life_secs: u64 },
    /// Pure insertion order. Lower fidelity: ignores how often a route is reused.
    OldestInserted,
}

/// Configuration for a [`RouteCache`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of stored entries. 0 disables caching.
    /// Default: 500
    pub max_entries: usize,
    /// TTL applied by [`RouteCache::insert`].
    /// Default: 86400 (24 hours)
    pub default_ttl_secs: u64,
    /// Victim selection when full.
    /// Default: LeastFrequent
    pub eviction: EvictionPolicy,
    /// How many entries [`RouteCache::metrics`] reports in `top_entries`.
    /// Default: 5
    pub top_entries: usize,
    /// Keys removed per exclusive-lock acquisition during a sweep.
    /// Default: 256
    pub sweep_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            default_ttl_secs: 24 * 60 * 60,
            eviction: EvictionPolicy::LeastFrequent,
            top_entries: 5,
            sweep_batch_size: 256,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// A stored route with its usage counters. Owned by the cache.
#[derive(Debug)]
pub struct CacheEntry {
    key: RouteFingerprint,
    payload: Arc<RoutePayload>,
    created_at: u64,
    expires_at: u64,
    access_count: AtomicU64,
    last_access_at: AtomicU64,
}

impl CacheEntry {
    fn new(
        key: RouteFingerprint,
        payload: Arc<RoutePayload>,
        created_at: u64,
        expires_at: u64,
        access_count: u64,
        last_access_at: u64,
    ) -> Self {
        Self {
            key,
            payload,
            created_at,
            expires_at,
            access_count: AtomicU64::new(access_count),
            last_access_at: AtomicU64::new(last_access_at),
        }
    }

    pub fn key(&self) -> RouteFingerprint {
        self.key
    }

    pub fn payload(&self) -> &Arc<RoutePayload> {
        &self.payload
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn last_access_at(&self) -> u64 {
        self.last_access_at.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    fn touch(&self, now: u64) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.last_access_at.fetch_max(now, Ordering::Relaxed);
    }

    /// Effective frequency under `policy`, used to rank eviction candidates.
    fn score(&self, policy: EvictionPolicy, now: u64) -> f64 {
        match policy {
            EvictionPolicy::LeastFrequent => self.access_count() as f64,
            EvictionPolicy::DecayingFrequency { half_life_secs } => {
                let half_life_ms = half_life_secs.saturating_mul(1000).max(1) as f64;
                let idle_ms = now.saturating_sub(self.last_access_at()) as f64;
                self.access_count() as f64 * 0.5f64.powf(idle_ms / half_life_ms)
            }
            EvictionPolicy::OldestInserted => 0.0,
        }
    }

    fn to_snapshot(&self) -> SnapshotEntry {
        SnapshotEntry {
            key: self.key,
            payload: (*self.payload).clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            access_count: self.access_count(),
            last_access_at: self.last_access_at(),
        }
    }
}

/// One row of the metrics leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopEntry {
    pub key: String,
    pub access_count: u64,
}

/// Read-only observability view of the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// Hit percentage, 0-100
    pub hit_rate: f64,
    /// Live (unexpired) entries
    pub cached_count: usize,
    pub max_size: usize,
    /// Most accessed live entries, highest first
    pub top_entries: Vec<TopEntry>,
}

/// Bounded TTL cache of route payloads.
///
/// Construct one per process (or per tier) and share it by `Arc`.
pub struct RouteCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<RouteFingerprint, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    persistence: Option<Arc<dyn PersistenceStore>>,
}

impl std::fmt::Debug for RouteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteCache")
            .field("config", &self.config)
            .field("len", &self.len())
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}

impl RouteCache {
    /// In-memory cache (server tier).
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            persistence: None,
        }
    }

    /// Cache backed by a durable store (client tier). Restores the last saved
    /// snapshot; any load failure is logged and the cache starts empty.
    pub fn with_persistence(
        config: CacheConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn PersistenceStore>,
    ) -> Self {
        let mut cache = Self::new(config, clock);
        cache.persistence = Some(store);
        match cache.load() {
            Ok(restored) => info!("[RouteCache] Restored {} entries from persistence", restored),
            Err(e) => {
                warn!("[RouteCache] Could not restore snapshot, starting empty: {}", e);
                cache.clear();
            }
        }
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    /// Look up the route for an origin/destination pair.
    pub fn get(&self, origin: GeoPoint, dest: GeoPoint) -> Option<Arc<RoutePayload>> {
        self.get_key(&RouteFingerprint::new(origin, dest))
    }

    /// Look up by a precomputed fingerprint. Expired entries count as misses.
    pub fn get_key(&self, key: &RouteFingerprint) -> Option<Arc<RoutePayload>> {
        let now = self.clock.now_millis();
        let entries = self.read();

        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.touch(now);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.payload))
            }
            stale => {
                if stale.is_some() {
                    debug!("[RouteCache] Stale entry {}", key);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // Inserts
    // ------------------------------------------------------------------------

    /// Store a route with the default TTL.
    pub fn insert(&self, origin: GeoPoint, dest: GeoPoint, payload: RoutePayload) -> Arc<RoutePayload> {
        self.set(origin, dest, payload, self.config.default_ttl())
    }

    /// Store a route with an explicit TTL.
    pub fn set(
        &self,
        origin: GeoPoint,
        dest: GeoPoint,
        payload: RoutePayload,
        ttl: Duration,
    ) -> Arc<RoutePayload> {
        self.set_key(RouteFingerprint::new(origin, dest), payload, ttl)
    }

    /// Store under a precomputed fingerprint.
    ///
    /// An existing entry for `key` is replaced by a fresh entry; its access
    /// history carries over so refreshing a hot route does not make it an
    /// eviction candidate. Returns the stored payload.
    pub fn set_key(&self, key: RouteFingerprint, payload: RoutePayload, ttl: Duration) -> Arc<RoutePayload> {
        let payload = Arc::new(payload);
        if self.config.max_entries == 0 {
            return payload;
        }

        let now = self.clock.now_millis();
        let expires_at = now.saturating_add(ttl.as_millis() as u64);

        let mut entries = self.write();
        let (access_count, last_access_at) = match entries.get(&key) {
            Some(old) => (old.access_count(), old.last_access_at()),
            None => {
                if entries.len() >= self.config.max_entries {
                    self.make_room(&mut entries, now, self.config.max_entries - 1);
                }
                (0, now)
            }
        };

        entries.insert(
            key,
            CacheEntry::new(key, Arc::clone(&payload), now, expires_at, access_count, last_access_at),
        );
        payload
    }

    /// Evict until at most `target` entries remain: expired ones first, then by policy.
    fn make_room(&self, entries: &mut HashMap<RouteFingerprint, CacheEntry>, now: u64, target: usize) {
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let purged = before - entries.len();
        if purged > 0 {
            debug!("[RouteCache] Purged {} expired entries to make room", purged);
        }

        while entries.len() > target {
            let Some(victim) = self.pick_victim(entries, now) else {
                break;
            };
            if let Some(evicted) = entries.remove(&victim) {
                debug!(
                    "[RouteCache] Evicted {} (access_count={}, created_at={})",
                    victim,
                    evicted.access_count(),
                    evicted.created_at
                );
            }
        }
    }

    fn pick_victim(
        &self,
        entries: &HashMap<RouteFingerprint, CacheEntry>,
        now: u64,
    ) -> Option<RouteFingerprint> {
        let policy = self.config.eviction;
        entries
            .values()
            .min_by(|a, b| {
                a.score(policy, now)
                    .total_cmp(&b.score(policy, now))
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.key.cmp(&b.key))
            })
            .map(|e| e.key)
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Drop expired entries, taking the exclusive lock once per
    /// `sweep_batch_size` keys. Returns how many were removed.
    pub fn remove_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let expired: Vec<RouteFingerprint> = {
            let entries = self.read();
            entries
                .values()
                .filter(|e| e.is_expired(now))
                .map(|e| e.key)
                .collect()
        };

        let mut removed = 0;
        for batch in expired.chunks(self.config.sweep_batch_size.max(1)) {
            let mut entries = self.write();
            for key in batch {
                // May have been refreshed since the scan
                if entries.get(key).is_some_and(|e| e.is_expired(now)) {
                    entries.remove(key);
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            debug!("[RouteCache] Swept {} expired entries", removed);
        }
        removed
    }

    /// Remove every entry and reset the hit/miss counters.
    pub fn clear(&self) {
        let mut entries = self.write();
        entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Stored entries, including any expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------------------

    /// Snapshot of counters and the most used entries. Does not touch any entry.
    pub fn metrics(&self) -> CacheMetrics {
        let now = self.clock.now_millis();
        let entries = self.read();

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 * 100.0 / total as f64
        } else {
            0.0
        };

        let mut live: Vec<&CacheEntry> = entries.values().filter(|e| !e.is_expired(now)).collect();
        let cached_count = live.len();
        live.sort_by(|a, b| {
            b.access_count()
                .cmp(&a.access_count())
                .then(a.key.cmp(&b.key))
        });

        let top_entries = live
            .into_iter()
            .take(self.config.top_entries)
            .map(|e| TopEntry {
                key: e.key.to_string(),
                access_count: e.access_count(),
            })
            .collect();

        CacheMetrics {
            hits,
            misses,
            hit_rate,
            cached_count,
            max_size: self.config.max_entries,
            top_entries,
        }
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Capture live entries and counters.
    pub fn snapshot(&self) -> CacheSnapshot {
        let now = self.clock.now_millis();
        let entries = self.read();
        CacheSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: now,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries
                .values()
                .filter(|e| !e.is_expired(now))
                .map(CacheEntry::to_snapshot)
                .collect(),
        }
    }

    /// Replace the cache contents with `snapshot`. Entries that expired while
    /// persisted are skipped; if the snapshot holds more than `max_entries`,
    /// the eviction policy trims it. Returns the number of entries kept.
    pub fn restore(&self, snapshot: CacheSnapshot) -> usize {
        let now = self.clock.now_millis();
        let mut entries = self.write();
        entries.clear();

        for e in snapshot.entries {
            if now >= e.expires_at {
                continue;
            }
            entries.insert(
                e.key,
                CacheEntry::new(
                    e.key,
                    Arc::new(e.payload),
                    e.created_at,
                    e.expires_at,
                    e.access_count,
                    e.last_access_at,
                ),
            );
        }
        if entries.len() > self.config.max_entries {
            self.make_room(&mut entries, now, self.config.max_entries);
        }

        self.hits.store(snapshot.hits, Ordering::Relaxed);
        self.misses.store(snapshot.misses, Ordering::Relaxed);
        entries.len()
    }

    /// Load the snapshot from the configured store. No store or no saved
    /// state leaves the cache untouched and returns 0.
    pub fn load(&self) -> Result<usize, PersistenceError> {
        let Some(store) = &self.persistence else {
            return Ok(0);
        };
        match store.load()? {
            Some(bytes) => Ok(self.restore(CacheSnapshot::from_bytes(&bytes)?)),
            None => Ok(0),
        }
    }

    /// Write the current snapshot to the configured store. Serialization and
    /// I/O happen after the lock is released.
    pub fn flush(&self) -> Result<(), PersistenceError> {
        let Some(store) = &self.persistence else {
            return Ok(());
        };
        let snapshot = self.snapshot();
        let count = snapshot.entries.len();
        store.save(&snapshot.to_bytes()?)?;
        debug!("[RouteCache] Flushed {} entries", count);
        Ok(())
    }

    /// [`flush`](Self::flush), logging instead of returning failures.
    pub fn flush_or_skip(&self) -> bool {
        match self.flush() {
            Ok(()) => true,
            Err(e) => {
                warn!("[RouteCache] Skipping flush: {}", e);
                false
            }
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }

    // A panic while holding the lock cannot leave the map half-updated
    // (every mutation is a single HashMap call), so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<RouteFingerprint, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<RouteFingerprint, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use crate::{ManualClock, Polyline, RouteSource, SystemClock};

    const START: u64 = 1_700_000_000_000;

    fn payload(tag: f64) -> RoutePayload {
        RoutePayload::new(
            Polyline::new(vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(tag, tag)]),
            tag * 1000.0,
            tag as u32,
            RouteSource::Engine,
        )
    }

    fn dest_for(i: usize) -> GeoPoint {
        GeoPoint::new(-33.40 - i as f64 * 0.01, -70.60)
    }

    fn origin() -> GeoPoint {
        GeoPoint::new(-33.4372, -70.6506)
    }

    fn cache_with(max_entries: usize, eviction: EvictionPolicy) -> (RouteCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let config = CacheConfig {
            max_entries,
            eviction,
            ..CacheConfig::default()
        };
        (RouteCache::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_default_eviction_is_least_frequent() {
        assert_eq!(EvictionPolicy::default(), EvictionPolicy::LeastFrequent);

        let config: CacheConfig = serde_json::from_str(r#"{"max_entries": 50}"#).unwrap();
        assert_eq!(config.max_entries, 50);
        assert_eq!(config.eviction, EvictionPolicy::LeastFrequent);

        let decaying: EvictionPolicy =
            serde_json::from_str(r#"{"type": "decaying_frequency", "half_life_secs": 600}"#).unwrap();
        assert_eq!(decaying, EvictionPolicy::DecayingFrequency { half_life_secs: 600 });
    }

    #[test]
    fn test_miss_then_hit_updates_counters() {
        let (cache, _) = cache_with(10, EvictionPolicy::LeastFrequent);
        assert!(cache.get(origin(), dest_for(0)).is_none());

        cache.insert(origin(), dest_for(0), payload(1.0));
        let hit = cache.get(origin(), dest_for(0)).unwrap();
        assert_eq!(hit.distance_meters, 1000.0);

        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hit_rate, 50.0);
        assert_eq!(metrics.cached_count, 1);
        assert_eq!(metrics.max_size, 10);
    }

    #[test]
    fn test_hit_tracks_access_count_and_time() {
        let (cache, clock) = cache_with(10, EvictionPolicy::LeastFrequent);
        cache.insert(origin(), dest_for(0), payload(1.0));
        clock.advance(Duration::from_secs(5));
        cache.get(origin(), dest_for(0));
        cache.get(origin(), dest_for(0));

        let key = RouteFingerprint::new(origin(), dest_for(0));
        let entries = cache.read();
        let entry = entries.get(&key).unwrap();
        assert_eq!(entry.access_count(), 2);
        assert_eq!(entry.last_access_at(), START + 5_000);
        assert_eq!(entry.created_at(), START);
    }

    #[test]
    fn test_entry_expires_at_ttl() {
        let (cache, clock) = cache_with(10, EvictionPolicy::LeastFrequent);
        cache.set(origin(), dest_for(0), payload(1.0), Duration::from_secs(1));

        clock.advance(Duration::from_millis(999));
        assert!(cache.get(origin(), dest_for(0)).is_some());

        clock.advance(Duration::from_millis(1));
        assert!(cache.get(origin(), dest_for(0)).is_none());
        assert_eq!(cache.metrics().cached_count, 0);
    }

    #[test]
    fn test_ttl_with_wall_clock() {
        let cache = RouteCache::new(CacheConfig::default(), Arc::new(SystemClock));
        cache.set(origin(), dest_for(0), payload(1.0), Duration::from_secs(1));
        assert!(cache.get(origin(), dest_for(0)).is_some());

        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get(origin(), dest_for(0)).is_none());
    }

    #[test]
    fn test_set_replaces_existing_entry() {
        let (cache, _) = cache_with(10, EvictionPolicy::LeastFrequent);
        cache.insert(origin(), dest_for(0), payload(1.0));
        cache.get(origin(), dest_for(0));
        cache.insert(origin(), dest_for(0), payload(2.0));

        assert_eq!(cache.len(), 1);
        let current = cache.get(origin(), dest_for(0)).unwrap();
        assert_eq!(current.distance_meters, 2000.0);
        // access history carried over from the replaced entry, plus this hit
        assert_eq!(cache.metrics().top_entries[0].access_count, 2);
    }

    #[test]
    fn test_eviction_keeps_frequently_accessed_entry() {
        let (cache, clock) = cache_with(5, EvictionPolicy::LeastFrequent);
        for i in 0..5 {
            cache.insert(origin(), dest_for(i), payload(i as f64));
            clock.advance(Duration::from_millis(10));
        }

        // Oldest entry is the hot one
        for _ in 0..7 {
            assert!(cache.get(origin(), dest_for(0)).is_some());
        }

        cache.insert(origin(), dest_for(5), payload(5.0));
        assert_eq!(cache.len(), 5);
        assert!(cache.get(origin(), dest_for(0)).is_some());
        assert!(cache.get(origin(), dest_for(5)).is_some());
        // dest 1 was the oldest among the never-accessed entries
        assert!(cache.get(origin(), dest_for(1)).is_none());
    }

    #[test]
    fn test_eviction_tie_breaks_on_oldest() {
        let (cache, clock) = cache_with(3, EvictionPolicy::LeastFrequent);
        for i in 0..3 {
            cache.insert(origin(), dest_for(i), payload(i as f64));
            clock.advance(Duration::from_millis(10));
        }
        for i in 0..3 {
            cache.get(origin(), dest_for(i));
        }

        cache.insert(origin(), dest_for(3), payload(3.0));
        assert!(cache.get(origin(), dest_for(0)).is_none());
        assert!(cache.get(origin(), dest_for(1)).is_some());
        assert!(cache.get(origin(), dest_for(2)).is_some());
    }

    #[test]
    fn test_expired_entries_are_evicted_first() {
        let (cache, clock) = cache_with(3, EvictionPolicy::LeastFrequent);
        cache.set(origin(), dest_for(0), payload(0.0), Duration::from_secs(3600));
        cache.set(origin(), dest_for(1), payload(1.0), Duration::from_secs(1));
        cache.set(origin(), dest_for(2), payload(2.0), Duration::from_secs(3600));
        // make the short-lived one the most popular
        for _ in 0..5 {
            cache.get(origin(), dest_for(1));
        }

        clock.advance(Duration::from_secs(2));
        cache.insert(origin(), dest_for(3), payload(3.0));

        assert_eq!(cache.len(), 3);
        assert!(cache.get(origin(), dest_for(0)).is_some());
        assert!(cache.get(origin(), dest_for(2)).is_some());
        assert!(cache.get(origin(), dest_for(3)).is_some());
    }

    #[test]
    fn test_oldest_inserted_policy_ignores_frequency() {
        let (cache, clock) = cache_with(2, EvictionPolicy::OldestInserted);
        cache.insert(origin(), dest_for(0), payload(0.0));
        clock.advance(Duration::from_millis(10));
        cache.insert(origin(), dest_for(1), payload(1.0));
        for _ in 0..10 {
            cache.get(origin(), dest_for(0));
        }

        cache.insert(origin(), dest_for(2), payload(2.0));
        assert!(cache.get(origin(), dest_for(0)).is_none());
        assert!(cache.get(origin(), dest_for(1)).is_some());
    }

    #[test]
    fn test_decaying_frequency_releases_stale_hot_entry() {
        let (cache, clock) = cache_with(2, EvictionPolicy::DecayingFrequency { half_life_secs: 60 });
        cache.insert(origin(), dest_for(0), payload(0.0));
        for _ in 0..8 {
            cache.get(origin(), dest_for(0));
        }
        clock.advance(Duration::from_millis(10));
        cache.insert(origin(), dest_for(1), payload(1.0));

        // ten half-lives later dest 0 scores 8/1024, dest 1 scores 2
        clock.advance(Duration::from_secs(600));
        cache.get(origin(), dest_for(1));
        cache.get(origin(), dest_for(1));

        cache.insert(origin(), dest_for(2), payload(2.0));
        assert!(cache.get(origin(), dest_for(0)).is_none());
        assert!(cache.get(origin(), dest_for(1)).is_some());
    }

    #[test]
    fn test_zero_capacity_disables_storage() {
        let (cache, _) = cache_with(0, EvictionPolicy::LeastFrequent);
        let stored = cache.insert(origin(), dest_for(0), payload(1.0));
        assert_eq!(stored.distance_meters, 1000.0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_metrics_do_not_mutate() {
        let (cache, _) = cache_with(10, EvictionPolicy::LeastFrequent);
        cache.insert(origin(), dest_for(0), payload(0.0));
        let first = cache.metrics();
        let second = cache.metrics();
        assert_eq!(first, second);
        assert_eq!(first.hits, 0);
        assert_eq!(first.top_entries[0].access_count, 0);
    }

    #[test]
    fn test_top_entries_ordered_by_access_count() {
        let clock = Arc::new(ManualClock::new(START));
        let config = CacheConfig {
            top_entries: 2,
            ..CacheConfig::default()
        };
        let cache = RouteCache::new(config, clock);
        for i in 0..4 {
            cache.insert(origin(), dest_for(i), payload(i as f64));
            for _ in 0..i {
                cache.get(origin(), dest_for(i));
            }
        }

        let top = cache.metrics().top_entries;
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].access_count, 3);
        assert_eq!(top[0].key, RouteFingerprint::new(origin(), dest_for(3)).to_string());
        assert_eq!(top[1].access_count, 2);
    }

    #[test]
    fn test_metrics_serialize_camel_case() {
        let (cache, _) = cache_with(10, EvictionPolicy::LeastFrequent);
        let json = serde_json::to_value(cache.metrics()).unwrap();
        assert!(json.get("hitRate").is_some());
        assert!(json.get("cachedCount").is_some());
        assert!(json.get("maxSize").is_some());
        assert!(json.get("topEntries").is_some());
    }

    #[test]
    fn test_clear_resets_everything() {
        let (cache, _) = cache_with(10, EvictionPolicy::LeastFrequent);
        cache.insert(origin(), dest_for(0), payload(0.0));
        cache.get(origin(), dest_for(0));
        cache.get(origin(), dest_for(1));

        cache.clear();
        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 0);
        assert_eq!(metrics.misses, 0);
        assert_eq!(metrics.cached_count, 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_expired_in_batches() {
        let clock = Arc::new(ManualClock::new(START));
        let config = CacheConfig {
            sweep_batch_size: 3,
            ..CacheConfig::default()
        };
        let cache = RouteCache::new(config, clock.clone());
        for i in 0..10 {
            let ttl = if i % 2 == 0 { 1 } else { 3600 };
            cache.set(origin(), dest_for(i), payload(i as f64), Duration::from_secs(ttl));
        }

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.remove_expired(), 5);
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.remove_expired(), 0);
    }

    #[test]
    fn test_snapshot_restore_across_instances() {
        let store = Arc::new(MemoryPersistence::new());
        let clock = Arc::new(ManualClock::new(START));

        let first = RouteCache::with_persistence(CacheConfig::default(), clock.clone(), store.clone());
        first.insert(origin(), dest_for(0), payload(1.0));
        first.get(origin(), dest_for(0));
        first.set(origin(), dest_for(1), payload(2.0), Duration::from_secs(1));
        first.flush().unwrap();

        clock.advance(Duration::from_secs(5));
        let second = RouteCache::with_persistence(CacheConfig::default(), clock.clone(), store);
        // the 1-second entry expired while persisted
        assert_eq!(second.len(), 1);
        assert_eq!(second.metrics().hits, 1);
        let restored = second.get(origin(), dest_for(0)).unwrap();
        assert_eq!(restored.distance_meters, 1000.0);
        assert_eq!(second.metrics().top_entries[0].access_count, 2);
    }

    #[test]
    fn test_restore_trims_to_capacity() {
        let (big, clock) = cache_with(10, EvictionPolicy::LeastFrequent);
        for i in 0..6 {
            big.insert(origin(), dest_for(i), payload(i as f64));
            clock.advance(Duration::from_millis(1));
        }
        big.get(origin(), dest_for(0));
        let snapshot = big.snapshot();

        let small = RouteCache::new(
            CacheConfig {
                max_entries: 3,
                ..CacheConfig::default()
            },
            clock,
        );
        assert_eq!(small.restore(snapshot), 3);
        assert!(small.get(origin(), dest_for(0)).is_some());
        assert!(small.get(origin(), dest_for(5)).is_some());
    }

    #[test]
    fn test_corrupt_persistence_starts_empty() {
        let store = Arc::new(MemoryPersistence::with_state(b"{ truncated".to_vec()));
        let cache = RouteCache::with_persistence(
            CacheConfig::default(),
            Arc::new(ManualClock::new(START)),
            store,
        );
        assert!(cache.is_empty());
        cache.insert(origin(), dest_for(0), payload(1.0));
        assert!(cache.get(origin(), dest_for(0)).is_some());
    }

    struct FailingStore;

    impl PersistenceStore for FailingStore {
        fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
            Err(PersistenceError::Backend("disk gone".into()))
        }

        fn save(&self, _state: &[u8]) -> Result<(), PersistenceError> {
            Err(PersistenceError::Backend("disk gone".into()))
        }
    }

    #[test]
    fn test_failing_store_never_breaks_the_cache() {
        let cache = RouteCache::with_persistence(
            CacheConfig::default(),
            Arc::new(ManualClock::new(START)),
            Arc::new(FailingStore),
        );
        cache.insert(origin(), dest_for(0), payload(1.0));
        assert!(cache.flush().is_err());
        assert!(!cache.flush_or_skip());
        assert!(cache.get(origin(), dest_for(0)).is_some());
    }

    #[test]
    fn test_flush_without_store_is_noop() {
        let (cache, _) = cache_with(10, EvictionPolicy::LeastFrequent);
        assert!(cache.flush().is_ok());
        assert!(!cache.is_persistent());
    }

    #[test]
    fn test_concurrent_readers_count_every_hit() {
        let (cache, _) = cache_with(10, EvictionPolicy::LeastFrequent);
        cache.insert(origin(), dest_for(0), payload(1.0));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        assert!(cache.get(origin(), dest_for(0)).is_some());
                    }
                });
            }
        });

        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 800);
        assert_eq!(metrics.top_entries[0].access_count, 800);
    }

    #[test]
    fn test_eviction_policy_config_from_json() {
        let config: CacheConfig = serde_json::from_str(
            r#"{"max_entries": 50, "eviction": {"type": "decaying_frequency", "half_life_secs": 3600}}"#,
        )
        .unwrap();
        assert_eq!(config.max_entries, 50);
        assert_eq!(config.eviction, EvictionPolicy::DecayingFrequency { half_life_secs: 3600 });
        assert_eq!(config.top_entries, 5);
    }
}
