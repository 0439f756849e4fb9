//! Background upkeep for a shared [`RouteCache`].
//!
//! One tokio task sweeps expired entries on a fixed interval and, for a
//! persistent cache, flushes a snapshot on a second interval. Shutdown
//! flushes one last time.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::RouteCache;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Seconds between expiry sweeps. Default: 60
    pub sweep_interval_secs: u64,
    /// Seconds between persistence flushes. Default: 300. Ignored for
    /// in-memory caches.
    pub flush_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            flush_interval_secs: 300,
        }
    }
}

/// Handle to a running maintenance task.
///
/// Dropping the handle also stops the task (with the final flush), but
/// without waiting for it.
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stop the task after a final flush and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            debug!("[Maintenance] Task ended abnormally: {}", e);
        }
    }

    /// Stop immediately, skipping the final flush.
    pub fn abort(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start periodic sweeping (and flushing) of `cache`.
///
/// Must be called from within a tokio runtime.
pub fn spawn_maintenance(cache: Arc<RouteCache>, config: MaintenanceConfig) -> MaintenanceHandle {
    let (shutdown, mut stop) = watch::channel(false);
    let sweep_period = Duration::from_secs(config.sweep_interval_secs.max(1));
    let flush_period = Duration::from_secs(config.flush_interval_secs.max(1));
    let persistent = cache.is_persistent();

    info!(
        "[Maintenance] Starting: sweep every {:?}, flush every {:?} (persistent: {})",
        sweep_period, flush_period, persistent
    );

    let task = tokio::spawn(async move {
        let mut sweep = interval(sweep_period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flush = interval(flush_period);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Both intervals fire immediately; skip that first tick
        sweep.tick().await;
        flush.tick().await;

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    // A dropped sender also means stop
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = sweep.tick() => {
                    let removed = cache.remove_expired();
                    debug!("[Maintenance] Sweep removed {} entries", removed);
                }
                _ = flush.tick(), if persistent => {
                    cache.flush_or_skip();
                }
            }
        }

        if persistent {
            cache.flush_or_skip();
        }
        info!("[Maintenance] Stopped");
    });

    MaintenanceHandle { shutdown, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{CacheSnapshot, MemoryPersistence};
    use crate::{CacheConfig, GeoPoint, ManualClock, Polyline, RoutePayload, RouteSource};

    fn payload() -> RoutePayload {
        RoutePayload::new(
            Polyline::new(vec![GeoPoint::new(-33.4372, -70.6506), GeoPoint::new(-33.4489, -70.6693)]),
            2_200.0,
            1_800,
            RouteSource::StraightLine,
        )
    }

    fn origin() -> GeoPoint {
        GeoPoint::new(-33.4372, -70.6506)
    }

    fn dest(i: usize) -> GeoPoint {
        GeoPoint::new(-33.44 - i as f64 * 0.01, -70.66)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_expired_entries() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = Arc::new(RouteCache::new(CacheConfig::default(), clock.clone()));
        cache.set(origin(), dest(0), payload(), Duration::from_secs(1));
        cache.set(origin(), dest(1), payload(), Duration::from_secs(3_600));
        clock.advance(Duration::from_secs(2));

        let handle = spawn_maintenance(cache.clone(), MaintenanceConfig::default());
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(cache.len(), 1);
        assert!(cache.get(origin(), dest(1)).is_some());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_on_interval() {
        let store = Arc::new(MemoryPersistence::new());
        let cache = Arc::new(RouteCache::with_persistence(
            CacheConfig::default(),
            Arc::new(ManualClock::new(0)),
            store.clone(),
        ));
        cache.insert(origin(), dest(0), payload());

        let config = MaintenanceConfig {
            sweep_interval_secs: 60,
            flush_interval_secs: 120,
        };
        let handle = spawn_maintenance(cache.clone(), config);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(store.stored().is_none());

        tokio::time::sleep(Duration::from_secs(61)).await;
        let bytes = store.stored().unwrap();
        assert_eq!(CacheSnapshot::from_bytes(&bytes).unwrap().entries.len(), 1);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_once_more() {
        let store = Arc::new(MemoryPersistence::new());
        let cache = Arc::new(RouteCache::with_persistence(
            CacheConfig::default(),
            Arc::new(ManualClock::new(0)),
            store.clone(),
        ));
        let handle = spawn_maintenance(cache.clone(), MaintenanceConfig::default());

        cache.insert(origin(), dest(0), payload());
        cache.insert(origin(), dest(1), payload());
        handle.shutdown().await;

        let bytes = store.stored().unwrap();
        assert_eq!(CacheSnapshot::from_bytes(&bytes).unwrap().entries.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_memory_cache_never_flushes() {
        let cache = Arc::new(RouteCache::new(CacheConfig::default(), Arc::new(ManualClock::new(0))));
        let handle = spawn_maintenance(cache, MaintenanceConfig::default());
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(!handle.is_finished());
        handle.shutdown().await;
    }
}
