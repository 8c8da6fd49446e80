//! Collector registry and published snapshots.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::error::CollectorError;
use crate::metrics::{METRIC_NAME_SEPARATOR, Metrics};
use crate::options::CollectorOptions;
use crate::Collector;

/// A point-in-time view of every collector's last good metrics.
///
/// Snapshots are immutable once published; readers hold an `Arc` and never
/// contend with the collection cycle.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    seq: u64,
    collected_at: Option<DateTime<Utc>>,
    collectors: BTreeMap<String, Metrics>,
}

impl Snapshot {
    /// Monotonic publication counter; 0 for the empty initial snapshot.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn collected_at(&self) -> Option<DateTime<Utc>> {
        self.collected_at
    }

    pub fn collector(&self, id: &str) -> Option<&Metrics> {
        self.collectors.get(id)
    }

    /// Every metric, named `` <collector>`<metric> ``.
    pub fn all(&self) -> Metrics {
        let mut all = Metrics::new();
        for (id, metrics) in &self.collectors {
            all.extend_namespaced(id, metrics);
        }
        all
    }

    /// Resolves a broker path against the snapshot.
    ///
    /// - `""` or `"/"`: every metric
    /// - `"cpu"`: every metric of one collector
    /// - `"cpu/used_pct"` or `` "cpu`used_pct" ``: a single metric
    ///
    /// Returns `None` when the path names nothing.
    pub fn lookup(&self, path: &str) -> Option<Metrics> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Some(self.all());
        }

        let (collector_id, metric) =
            match path.split_once(|c: char| c == '/' || c == METRIC_NAME_SEPARATOR) {
                Some((collector_id, metric)) => (collector_id, Some(metric)),
                None => (path, None),
            };

        let metrics = self.collectors.get(collector_id)?;
        let mut found = Metrics::new();
        match metric {
            None => found.extend_namespaced(collector_id, metrics),
            Some(name) => {
                let sample = metrics.get(name)?;
                found.insert(
                    format!("{collector_id}{METRIC_NAME_SEPARATOR}{name}"),
                    sample.clone(),
                );
            }
        }
        Some(found)
    }
}

struct Slot {
    id: String,
    collector: Box<dyn Collector>,
    options: CollectorOptions,
    last_run: Option<Instant>,
    last_good: Metrics,
}

impl Slot {
    fn is_due(&self, now: Instant) -> bool {
        match (self.options.run_ttl(), self.last_run) {
            (Some(ttl), Some(last)) => now.duration_since(last) >= ttl,
            _ => true,
        }
    }
}

/// Owns the collectors and the currently published snapshot.
pub struct Registry {
    slots: Mutex<Vec<Slot>>,
    current: RwLock<Arc<Snapshot>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            current: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Adds a collector. The options' `id`, when set, replaces the
    /// collector's own id.
    pub fn register(
        &self,
        collector: Box<dyn Collector>,
        options: CollectorOptions,
    ) -> Result<(), CollectorError> {
        let id = options
            .id
            .clone()
            .unwrap_or_else(|| collector.id().to_string());

        let mut slots = self.lock_slots();
        if slots.iter().any(|slot| slot.id == id) {
            return Err(CollectorError::Duplicate(id));
        }

        tracing::debug!(collector = %id, "registered collector");
        slots.push(Slot {
            id,
            collector,
            options,
            last_run: None,
            last_good: Metrics::new(),
        });
        Ok(())
    }

    /// Ids of the registered collectors, in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.lock_slots().iter().map(|slot| slot.id.clone()).collect()
    }

    /// Runs every due collector and publishes a new snapshot.
    ///
    /// A collector whose run TTL has not expired, or whose run fails, keeps
    /// contributing its last good metrics.
    pub fn collect(&self) -> Arc<Snapshot> {
        let mut slots = self.lock_slots();
        let now = Instant::now();
        let mut collectors = BTreeMap::new();

        for slot in slots.iter_mut() {
            if slot.is_due(now) {
                slot.last_run = Some(now);
                match slot.collector.collect() {
                    Ok(mut metrics) => {
                        metrics.retain(|name| slot.options.is_metric_enabled(name));
                        slot.last_good = metrics;
                    }
                    Err(e) => {
                        tracing::warn!(collector = %slot.id, error = %e, "collection failed, keeping previous metrics");
                    }
                }
            } else {
                tracing::trace!(collector = %slot.id, "run ttl not expired, skipping");
            }
            collectors.insert(slot.id.clone(), slot.last_good.clone());
        }

        let snapshot = Arc::new(Snapshot {
            seq: self.flush().seq + 1,
            collected_at: Some(Utc::now()),
            collectors,
        });

        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);
        drop(slots);

        tracing::debug!(seq = snapshot.seq, "published metrics snapshot");
        snapshot
    }

    /// Returns the most recently published snapshot without collecting.
    pub fn flush(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn lock_slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        // A panicking collector leaves the slot list itself intact.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
