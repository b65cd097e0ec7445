//! MemStore — the live, mutex-guarded metric map.
//!
//! Every operation takes the single exclusive lock for the duration of the
//! map access only. Nothing that touches disk or the network ever runs
//! while the lock is held; persistence works on the copy returned by
//! [`MemStore::iterate`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::error::StateResult;
use crate::types::{Metric, MetricKey, MetricValue};

type MetricMap = HashMap<MetricKey, MetricValue>;

/// Thread-safe in-memory metric map. `Clone` shares the same map.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<MetricMap>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricMap> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a metric by key.
    pub fn get(&self, key: &MetricKey) -> Option<Metric> {
        let map = self.lock();
        map.get(key).map(|value| Metric::from_parts(key, *value))
    }

    /// Insert or replace a metric.
    pub fn set(&self, metric: &Metric) -> StateResult<()> {
        let mut map = self.lock();
        map.insert(metric.key(), metric.value());
        trace!(key = %metric.key(), "metric stored");
        Ok(())
    }

    /// Remove a metric. Absent keys are not an error.
    pub fn delete(&self, key: &MetricKey) -> StateResult<()> {
        let mut map = self.lock();
        map.remove(key);
        Ok(())
    }

    /// Copy every stored metric into a fresh vector (unordered).
    pub fn iterate(&self) -> Vec<Metric> {
        let map = self.lock();
        map.iter()
            .map(|(key, value)| Metric::from_parts(key, *value))
            .collect()
    }

    /// Read-modify-write one entry inside a single critical section.
    ///
    /// `merge` receives the key, the currently stored payload (if any) and
    /// the incoming one, and returns the payload to store. If it fails, the
    /// stored entry is left untouched.
    pub fn upsert_with<F>(&self, metric: Metric, merge: F) -> StateResult<Metric>
    where
        F: FnOnce(&MetricKey, Option<MetricValue>, MetricValue) -> StateResult<MetricValue>,
    {
        let mut map = self.lock();
        upsert_locked(&mut map, metric, merge)
    }

    /// Apply [`upsert_with`](Self::upsert_with) to several metrics under
    /// one lock acquisition. All-or-nothing: if any merge fails, none of
    /// the batch is applied.
    pub fn upsert_all_with<F>(&self, metrics: Vec<Metric>, mut merge: F) -> StateResult<Vec<Metric>>
    where
        F: FnMut(&MetricKey, Option<MetricValue>, MetricValue) -> StateResult<MetricValue>,
    {
        let mut map = self.lock();
        let mut staged = MetricMap::new();
        let mut merged_metrics = Vec::with_capacity(metrics.len());
        for metric in metrics {
            let key = metric.key();
            let existing = staged.get(&key).or_else(|| map.get(&key)).copied();
            let merged = merge(&key, existing, metric.value())?;
            merged_metrics.push(Metric::from_parts(&key, merged));
            staged.insert(key, merged);
        }
        map.extend(staged);
        Ok(merged_metrics)
    }

    /// Number of stored metrics.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn upsert_locked<F>(map: &mut MetricMap, metric: Metric, merge: F) -> StateResult<Metric>
where
    F: FnOnce(&MetricKey, Option<MetricValue>, MetricValue) -> StateResult<MetricValue>,
{
    let key = metric.key();
    let existing = map.get(&key).copied();
    let merged = merge(&key, existing, metric.value())?;
    map.insert(key.clone(), merged);
    Ok(Metric::from_parts(&key, merged))
}
