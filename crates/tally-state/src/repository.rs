//! Repository — aggregation semantics over the [`MemStore`].
//!
//! `collect` is the only mutating entry point used by producers. Counter
//! increments are summed and gauge values replaced, and the whole
//! read-modify-write for one key happens inside a single store critical
//! section, so concurrent increments never lose updates.

use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::store::MemStore;
use crate::types::{Metric, MetricKey, MetricValue};

/// Metric repository shared by the HTTP layer, the synchronizer, and the
/// agent. `Clone` shares the underlying store.
#[derive(Clone, Default)]
pub struct Repository {
    store: MemStore,
}

impl Repository {
    pub fn new(store: MemStore) -> Self {
        Self { store }
    }

    /// Apply a metric and return it as now stored.
    ///
    /// For counters the returned delta is the accumulated total, not the
    /// submitted increment.
    pub fn collect(&self, metric: Metric) -> StateResult<Metric> {
        let stored = self.store.upsert_with(metric, aggregate)?;
        debug!(key = %stored.key(), value = %stored.display_value(), "metric collected");
        Ok(stored)
    }

    /// Apply a batch of metrics atomically, in order.
    ///
    /// Repeated keys within the batch aggregate onto each other. If any
    /// element fails, nothing from the batch is applied.
    pub fn collect_batch(&self, metrics: Vec<Metric>) -> StateResult<Vec<Metric>> {
        let count = metrics.len();
        let stored = self.store.upsert_all_with(metrics, aggregate)?;
        debug!(count, "metric batch collected");
        Ok(stored)
    }

    /// Store a metric verbatim, without aggregation (snapshot restore).
    pub fn set(&self, metric: &Metric) -> StateResult<()> {
        self.store.set(metric)
    }

    pub fn get(&self, key: &MetricKey) -> Option<Metric> {
        self.store.get(key)
    }

    /// Remove a metric. Absent keys are a no-op.
    pub fn delete(&self, key: &MetricKey) -> StateResult<()> {
        self.store.delete(key)
    }

    /// Every stored metric, unordered. The result is a copy.
    pub fn get_all(&self) -> Vec<Metric> {
        self.store.iterate()
    }

    /// Liveness of the repository itself. In-memory storage is always up.
    pub fn ping(&self) -> StateResult<()> {
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

/// Kind-specific aggregation: counters sum, gauges overwrite.
fn aggregate(
    key: &MetricKey,
    existing: Option<MetricValue>,
    incoming: MetricValue,
) -> StateResult<MetricValue> {
    match (existing, incoming) {
        (Some(MetricValue::Counter(old)), MetricValue::Counter(delta)) => old
            .checked_add(delta)
            .map(MetricValue::Counter)
            .ok_or_else(|| StateError::CounterOverflow(key.id.clone())),
        (_, incoming) => Ok(incoming),
    }
}
