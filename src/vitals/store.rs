use super::scoring::{self, PerformanceScore, Recommendation};
use super::{MetricName, MetricSample};
use crate::{catch_callback_panic, Subscription};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::error;

pub type MetricCallback = Arc<dyn Fn(&MetricSample) + Send + Sync>;

/// Latest sample per metric for the current page. Written only by the
/// reporter.
///
/// Report-once metrics are latched here rather than in a collector, so a
/// finalized sample stays put across monitoring sessions on the same page.
#[derive(Default)]
pub struct MetricStore {
    samples: RwLock<HashMap<MetricName, MetricSample>>,
    finalized: Mutex<HashSet<MetricName>>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, sample: MetricSample) {
        self.samples.write().insert(sample.name, sample);
    }

    /// Latch `name`. Returns `true` only for the caller that latched it.
    pub fn finalize(&self, name: MetricName) -> bool {
        self.finalized.lock().insert(name)
    }

    pub fn is_finalized(&self, name: MetricName) -> bool {
        self.finalized.lock().contains(&name)
    }

    pub fn get(&self, name: MetricName) -> Option<MetricSample> {
        self.samples.read().get(&name).cloned()
    }

    pub fn all(&self) -> BTreeMap<MetricName, MetricSample> {
        self.samples
            .read()
            .iter()
            .map(|(name, sample)| (*name, sample.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }

    pub fn score(&self) -> PerformanceScore {
        scoring::score(&self.all())
    }

    pub fn recommendations(&self) -> Vec<Recommendation> {
        scoring::recommendations(&self.all())
    }
}

/// `on_metric_update` subscribers keyed by metric. A metric's entry is
/// pruned when its last subscriber leaves.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Mutex<HashMap<MetricName, BTreeMap<u64, MetricCallback>>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(self: &Arc<Self>, metric: MetricName, callback: MetricCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .entry(metric)
            .or_default()
            .insert(id, callback);

        let registry: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(metric, id);
            }
        })
    }

    fn remove(&self, metric: MetricName, id: u64) {
        let mut subscribers = self.subscribers.lock();
        if let Some(callbacks) = subscribers.get_mut(&metric) {
            callbacks.remove(&id);
            if callbacks.is_empty() {
                subscribers.remove(&metric);
            }
        }
    }

    pub fn subscriber_count(&self, metric: MetricName) -> usize {
        self.subscribers
            .lock()
            .get(&metric)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Metrics that currently have at least one subscriber.
    pub fn subscribed_metrics(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub(crate) fn notify(&self, sample: &MetricSample) {
        let callbacks: Vec<MetricCallback> = self
            .subscribers
            .lock()
            .get(&sample.name)
            .map(|callbacks| callbacks.values().cloned().collect())
            .unwrap_or_default();

        for callback in callbacks {
            if let Err(e) = catch_callback_panic(|| callback(sample)) {
                error!(metric = %sample.name, "metric subscriber failed: {e}");
            }
        }
    }
}
