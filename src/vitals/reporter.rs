use super::store::{MetricCallback, MetricStore, SubscriberRegistry};
use super::{MetricName, MetricSample, Rating, Thresholds};
use crate::catch_callback_panic;
use crate::host::Host;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, info, warn};

/// Shape pushed onto `window.dataLayer`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsEvent {
    pub event: &'static str,
    pub metric_name: MetricName,
    pub metric_value: f64,
    pub metric_rating: Rating,
    pub metric_id: String,
}

/// The single sink every finalized metric value goes through.
pub struct MetricReporter {
    store: Arc<MetricStore>,
    subscribers: Arc<SubscriberRegistry>,
    host: Weak<Host>,
    thresholds: Thresholds,
    report_to_console: bool,
    report_to_analytics: bool,
    on_metric_update: Option<MetricCallback>,
    sequence: AtomicU64,
}

impl MetricReporter {
    pub fn new(
        store: Arc<MetricStore>,
        subscribers: Arc<SubscriberRegistry>,
        host: Weak<Host>,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            store,
            subscribers,
            host,
            thresholds,
            report_to_console: false,
            report_to_analytics: false,
            on_metric_update: None,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.report_to_console = enabled;
        self
    }

    pub fn with_analytics(mut self, enabled: bool) -> Self {
        self.report_to_analytics = enabled;
        self
    }

    pub fn with_on_metric_update(mut self, callback: Option<MetricCallback>) -> Self {
        self.on_metric_update = callback;
        self
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Rate `value` against the configured thresholds and report it.
    pub fn report(&self, name: MetricName, value: f64) -> MetricSample {
        let rating = self.thresholds.rate(name, value);
        self.report_metric(name, value, rating)
    }

    pub fn report_metric(&self, name: MetricName, value: f64, rating: Rating) -> MetricSample {
        let sample = MetricSample {
            name,
            value,
            rating,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        self.store.record(sample.clone());

        if self.report_to_console {
            info!(metric = %name, value, rating = %rating, "web vital");
        }
        if self.report_to_analytics {
            self.push_analytics(&sample);
        }
        if let Some(callback) = &self.on_metric_update {
            if let Err(e) = catch_callback_panic(|| callback(&sample)) {
                error!(metric = %name, "on_metric_update callback failed: {e}");
            }
        }
        self.subscribers.notify(&sample);
        sample
    }

    fn push_analytics(&self, sample: &MetricSample) {
        let Some(host) = self.host.upgrade() else { return };
        let Some(data_layer) = host.data_layer() else { return };

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let event = AnalyticsEvent {
            event: "web_vitals",
            metric_name: sample.name,
            metric_value: sample.value,
            metric_rating: sample.rating,
            metric_id: format!("{}-{}-{}", sample.name, sample.timestamp, seq),
        };
        match serde_json::to_value(&event) {
            Ok(value) => data_layer.push(value),
            Err(e) => warn!(metric = %sample.name, "analytics event not serializable: {e}"),
        }
    }
}

impl fmt::Debug for MetricReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricReporter")
            .field("thresholds", &self.thresholds)
            .field("report_to_console", &self.report_to_console)
            .field("report_to_analytics", &self.report_to_analytics)
            .field("on_metric_update", &self.on_metric_update.is_some())
            .finish()
    }
}
