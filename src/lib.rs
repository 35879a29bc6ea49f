//! Page Vitals
//!
//! Web Vitals collection and back/forward-cache lifecycle plumbing for an
//! embeddable browser engine.
//!
//! Notes for the embedding crate:
//!  - Everything hangs off one [`host::Host`] per page. The engine records
//!    performance entries and fires lifecycle transitions on it; this crate
//!    observes them.
//!  - [`PageVitals`] is the entry point. It owns the metric store, the
//!    subscriber registry and the three shared lifecycle registries.
//!  - Callbacks handed to this crate may panic. Panics are caught, logged and
//!    never reach the code that fired the event.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod host;
pub mod lifecycle;
pub mod scheduler;
pub mod subscription;
pub mod vitals;

pub use host::{Capabilities, Host, HostFeatures};
pub use lifecycle::{
    measure_callback, BfcacheManager, BfcacheStats, CleanupOptions, PreloadOptions, RestoreOptions,
};
pub use scheduler::{Callback, Priority, ScheduleOptions, Scheduler, SchedulerBackend};
pub use subscription::Subscription;
pub use vitals::{
    MetricName, MetricSample, MonitoringHandle, MonitoringOptions, PerformanceScore, Rating,
    Recommendation, Thresholds,
};

use crate::vitals::{CollectorSettings, MetricReporter, MetricStore, SubscriberRegistry};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VitalsError {
    #[error("API not supported by this host: {0}")]
    Unsupported(String),
    #[error("Performance entry type not supported: {0}")]
    UnsupportedEntryType(String),
    #[error("Invalid performance mark name: {0}")]
    InvalidMarkName(String),
    #[error("No performance mark named {0}")]
    MissingMark(String),
    #[error("Unknown performance observer: {0}")]
    UnknownObserver(u64),
    #[error("Callback panicked: {0}")]
    CallbackPanicked(String),
    #[error("Host is no longer available")]
    HostUnavailable,
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, VitalsError>;

/// Run a user callback, turning a panic into [`VitalsError::CallbackPanicked`].
pub(crate) fn catch_callback_panic<F: FnOnce()>(f: F) -> Result<()> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        VitalsError::CallbackPanicked(msg)
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalsConfig {
    pub report_to_console: bool,
    pub report_to_analytics: bool,
    pub thresholds: Thresholds,

    // Total Blocking Time
    pub long_task_threshold_ms: f64,
    pub tbt_quiet_window_ms: u64,
    pub tti_estimate_offset_ms: f64,

    pub restore_label: String,
}

impl Default for VitalsConfig {
    fn default() -> Self {
        Self {
            report_to_console: cfg!(debug_assertions),
            report_to_analytics: true,
            thresholds: Thresholds::default(),
            long_task_threshold_ms: 50.0,
            tbt_quiet_window_ms: 5000,
            tti_estimate_offset_ms: 5000.0,
            restore_label: "bfcache-restore".to_string(),
        }
    }
}

impl VitalsConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| VitalsError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| VitalsError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for metric in MetricName::ALL {
            let threshold = self.thresholds.get(metric);
            if !threshold.is_finite() || threshold <= 0.0 {
                return Err(VitalsError::Config(format!(
                    "threshold for {metric} must be positive, got {threshold}"
                )));
            }
        }
        if !self.long_task_threshold_ms.is_finite() || self.long_task_threshold_ms < 0.0 {
            return Err(VitalsError::Config(
                "long_task_threshold_ms must be a non-negative number".to_string(),
            ));
        }
        if self.tbt_quiet_window_ms == 0 {
            return Err(VitalsError::Config(
                "tbt_quiet_window_ms must be greater than zero".to_string(),
            ));
        }
        if !self.tti_estimate_offset_ms.is_finite() || self.tti_estimate_offset_ms < 0.0 {
            return Err(VitalsError::Config(
                "tti_estimate_offset_ms must be a non-negative number".to_string(),
            ));
        }
        if self.restore_label.trim().is_empty() {
            return Err(VitalsError::Config("restore_label must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Point-in-time view of everything collected for a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsReport {
    pub url: String,
    pub captured_at: String,
    pub metrics: BTreeMap<MetricName, MetricSample>,
    pub score: PerformanceScore,
    pub recommendations: Vec<Recommendation>,
    pub bfcache: BfcacheStats,
    pub monitoring_active: bool,
}

/// Monitoring context for one page.
pub struct PageVitals {
    host: Arc<Host>,
    config: VitalsConfig,
    store: Arc<MetricStore>,
    subscribers: Arc<SubscriberRegistry>,
    scheduler: Scheduler,
    bfcache: BfcacheManager,
    monitoring: Mutex<Option<Arc<MonitoringHandle>>>,
}

impl PageVitals {
    pub fn new(host: Arc<Host>, config: VitalsConfig) -> Result<Self> {
        config.validate()?;
        let scheduler = Scheduler::new(&host);
        let bfcache = BfcacheManager::new(&scheduler);
        debug!(url = host.url(), capabilities = ?scheduler.capabilities(), "page vitals created");
        Ok(Self {
            host,
            config,
            store: Arc::new(MetricStore::new()),
            subscribers: SubscriberRegistry::new(),
            scheduler,
            bfcache,
            monitoring: Mutex::new(None),
        })
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub fn config(&self) -> &VitalsConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn bfcache(&self) -> &BfcacheManager {
        &self.bfcache
    }

    // -------- Web Vitals --------

    /// Start the per-metric observers. A second call replaces the previous
    /// monitoring session after cleaning it up.
    pub fn init_performance_monitoring(&self, options: MonitoringOptions) -> Arc<MonitoringHandle> {
        let reporter = MetricReporter::new(
            self.store.clone(),
            self.subscribers.clone(),
            Arc::downgrade(&self.host),
            self.config.thresholds,
        )
        .with_console(options.report_to_console)
        .with_analytics(options.report_to_analytics)
        .with_on_metric_update(options.on_metric_update);

        let handle = Arc::new(vitals::init_performance_monitoring(
            &self.host,
            Arc::new(reporter),
            CollectorSettings::from(&self.config),
        ));

        if let Some(previous) = self.monitoring.lock().replace(handle.clone()) {
            warn!("performance monitoring was already running; replacing it");
            previous.cleanup();
        }
        handle
    }

    pub fn get_performance_metrics(&self) -> BTreeMap<MetricName, MetricSample> {
        self.store.all()
    }

    pub fn get_metric(&self, name: MetricName) -> Option<MetricSample> {
        self.store.get(name)
    }

    pub fn on_metric_update<F>(&self, name: MetricName, callback: F) -> Subscription
    where
        F: Fn(&MetricSample) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(name, Arc::new(callback))
    }

    pub fn get_performance_score(&self) -> PerformanceScore {
        self.store.score()
    }

    pub fn get_performance_recommendations(&self) -> Vec<Recommendation> {
        self.store.recommendations()
    }

    // -------- bfcache --------

    /// Restore options carrying the configured measurement label.
    pub fn restore_options(&self) -> RestoreOptions {
        RestoreOptions {
            label: self.config.restore_label.clone(),
            ..Default::default()
        }
    }

    pub fn handle_bfcache_restore<F>(&self, callback: F, options: &RestoreOptions) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.bfcache.handle_restore(Some(Arc::new(callback)), options)
    }

    pub fn setup_bfcache_cleanup<F>(&self, callback: F, options: &CleanupOptions) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.bfcache.setup_cleanup(Some(Arc::new(callback)), options)
    }

    pub fn is_bfcache_supported(&self) -> bool {
        self.bfcache.is_supported()
    }

    pub fn get_bfcache_stats(&self) -> BfcacheStats {
        self.bfcache.stats()
    }

    pub fn monitor_bfcache(
        &self,
        on_restore: Option<Callback>,
        on_cache: Option<Callback>,
    ) -> Subscription {
        self.bfcache.monitor(on_restore, on_cache)
    }

    pub fn preload_on_bfcache(&self, urls: Vec<String>, options: PreloadOptions) -> Subscription {
        self.bfcache.preload_on_restore(urls, options)
    }

    pub fn snapshot(&self) -> VitalsReport {
        let monitoring_active = self
            .monitoring
            .lock()
            .as_ref()
            .map(|handle| handle.is_active())
            .unwrap_or(false);
        let report = VitalsReport {
            url: self.host.url().to_string(),
            captured_at: chrono::Utc::now().to_rfc3339(),
            metrics: self.store.all(),
            score: self.store.score(),
            recommendations: self.store.recommendations(),
            bfcache: self.bfcache.stats(),
            monitoring_active,
        };
        info!(
            metrics = report.metrics.len(),
            score = report.score.score,
            "vitals snapshot taken"
        );
        report
    }
}

impl std::fmt::Debug for PageVitals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageVitals")
            .field("url", &self.host.url())
            .field("config", &self.config)
            .field("metrics", &self.store.len())
            .finish()
    }
}
