//! Per-metric performance observers and their finalization rules.
//!
//! | metric | accumulation                      | finalized                          |
//! |--------|-----------------------------------|------------------------------------|
//! | LCP    | last entry wins                   | first `pagehide`                   |
//! | CLS    | sum of shifts without recent input| first qualifying batch, or pagehide|
//! | INP    | worst interaction latency         | `pagehide` (0 if no interaction)   |
//! | FCP    | direct                            | on observation                     |
//! | FID    | `processing_start - start_time`   | first input                        |
//! | TBT    | blocking time inside FCP..TTI     | quiet window elapsed, or pagehide  |
//! | TTFB   | `response_start - request_start`  | `load` (or now, if already loaded) |
//!
//! Report-once metrics are latched in the [`MetricStore`](super::MetricStore),
//! so the natural finalization path and the `pagehide` fallback can race
//! without ever reporting twice, and a later monitoring session on the same
//! page cannot overwrite them. A metric whose observer could not be created
//! is never reported.

use super::reporter::MetricReporter;
use super::store::MetricCallback;
use super::{MetricName, MetricSample};
use crate::host::{
    EntryDetail, EntryType, Host, ListenerId, ListenerOptions, ObserverId, PageEventType,
    PerformanceEntry, ReadyState,
};
use crate::scheduler::{Callback, Debouncer, Scheduler};
use crate::VitalsConfig;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

const INTERACTION_EVENTS: [&str; 3] = ["click", "keydown", "pointerdown"];
const FIRST_CONTENTFUL_PAINT: &str = "first-contentful-paint";

pub struct MonitoringOptions {
    pub report_to_console: bool,
    pub report_to_analytics: bool,
    pub on_metric_update: Option<MetricCallback>,
}

impl MonitoringOptions {
    pub fn with_on_metric_update<F>(mut self, callback: F) -> Self
    where
        F: Fn(&MetricSample) + Send + Sync + 'static,
    {
        self.on_metric_update = Some(Arc::new(callback));
        self
    }
}

impl Default for MonitoringOptions {
    fn default() -> Self {
        Self::from(&VitalsConfig::default())
    }
}

impl From<&VitalsConfig> for MonitoringOptions {
    fn from(config: &VitalsConfig) -> Self {
        Self {
            report_to_console: config.report_to_console,
            report_to_analytics: config.report_to_analytics,
            on_metric_update: None,
        }
    }
}

impl fmt::Debug for MonitoringOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoringOptions")
            .field("report_to_console", &self.report_to_console)
            .field("report_to_analytics", &self.report_to_analytics)
            .field("on_metric_update", &self.on_metric_update.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectorSettings {
    pub long_task_threshold_ms: f64,
    pub tbt_quiet_window_ms: u64,
    pub tti_estimate_offset_ms: f64,
}

impl From<&VitalsConfig> for CollectorSettings {
    fn from(config: &VitalsConfig) -> Self {
        Self {
            long_task_threshold_ms: config.long_task_threshold_ms,
            tbt_quiet_window_ms: config.tbt_quiet_window_ms,
            tti_estimate_offset_ms: config.tti_estimate_offset_ms,
        }
    }
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self::from(&VitalsConfig::default())
    }
}

struct CollectorState {
    host: Weak<Host>,
    reporter: Arc<MetricReporter>,
    settings: CollectorSettings,
    // Metrics whose observer was created; set once the observers exist.
    observing: OnceCell<SmallVec<[MetricName; 6]>>,

    cls_value: Mutex<f64>,
    inp_worst: Mutex<Option<f64>>,
    fcp_time: Mutex<Option<f64>>,
    // (start, duration) of every task over the long-task threshold.
    long_tasks: Mutex<Vec<(f64, f64)>>,
    tbt_quiet: Debouncer,
}

type EntryHandler = fn(&Arc<CollectorState>, &[PerformanceEntry]);

impl CollectorState {
    fn new(host: &Arc<Host>, reporter: Arc<MetricReporter>, settings: CollectorSettings) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let finalize: Callback = Arc::new(move || {
                if let Some(state) = weak.upgrade() {
                    state.finalize_tbt();
                }
            });
            Self {
                host: Arc::downgrade(host),
                reporter,
                settings,
                observing: OnceCell::new(),
                cls_value: Mutex::new(0.0),
                inp_worst: Mutex::new(None),
                fcp_time: Mutex::new(None),
                long_tasks: Mutex::new(Vec::new()),
                tbt_quiet: Scheduler::new(host).debounce(finalize, settings.tbt_quiet_window_ms, false),
            }
        })
    }

    fn observes(&self, metric: MetricName) -> bool {
        self.observing
            .get()
            .map_or(false, |metrics| metrics.contains(&metric))
    }

    fn is_finalized(&self, metric: MetricName) -> bool {
        self.reporter.store().is_finalized(metric)
    }

    fn finalize(&self, metric: MetricName) -> bool {
        self.reporter.store().finalize(metric)
    }

    fn on_lcp(self: &Arc<Self>, entries: &[PerformanceEntry]) {
        if self.is_finalized(MetricName::Lcp) {
            return;
        }
        let latest = entries.iter().rev().find_map(|e| match e.detail {
            EntryDetail::LargestContentfulPaint {
                render_time,
                load_time,
                ..
            } => Some(if render_time > 0.0 { render_time } else { load_time }),
            _ => None,
        });
        if let Some(value) = latest {
            self.reporter.report(MetricName::Lcp, value);
        }
    }

    fn on_layout_shift(self: &Arc<Self>, entries: &[PerformanceEntry]) {
        if self.is_finalized(MetricName::Cls) {
            return;
        }
        let shifts: Vec<f64> = entries
            .iter()
            .filter_map(|e| match e.detail {
                EntryDetail::LayoutShift {
                    value,
                    had_recent_input: false,
                } => Some(value),
                _ => None,
            })
            .collect();
        if shifts.is_empty() {
            return;
        }
        let total = {
            let mut cls = self.cls_value.lock();
            *cls += shifts.iter().sum::<f64>();
            *cls
        };
        if self.finalize(MetricName::Cls) {
            self.reporter.report(MetricName::Cls, total);
        }
    }

    fn on_event_timing(self: &Arc<Self>, entries: &[PerformanceEntry]) {
        if self.is_finalized(MetricName::Inp) {
            return;
        }
        let worst_in_batch = entries
            .iter()
            .filter(|e| INTERACTION_EVENTS.contains(&e.name.as_str()))
            .filter_map(|e| match e.detail {
                EntryDetail::Event { processing_delay } => Some(processing_delay + e.duration),
                _ => None,
            })
            .fold(None, |worst: Option<f64>, latency| {
                Some(worst.map_or(latency, |w| w.max(latency)))
            });
        if let Some(latency) = worst_in_batch {
            let mut worst = self.inp_worst.lock();
            *worst = Some(worst.map_or(latency, |w| w.max(latency)));
        }
    }

    fn on_paint(self: &Arc<Self>, entries: &[PerformanceEntry]) {
        let Some(fcp) = entries.iter().find(|e| e.name == FIRST_CONTENTFUL_PAINT) else {
            return;
        };
        {
            let mut fcp_time = self.fcp_time.lock();
            if fcp_time.is_some() {
                return;
            }
            *fcp_time = Some(fcp.start_time);
        }
        if self.finalize(MetricName::Fcp) {
            self.reporter.report(MetricName::Fcp, fcp.start_time);
        }
    }

    fn on_first_input(self: &Arc<Self>, entries: &[PerformanceEntry]) {
        let delay = entries.iter().find_map(|e| match e.detail {
            EntryDetail::FirstInput { processing_start } => Some(processing_start - e.start_time),
            _ => None,
        });
        if let Some(delay) = delay {
            if self.finalize(MetricName::Fid) {
                self.reporter.report(MetricName::Fid, delay.max(0.0));
            }
        }
    }

    /// Long tasks are kept until finalization; the FCP..TTI window is only
    /// applied then, once both ends are known.
    fn on_long_tasks(self: &Arc<Self>, entries: &[PerformanceEntry]) {
        if self.is_finalized(MetricName::Tbt) {
            return;
        }
        let threshold = self.settings.long_task_threshold_ms;
        let qualifying: Vec<(f64, f64)> = entries
            .iter()
            .filter(|e| e.entry_type() == EntryType::Longtask && e.duration > threshold)
            .map(|e| (e.start_time, e.duration))
            .collect();
        if qualifying.is_empty() {
            return;
        }
        self.long_tasks.lock().extend(qualifying);
        self.tbt_quiet.call();
    }

    /// From first contentful paint to the estimated time to interactive
    /// (DOMContentLoaded plus a fixed offset).
    fn tbt_window(&self) -> (f64, f64) {
        let start = self.fcp_time.lock().unwrap_or(0.0);
        let dcl = self
            .host
            .upgrade()
            .map(|h| h.performance().navigation_timing().dom_content_loaded_event_end)
            .unwrap_or(0.0);
        let end = if dcl > 0.0 {
            dcl + self.settings.tti_estimate_offset_ms
        } else {
            f64::INFINITY
        };
        (start, end)
    }

    fn total_blocking_time(&self) -> f64 {
        let threshold = self.settings.long_task_threshold_ms;
        let (window_start, window_end) = self.tbt_window();
        self.long_tasks
            .lock()
            .iter()
            .filter(|(start, duration)| *start < window_end && start + duration > window_start)
            .map(|(_, duration)| duration - threshold)
            .sum()
    }

    fn cancel_tbt_timer(&self) {
        self.tbt_quiet.cancel();
    }

    fn finalize_tbt(&self) {
        self.cancel_tbt_timer();
        if self.finalize(MetricName::Tbt) {
            let total = self.total_blocking_time();
            self.reporter.report(MetricName::Tbt, total);
        }
    }

    /// Metrics without an observer stay unreported.
    fn on_page_hide(&self) {
        self.finalize(MetricName::Lcp);

        if self.observes(MetricName::Cls) && self.finalize(MetricName::Cls) {
            let total = *self.cls_value.lock();
            self.reporter.report(MetricName::Cls, total);
        }
        if self.observes(MetricName::Inp) && self.finalize(MetricName::Inp) {
            let worst = self.inp_worst.lock().unwrap_or(0.0);
            self.reporter.report(MetricName::Inp, worst);
        }
        if self.observes(MetricName::Tbt) {
            self.finalize_tbt();
        }
    }

    fn report_ttfb(&self) {
        let Some(host) = self.host.upgrade() else { return };
        let timing = host.performance().navigation_timing();
        if timing.response_start <= 0.0 {
            warn!("navigation timing has no response start; TTFB not reported");
            return;
        }
        if self.finalize(MetricName::Ttfb) {
            let ttfb = (timing.response_start - timing.request_start).max(0.0);
            self.reporter.report(MetricName::Ttfb, ttfb);
        }
    }
}

/// Returned by [`init_performance_monitoring`]; `cleanup` stops collection.
pub struct MonitoringHandle {
    host: Weak<Host>,
    state: Arc<CollectorState>,
    observers: Vec<(MetricName, ObserverId)>,
    listeners: Vec<(PageEventType, ListenerId)>,
    cleaned_up: AtomicBool,
}

impl MonitoringHandle {
    /// Metrics backed by a performance observer that was created
    /// successfully. TTFB comes from the `load` path and is never listed.
    pub fn observer_backed_metrics(&self) -> Vec<MetricName> {
        self.observers.iter().map(|(metric, _)| *metric).collect()
    }

    pub fn is_active(&self) -> bool {
        !self.cleaned_up.load(Ordering::Acquire)
    }

    /// Disconnect every observer and remove the listeners added by
    /// monitoring. Safe to call more than once.
    pub fn cleanup(&self) {
        if self.cleaned_up.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state.cancel_tbt_timer();
        let Some(host) = self.host.upgrade() else { return };
        for (metric, id) in &self.observers {
            if let Err(e) = host.performance().disconnect(*id) {
                warn!(metric = %metric, "failed to disconnect observer: {e}");
            }
        }
        for (event_type, id) in &self.listeners {
            host.remove_event_listener(*event_type, *id);
        }
        debug!("performance monitoring stopped");
    }
}

impl fmt::Debug for MonitoringHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoringHandle")
            .field("observer_backed_metrics", &self.observer_backed_metrics())
            .field("active", &self.is_active())
            .finish()
    }
}

fn observe(
    host: &Host,
    state: &Arc<CollectorState>,
    metric: MetricName,
    entry_type: EntryType,
    handler: EntryHandler,
) -> Option<(MetricName, ObserverId)> {
    let state = state.clone();
    let callback = Arc::new(move |entries: &[PerformanceEntry]| handler(&state, entries));
    match host.performance().observe(&[entry_type], true, callback) {
        Ok(id) => Some((metric, id)),
        Err(e) => {
            warn!(metric = %metric, "metric will not be reported: {e}");
            None
        }
    }
}

/// Start collecting all seven metrics on `host`, reporting through
/// `reporter`. Observers that the host does not support are skipped.
pub fn init_performance_monitoring(
    host: &Arc<Host>,
    reporter: Arc<MetricReporter>,
    settings: CollectorSettings,
) -> MonitoringHandle {
    let state = CollectorState::new(host, reporter, settings);

    let table: [(MetricName, EntryType, EntryHandler); 6] = [
        (MetricName::Lcp, EntryType::LargestContentfulPaint, CollectorState::on_lcp),
        (MetricName::Cls, EntryType::LayoutShift, CollectorState::on_layout_shift),
        (MetricName::Inp, EntryType::Event, CollectorState::on_event_timing),
        (MetricName::Fcp, EntryType::Paint, CollectorState::on_paint),
        (MetricName::Fid, EntryType::FirstInput, CollectorState::on_first_input),
        (MetricName::Tbt, EntryType::Longtask, CollectorState::on_long_tasks),
    ];
    let observers: Vec<_> = table
        .into_iter()
        .filter_map(|(metric, entry_type, handler)| observe(host, &state, metric, entry_type, handler))
        .collect();
    let _ = state
        .observing
        .set(observers.iter().map(|(metric, _)| *metric).collect());

    let mut listeners = Vec::new();
    let on_hide = state.clone();
    listeners.push((
        PageEventType::PageHide,
        host.add_event_listener(
            PageEventType::PageHide,
            move |_| on_hide.on_page_hide(),
            ListenerOptions::passive(),
        ),
    ));

    if host.ready_state() == ReadyState::Complete {
        state.report_ttfb();
    } else {
        let on_load = state.clone();
        listeners.push((
            PageEventType::Load,
            host.add_event_listener(
                PageEventType::Load,
                move |_| on_load.report_ttfb(),
                ListenerOptions {
                    passive: true,
                    once: true,
                },
            ),
        ));
    }

    info!(observers = observers.len(), "performance monitoring initialized");
    MonitoringHandle {
        host: Arc::downgrade(host),
        state,
        observers,
        listeners,
        cleaned_up: AtomicBool::new(false),
    }
}
