//! Performance timeline: marks, measures, buffered entries and observers.

use super::event_loop::EventLoop;
use crate::{catch_callback_panic, Result, VitalsError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryType {
    LargestContentfulPaint,
    LayoutShift,
    Event,
    Paint,
    FirstInput,
    Longtask,
    Navigation,
    Mark,
    Measure,
}

impl EntryType {
    pub const ALL: [EntryType; 9] = [
        EntryType::LargestContentfulPaint,
        EntryType::LayoutShift,
        EntryType::Event,
        EntryType::Paint,
        EntryType::FirstInput,
        EntryType::Longtask,
        EntryType::Navigation,
        EntryType::Mark,
        EntryType::Measure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::LargestContentfulPaint => "largest-contentful-paint",
            EntryType::LayoutShift => "layout-shift",
            EntryType::Event => "event",
            EntryType::Paint => "paint",
            EntryType::FirstInput => "first-input",
            EntryType::Longtask => "longtask",
            EntryType::Navigation => "navigation",
            EntryType::Mark => "mark",
            EntryType::Measure => "measure",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Navigation Timing attributes, in milliseconds since navigation start.
/// Zero means "not reached yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationTiming {
    pub request_start: f64,
    pub response_start: f64,
    pub dom_content_loaded_event_end: f64,
    pub load_event_end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntryDetail {
    LargestContentfulPaint {
        render_time: f64,
        load_time: f64,
        size: u64,
    },
    LayoutShift {
        value: f64,
        had_recent_input: bool,
    },
    Event {
        processing_delay: f64,
    },
    Paint,
    FirstInput {
        processing_start: f64,
    },
    LongTask,
    Navigation(NavigationTiming),
    Mark,
    Measure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceEntry {
    pub name: String,
    pub start_time: f64,
    pub duration: f64,
    pub detail: EntryDetail,
}

impl PerformanceEntry {
    pub fn entry_type(&self) -> EntryType {
        match self.detail {
            EntryDetail::LargestContentfulPaint { .. } => EntryType::LargestContentfulPaint,
            EntryDetail::LayoutShift { .. } => EntryType::LayoutShift,
            EntryDetail::Event { .. } => EntryType::Event,
            EntryDetail::Paint => EntryType::Paint,
            EntryDetail::FirstInput { .. } => EntryType::FirstInput,
            EntryDetail::LongTask => EntryType::Longtask,
            EntryDetail::Navigation(_) => EntryType::Navigation,
            EntryDetail::Mark => EntryType::Mark,
            EntryDetail::Measure => EntryType::Measure,
        }
    }

    pub fn largest_contentful_paint(start_time: f64, render_time: f64, load_time: f64, size: u64) -> Self {
        Self {
            name: String::new(),
            start_time,
            duration: 0.0,
            detail: EntryDetail::LargestContentfulPaint {
                render_time,
                load_time,
                size,
            },
        }
    }

    pub fn layout_shift(start_time: f64, value: f64, had_recent_input: bool) -> Self {
        Self {
            name: String::new(),
            start_time,
            duration: 0.0,
            detail: EntryDetail::LayoutShift {
                value,
                had_recent_input,
            },
        }
    }

    /// An Event Timing entry such as `click` or `keydown`.
    pub fn event(name: &str, start_time: f64, processing_delay: f64, duration: f64) -> Self {
        Self {
            name: name.to_string(),
            start_time,
            duration,
            detail: EntryDetail::Event { processing_delay },
        }
    }

    pub fn paint(name: &str, start_time: f64) -> Self {
        Self {
            name: name.to_string(),
            start_time,
            duration: 0.0,
            detail: EntryDetail::Paint,
        }
    }

    pub fn first_input(name: &str, start_time: f64, processing_start: f64) -> Self {
        Self {
            name: name.to_string(),
            start_time,
            duration: 0.0,
            detail: EntryDetail::FirstInput { processing_start },
        }
    }

    pub fn long_task(start_time: f64, duration: f64) -> Self {
        Self {
            name: "self".to_string(),
            start_time,
            duration,
            detail: EntryDetail::LongTask,
        }
    }

    pub fn navigation(url: &str, timing: NavigationTiming) -> Self {
        Self {
            name: url.to_string(),
            start_time: 0.0,
            duration: timing.load_event_end,
            detail: EntryDetail::Navigation(timing),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObserverId(u64);

pub type ObserverCallback = Arc<dyn Fn(&[PerformanceEntry]) + Send + Sync>;

struct Observer {
    entry_types: SmallVec<[EntryType; 2]>,
    callback: ObserverCallback,
}

#[derive(Default)]
struct Timeline {
    entries: Vec<PerformanceEntry>,
    observers: BTreeMap<u64, Observer>,
    next_observer: u64,
    navigation: NavigationTiming,
}

/// Mark names that shadow Navigation Timing attributes.
const RESERVED_MARK_NAMES: &[&str] = &[
    "navigationStart",
    "unloadEventStart",
    "unloadEventEnd",
    "redirectStart",
    "redirectEnd",
    "fetchStart",
    "domainLookupStart",
    "domainLookupEnd",
    "connectStart",
    "connectEnd",
    "secureConnectionStart",
    "requestStart",
    "responseStart",
    "responseEnd",
    "domLoading",
    "domInteractive",
    "domContentLoadedEventStart",
    "domContentLoadedEventEnd",
    "domComplete",
    "loadEventStart",
    "loadEventEnd",
];

pub struct Performance {
    timeline: Arc<Mutex<Timeline>>,
    event_loop: Arc<EventLoop>,
    supported: HashSet<EntryType>,
    marks_supported: bool,
}

impl Performance {
    pub fn new(event_loop: Arc<EventLoop>, supported: HashSet<EntryType>, marks_supported: bool) -> Self {
        Self {
            timeline: Arc::new(Mutex::new(Timeline::default())),
            event_loop,
            supported,
            marks_supported,
        }
    }

    pub fn now(&self) -> f64 {
        self.event_loop.now()
    }

    pub fn supports(&self, entry_type: EntryType) -> bool {
        self.supported.contains(&entry_type)
    }

    pub fn supported_entry_types(&self) -> Vec<EntryType> {
        let mut types: Vec<_> = self.supported.iter().copied().collect();
        types.sort();
        types
    }

    pub fn marks_supported(&self) -> bool {
        self.marks_supported
    }

    /// Register an observer for `entry_types`. With `buffered`, entries
    /// recorded before the call are delivered in a microtask.
    pub fn observe(
        &self,
        entry_types: &[EntryType],
        buffered: bool,
        callback: ObserverCallback,
    ) -> Result<ObserverId> {
        if let Some(missing) = entry_types.iter().find(|t| !self.supports(**t)) {
            return Err(VitalsError::UnsupportedEntryType(missing.as_str().to_string()));
        }

        let (id, backlog) = {
            let mut timeline = self.timeline.lock();
            timeline.next_observer += 1;
            let id = timeline.next_observer;
            let backlog: Vec<PerformanceEntry> = if buffered {
                timeline
                    .entries
                    .iter()
                    .filter(|e| entry_types.contains(&e.entry_type()))
                    .cloned()
                    .collect()
            } else {
                Vec::new()
            };
            timeline.observers.insert(
                id,
                Observer {
                    entry_types: entry_types.iter().copied().collect(),
                    callback: callback.clone(),
                },
            );
            (id, backlog)
        };

        if !backlog.is_empty() {
            let timeline = Arc::downgrade(&self.timeline);
            self.event_loop.queue_microtask(Box::new(move || {
                let connected = timeline
                    .upgrade()
                    .map(|t| t.lock().observers.contains_key(&id))
                    .unwrap_or(false);
                if connected {
                    deliver(&callback, &backlog);
                }
            }));
        }

        debug!(observer = id, types = ?entry_types, buffered, "performance observer registered");
        Ok(ObserverId(id))
    }

    pub fn disconnect(&self, id: ObserverId) -> Result<()> {
        match self.timeline.lock().observers.remove(&id.0) {
            Some(_) => Ok(()),
            None => Err(VitalsError::UnknownObserver(id.0)),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.timeline.lock().observers.len()
    }

    /// Append entries to the timeline and hand each observer the slice of
    /// them it asked for, as a single batch.
    pub fn record_entries(&self, entries: Vec<PerformanceEntry>) {
        if entries.is_empty() {
            return;
        }
        let deliveries: Vec<(ObserverCallback, Vec<PerformanceEntry>)> = {
            let mut timeline = self.timeline.lock();
            let deliveries = timeline
                .observers
                .values()
                .filter_map(|observer| {
                    let batch: Vec<PerformanceEntry> = entries
                        .iter()
                        .filter(|e| observer.entry_types.contains(&e.entry_type()))
                        .cloned()
                        .collect();
                    (!batch.is_empty()).then(|| (observer.callback.clone(), batch))
                })
                .collect();
            timeline.entries.extend(entries);
            deliveries
        };

        for (callback, batch) in deliveries {
            deliver(&callback, &batch);
        }
    }

    pub fn record_entry(&self, entry: PerformanceEntry) {
        self.record_entries(vec![entry]);
    }

    pub fn mark(&self, name: &str) -> Result<PerformanceEntry> {
        if !self.marks_supported {
            return Err(VitalsError::Unsupported("performance.mark".to_string()));
        }
        if RESERVED_MARK_NAMES.contains(&name) {
            return Err(VitalsError::InvalidMarkName(name.to_string()));
        }
        let entry = PerformanceEntry {
            name: name.to_string(),
            start_time: self.now(),
            duration: 0.0,
            detail: EntryDetail::Mark,
        };
        self.record_entry(entry.clone());
        Ok(entry)
    }

    /// Measure between two marks; without `end_mark` the measure ends now.
    pub fn measure(&self, name: &str, start_mark: &str, end_mark: Option<&str>) -> Result<PerformanceEntry> {
        if !self.marks_supported {
            return Err(VitalsError::Unsupported("performance.measure".to_string()));
        }
        let start = self
            .latest_mark(start_mark)
            .ok_or_else(|| VitalsError::MissingMark(start_mark.to_string()))?;
        let end = match end_mark {
            Some(end_mark) => self
                .latest_mark(end_mark)
                .ok_or_else(|| VitalsError::MissingMark(end_mark.to_string()))?,
            None => self.now(),
        };
        let entry = PerformanceEntry {
            name: name.to_string(),
            start_time: start,
            duration: end - start,
            detail: EntryDetail::Measure,
        };
        self.record_entry(entry.clone());
        Ok(entry)
    }

    fn latest_mark(&self, name: &str) -> Option<f64> {
        self.timeline
            .lock()
            .entries
            .iter()
            .rev()
            .find(|e| e.name == name && e.entry_type() == EntryType::Mark)
            .map(|e| e.start_time)
    }

    pub fn clear_marks(&self, name: Option<&str>) {
        self.clear(EntryType::Mark, name);
    }

    pub fn clear_measures(&self, name: Option<&str>) {
        self.clear(EntryType::Measure, name);
    }

    fn clear(&self, entry_type: EntryType, name: Option<&str>) {
        self.timeline.lock().entries.retain(|e| {
            e.entry_type() != entry_type || name.is_some_and(|n| n != e.name)
        });
    }

    pub fn get_entries_by_type(&self, entry_type: EntryType) -> Vec<PerformanceEntry> {
        self.timeline
            .lock()
            .entries
            .iter()
            .filter(|e| e.entry_type() == entry_type)
            .cloned()
            .collect()
    }

    pub fn get_entries_by_name(&self, name: &str) -> Vec<PerformanceEntry> {
        self.timeline
            .lock()
            .entries
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    pub fn navigation_timing(&self) -> NavigationTiming {
        self.timeline.lock().navigation
    }

    pub(crate) fn update_navigation_timing<F>(&self, update: F) -> NavigationTiming
    where
        F: FnOnce(&mut NavigationTiming),
    {
        let mut timeline = self.timeline.lock();
        update(&mut timeline.navigation);
        timeline.navigation
    }
}

fn deliver(callback: &ObserverCallback, batch: &[PerformanceEntry]) {
    if let Err(e) = catch_callback_panic(|| callback(batch)) {
        error!(entries = batch.len(), "performance observer callback failed: {e}");
    }
}
