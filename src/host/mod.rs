//! In-process model of the browser surface the monitoring code talks to.
//!
//! A [`Host`] bundles the event loop, the window event target, the
//! performance timeline and the ambient analytics queue for one page. The
//! embedding engine drives it: it records performance entries as they are
//! produced and fires lifecycle transitions (`load`, `pagehide`, ...).

pub mod capabilities;
pub mod driver;
pub mod event_loop;
pub mod events;
pub mod performance;

pub use capabilities::Capabilities;
pub use driver::{DriverHandle, HostDriver};
pub use event_loop::{
    EventLoop, FrameId, FrameTask, IdleDeadline, IdleId, IdleTask, PendingTasks, Task, TimerId,
};
pub use events::{
    EventCallback, EventSystem, ListenerId, ListenerOptions, PageEvent, PageEventType,
    PageTransitionEvent,
};
pub use performance::{
    EntryDetail, EntryType, NavigationTiming, ObserverCallback, ObserverId, Performance,
    PerformanceEntry,
};

use crate::scheduler::Priority;
use crate::Result;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFeatures {
    pub performance_marks: bool,
    pub idle_callback: bool,
    pub animation_frame: bool,
    pub bfcache_events: bool,
    pub entry_types: HashSet<EntryType>,
}

impl HostFeatures {
    pub fn full() -> Self {
        Self {
            performance_marks: true,
            idle_callback: true,
            animation_frame: true,
            bfcache_events: true,
            entry_types: EntryType::ALL.into_iter().collect(),
        }
    }

    /// Microtasks and timers only.
    pub fn minimal() -> Self {
        Self {
            performance_marks: false,
            idle_callback: false,
            animation_frame: false,
            bfcache_events: false,
            entry_types: HashSet::new(),
        }
    }

    pub fn without_entry_type(mut self, entry_type: EntryType) -> Self {
        self.entry_types.remove(&entry_type);
        self
    }
}

impl Default for HostFeatures {
    fn default() -> Self {
        Self::full()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

/// `window.dataLayer`: an append-only queue read by tag managers.
#[derive(Debug, Clone, Default)]
pub struct DataLayer {
    events: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl DataLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: serde_json::Value) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<serde_json::Value> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceHint {
    pub url: String,
    pub as_type: String,
    pub priority: Priority,
    pub issued_at: f64,
}

pub struct Host {
    features: HostFeatures,
    event_loop: Arc<EventLoop>,
    events: EventSystem,
    performance: Performance,
    ready_state: RwLock<ReadyState>,
    data_layer: Option<DataLayer>,
    resource_hints: Mutex<Vec<ResourceHint>>,
    capabilities: OnceCell<Capabilities>,
    url: String,
}

impl Host {
    pub fn new(features: HostFeatures) -> Arc<Self> {
        Self::build(features, None, "about:blank")
    }

    pub fn with_data_layer(features: HostFeatures, data_layer: DataLayer) -> Arc<Self> {
        Self::build(features, Some(data_layer), "about:blank")
    }

    pub fn build(features: HostFeatures, data_layer: Option<DataLayer>, url: &str) -> Arc<Self> {
        let event_loop = Arc::new(EventLoop::new(features.idle_callback, features.animation_frame));
        let performance = Performance::new(
            event_loop.clone(),
            features.entry_types.clone(),
            features.performance_marks,
        );
        Arc::new(Self {
            features,
            event_loop,
            events: EventSystem::new(),
            performance,
            ready_state: RwLock::new(ReadyState::Loading),
            data_layer,
            resource_hints: Mutex::new(Vec::new()),
            capabilities: OnceCell::new(),
            url: url.to_string(),
        })
    }

    pub fn features(&self) -> &HostFeatures {
        &self.features
    }

    /// Feature detection, computed on first use and memoized for the page.
    pub fn capabilities(&self) -> Capabilities {
        *self
            .capabilities
            .get_or_init(|| Capabilities::detect(Some(self)))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    pub fn events(&self) -> &EventSystem {
        &self.events
    }

    pub fn performance(&self) -> &Performance {
        &self.performance
    }

    pub fn data_layer(&self) -> Option<&DataLayer> {
        self.data_layer.as_ref()
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.ready_state.read()
    }

    pub fn now(&self) -> f64 {
        self.event_loop.now()
    }

    // -------- Event loop --------

    pub fn queue_microtask<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.event_loop.queue_microtask(Box::new(task));
    }

    pub fn set_timeout<F>(&self, delay_ms: u64, task: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        self.event_loop.set_timeout(delay_ms, Box::new(task))
    }

    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.event_loop.clear_timeout(id)
    }

    pub fn request_idle_callback<F>(&self, task: F, timeout_ms: Option<u64>) -> Result<IdleId>
    where
        F: FnOnce(IdleDeadline) + Send + 'static,
    {
        self.event_loop.request_idle_callback(Box::new(task), timeout_ms)
    }

    pub fn request_animation_frame<F>(&self, task: F) -> Result<FrameId>
    where
        F: FnOnce(f64) + Send + 'static,
    {
        self.event_loop.request_animation_frame(Box::new(task))
    }

    pub fn advance(&self, ms: u64) -> usize {
        self.event_loop.advance(ms)
    }

    pub fn render_frame(&self) -> usize {
        self.event_loop.render_frame()
    }

    pub fn run_idle_period(&self, budget_ms: f64) -> usize {
        self.event_loop.run_idle_period(budget_ms)
    }

    pub fn run_microtasks(&self) -> usize {
        self.event_loop.run_microtasks()
    }

    // -------- Window events --------

    pub fn add_event_listener<F>(
        &self,
        event_type: PageEventType,
        listener: F,
        options: ListenerOptions,
    ) -> ListenerId
    where
        F: Fn(&PageEvent) + Send + Sync + 'static,
    {
        self.events.add_listener(event_type, listener, options)
    }

    pub fn remove_event_listener(&self, event_type: PageEventType, id: ListenerId) -> bool {
        self.events.remove_listener(event_type, id)
    }

    pub fn listener_count(&self, event_type: PageEventType) -> usize {
        self.events.listener_count(event_type)
    }

    pub fn dispatch_event(&self, event: &PageEvent) -> usize {
        let ran = self.events.dispatch_event(event);
        self.event_loop.run_microtasks();
        ran
    }

    // -------- Page lifecycle, driven by the embedder --------

    /// Record the request/response milestones of the current navigation.
    pub fn commit_navigation(&self, request_start: f64, response_start: f64) {
        self.performance.update_navigation_timing(|t| {
            t.request_start = request_start;
            t.response_start = response_start;
        });
    }

    pub fn dom_content_loaded(&self) -> usize {
        let now = self.now();
        self.performance
            .update_navigation_timing(|t| t.dom_content_loaded_event_end = now);
        *self.ready_state.write() = ReadyState::Interactive;
        self.dispatch_event(&PageEvent::DomContentLoaded { time_stamp: now })
    }

    pub fn load(&self) -> usize {
        let now = self.now();
        let timing = self.performance.update_navigation_timing(|t| {
            if t.dom_content_loaded_event_end == 0.0 {
                t.dom_content_loaded_event_end = now;
            }
            t.load_event_end = now;
        });
        *self.ready_state.write() = ReadyState::Complete;
        self.performance
            .record_entry(PerformanceEntry::navigation(&self.url, timing));
        self.dispatch_event(&PageEvent::Load { time_stamp: now })
    }

    /// Fire `pagehide`. `persisted` means the page is entering the bfcache.
    pub fn page_hide(&self, persisted: bool) -> usize {
        self.page_transition(persisted, PageEvent::PageHide)
    }

    /// Fire `pageshow`. `persisted` means the page came back from the bfcache.
    pub fn page_show(&self, persisted: bool) -> usize {
        self.page_transition(persisted, PageEvent::PageShow)
    }

    fn page_transition(&self, persisted: bool, make: fn(PageTransitionEvent) -> PageEvent) -> usize {
        if !self.features.bfcache_events {
            debug!("page transition events are not supported by this host");
            return 0;
        }
        let event = make(PageTransitionEvent {
            persisted,
            time_stamp: self.now(),
        });
        self.dispatch_event(&event)
    }

    pub fn visibility_change(&self, hidden: bool) -> usize {
        self.dispatch_event(&PageEvent::VisibilityChange {
            hidden,
            time_stamp: self.now(),
        })
    }

    // -------- Resource hints --------

    pub fn preload(&self, url: &str, as_type: &str, priority: Priority) {
        let hint = ResourceHint {
            url: url.to_string(),
            as_type: as_type.to_string(),
            priority,
            issued_at: self.now(),
        };
        debug!(url, as_type, "resource hint issued");
        self.resource_hints.lock().push(hint);
    }

    pub fn resource_hints(&self) -> Vec<ResourceHint> {
        self.resource_hints.lock().clone()
    }
}
