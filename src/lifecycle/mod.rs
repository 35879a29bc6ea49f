//! Shared `pageshow`/`pagehide` registries.
//!
//! Each [`LifecycleRegistry`] multiplexes any number of logical callbacks
//! onto at most one native window listener. The listener is installed when
//! the first callback registers and removed when the last one leaves.

pub mod bfcache;
pub mod measure;

pub use bfcache::{BfcacheManager, BfcacheStats, PreloadOptions};
pub use measure::measure_callback;

use crate::host::{Host, ListenerId, ListenerOptions, PageEvent, PageEventType};
use crate::scheduler::{run_batch, Callback, Priority, ScheduleOptions, Scheduler};
use crate::{catch_callback_panic, Subscription};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleKind {
    /// `pageshow` with `persisted`: restored from the bfcache.
    Restore,
    /// `pagehide` without `persisted`: the page is really unloading.
    Cleanup,
    /// `pagehide` with `persisted`: the page is entering the bfcache.
    Enter,
}

impl LifecycleKind {
    pub fn event_type(&self) -> PageEventType {
        match self {
            LifecycleKind::Restore => PageEventType::PageShow,
            LifecycleKind::Cleanup | LifecycleKind::Enter => PageEventType::PageHide,
        }
    }

    pub fn matches(&self, event: &PageEvent) -> bool {
        match (self, event) {
            (LifecycleKind::Restore, PageEvent::PageShow(e)) => e.persisted,
            (LifecycleKind::Cleanup, PageEvent::PageHide(e)) => !e.persisted,
            (LifecycleKind::Enter, PageEvent::PageHide(e)) => e.persisted,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreOptions {
    pub priority: Priority,
    pub use_idle_callback: bool,
    pub use_animation_frame: bool,
    pub debounce_ms: u64,
    pub measure_performance: bool,
    pub label: String,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            use_idle_callback: true,
            use_animation_frame: false,
            debounce_ms: 0,
            measure_performance: false,
            label: "bfcache-restore".to_string(),
        }
    }
}

impl RestoreOptions {
    pub fn schedule_options(&self) -> ScheduleOptions {
        ScheduleOptions {
            use_idle_callback: self.use_idle_callback,
            use_animation_frame: self.use_animation_frame,
            priority: self.priority,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupOptions {
    /// Run inside the `pagehide` dispatch instead of at idle priority.
    pub critical: bool,
    pub label: String,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            critical: false,
            label: "bfcache-cleanup".to_string(),
        }
    }
}

struct Entry {
    callback: Callback,
    critical: bool,
}

#[derive(Default)]
struct RegistryState {
    entries: BTreeMap<u64, Entry>,
    listener: Option<ListenerId>,
    next_id: u64,
    fired: u64,
    listeners_installed: u64,
}

#[derive(Clone)]
pub struct LifecycleRegistry {
    kind: LifecycleKind,
    scheduler: Scheduler,
    state: Arc<Mutex<RegistryState>>,
}

impl LifecycleRegistry {
    pub fn new(kind: LifecycleKind, scheduler: Scheduler) -> Self {
        Self {
            kind,
            scheduler,
            state: Arc::new(Mutex::new(RegistryState::default())),
        }
    }

    pub fn kind(&self) -> LifecycleKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn listener_active(&self) -> bool {
        self.state.lock().listener.is_some()
    }

    /// Matching events observed while a listener was installed, that is,
    /// while at least one callback was registered.
    pub fn fire_count(&self) -> u64 {
        self.state.lock().fired
    }

    /// How many times a native listener has been installed over the
    /// registry's life.
    pub fn listeners_installed(&self) -> u64 {
        self.state.lock().listeners_installed
    }

    /// Register a restore-style callback: debounced, optionally measured and
    /// dispatched through the scheduler on every matching event.
    pub fn register_restore_callback(&self, callback: Option<Callback>, options: &RestoreOptions) -> Subscription {
        let Some(callback) = callback else {
            return reject(self.kind);
        };
        let wrapped = self.wrap_restore(callback, options);
        self.insert(Entry {
            callback: wrapped,
            critical: false,
        })
    }

    /// Register a teardown callback. Critical callbacks run synchronously
    /// inside the event; the rest go through the low-priority idle path.
    pub fn register_cleanup_callback(&self, callback: Option<Callback>, options: &CleanupOptions) -> Subscription {
        let Some(callback) = callback else {
            return reject(self.kind);
        };
        if options.critical {
            return self.insert(Entry {
                callback,
                critical: true,
            });
        }
        let deferred = ScheduleOptions {
            use_idle_callback: true,
            use_animation_frame: false,
            priority: Priority::Low,
        };
        let wrapped = self.scheduler.schedule(callback, &deferred).into_callback();
        self.insert(Entry {
            callback: wrapped,
            critical: false,
        })
    }

    fn wrap_restore(&self, callback: Callback, options: &RestoreOptions) -> Callback {
        let mut inner = callback;
        if options.measure_performance {
            inner = measure::measured(self.scheduler.weak_host(), options.label.clone(), inner);
        }
        if options.debounce_ms > 0 {
            inner = self
                .scheduler
                .debounce(inner, options.debounce_ms, false)
                .into_callback();
        }
        self.scheduler
            .schedule(inner, &options.schedule_options())
            .into_callback()
    }

    fn insert(&self, entry: Entry) -> Subscription {
        let Some(host) = self.scheduler.host() else {
            warn!(kind = ?self.kind, "cannot register lifecycle callback: no page");
            return Subscription::noop();
        };

        let id = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = state.next_id;
            state.entries.insert(id, entry);
            if state.listener.is_none() {
                state.listener = Some(self.install_listener(&host));
                state.listeners_installed += 1;
                debug!(kind = ?self.kind, "native lifecycle listener installed");
            }
            id
        };

        let state = Arc::downgrade(&self.state);
        let host = Arc::downgrade(&host);
        let kind = self.kind;
        Subscription::new(move || release(&state, &host, kind, id))
    }

    fn install_listener(&self, host: &Arc<Host>) -> ListenerId {
        let state = Arc::downgrade(&self.state);
        let scheduler = self.scheduler.clone();
        let kind = self.kind;
        host.add_event_listener(
            kind.event_type(),
            move |event| {
                if !kind.matches(event) {
                    return;
                }
                let Some(state) = state.upgrade() else { return };
                let (critical, deferred) = snapshot(&state);
                for callback in &critical {
                    if let Err(e) = catch_callback_panic(|| callback()) {
                        error!(kind = ?kind, "critical lifecycle callback failed: {e}");
                    }
                }
                if kind == LifecycleKind::Cleanup || kind == LifecycleKind::Enter {
                    // Deferred work is already behind the idle scheduler.
                    run_batch(&deferred);
                } else {
                    scheduler.batch_execute(deferred);
                }
            },
            ListenerOptions::passive(),
        )
    }
}

/// Take the callbacks registered right now, in registration order, split
/// into (critical, deferred). Later registrations wait for the next event.
fn snapshot(state: &Mutex<RegistryState>) -> (Vec<Callback>, Vec<Callback>) {
    let mut state = state.lock();
    state.fired += 1;
    let mut critical = Vec::new();
    let mut deferred = Vec::new();
    for entry in state.entries.values() {
        if entry.critical {
            critical.push(entry.callback.clone());
        } else {
            deferred.push(entry.callback.clone());
        }
    }
    (critical, deferred)
}

fn release(state: &Weak<Mutex<RegistryState>>, host: &Weak<Host>, kind: LifecycleKind, id: u64) {
    let Some(state) = state.upgrade() else { return };
    let mut state = state.lock();
    if state.entries.remove(&id).is_none() || !state.entries.is_empty() {
        return;
    }
    if let Some(listener) = state.listener.take() {
        if let Some(host) = host.upgrade() {
            host.remove_event_listener(kind.event_type(), listener);
        }
        debug!(kind = ?kind, "native lifecycle listener removed");
    }
}

fn reject(kind: LifecycleKind) -> Subscription {
    if cfg!(debug_assertions) {
        warn!(kind = ?kind, "lifecycle callback must be callable; registration ignored");
    }
    Subscription::noop()
}
