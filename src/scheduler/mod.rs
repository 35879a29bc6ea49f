//! Callback dispatch strategies and batched execution.

pub mod debounce;

pub use debounce::Debouncer;

use crate::catch_callback_panic;
use crate::host::{Capabilities, Host};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

pub type Callback = Arc<dyn Fn() + Send + Sync>;

pub const IDLE_TIMEOUT_NORMAL_MS: u64 = 1000;
pub const IDLE_TIMEOUT_LOW_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleOptions {
    pub use_idle_callback: bool,
    pub use_animation_frame: bool,
    pub priority: Priority,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            use_idle_callback: true,
            use_animation_frame: false,
            priority: Priority::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerBackend {
    Microtask,
    Timer,
    IdleCallback { timeout_ms: u64 },
    AnimationFrame,
}

/// Picks a dispatch backend per callback and runs batches.
///
/// Holds only a weak reference to its host so that schedulers captured by
/// host-owned listeners never keep the page alive.
#[derive(Clone)]
pub struct Scheduler {
    host: Weak<Host>,
    capabilities: Capabilities,
}

impl Scheduler {
    pub fn new(host: &Arc<Host>) -> Self {
        Self {
            host: Arc::downgrade(host),
            capabilities: host.capabilities(),
        }
    }

    /// A scheduler with no page behind it; dispatches are dropped.
    pub fn detached() -> Self {
        Self {
            host: Weak::new(),
            capabilities: Capabilities::detect(None),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub(crate) fn host(&self) -> Option<Arc<Host>> {
        self.host.upgrade()
    }

    pub(crate) fn weak_host(&self) -> Weak<Host> {
        self.host.clone()
    }

    pub fn select_backend(&self, options: &ScheduleOptions) -> SchedulerBackend {
        let caps = &self.capabilities;
        if options.use_animation_frame && caps.animation_frame {
            SchedulerBackend::AnimationFrame
        } else if options.use_idle_callback && caps.idle_callback && options.priority != Priority::High {
            let timeout_ms = if options.priority == Priority::Low {
                IDLE_TIMEOUT_LOW_MS
            } else {
                IDLE_TIMEOUT_NORMAL_MS
            };
            SchedulerBackend::IdleCallback { timeout_ms }
        } else if options.priority == Priority::High {
            SchedulerBackend::Microtask
        } else {
            SchedulerBackend::Timer
        }
    }

    pub fn schedule(&self, callback: Callback, options: &ScheduleOptions) -> Dispatcher {
        Dispatcher {
            backend: self.select_backend(options),
            callback,
            host: self.host.clone(),
        }
    }

    pub fn debounce(&self, callback: Callback, delay_ms: u64, immediate: bool) -> Debouncer {
        Debouncer::new(self.host.clone(), callback, delay_ms, immediate)
    }

    /// Run `callbacks` as one visual update: inside a single animation frame
    /// when frames are available, otherwise as one microtask. Callbacks run
    /// in the given order and a failing one never stops the rest.
    pub fn batch_execute(&self, callbacks: Vec<Callback>) {
        if callbacks.is_empty() {
            return;
        }
        let Some(host) = self.host.upgrade() else {
            debug!(callbacks = callbacks.len(), "batch dropped: page is gone");
            return;
        };

        let callbacks: Arc<[Callback]> = callbacks.into();
        if self.capabilities.animation_frame {
            let batch = callbacks.clone();
            match host.request_animation_frame(move |_| run_batch(&batch)) {
                Ok(_) => return,
                Err(e) => warn!("falling back to a microtask batch: {e}"),
            }
        }
        host.queue_microtask(move || run_batch(&callbacks));
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("capabilities", &self.capabilities)
            .field("attached", &(self.host.strong_count() > 0))
            .finish()
    }
}

pub(crate) fn run_batch(callbacks: &[Callback]) {
    for (index, callback) in callbacks.iter().enumerate() {
        if let Err(e) = catch_callback_panic(|| callback()) {
            error!(index, batch_size = callbacks.len(), "batched callback failed: {e}");
        }
    }
}

/// A callback bound to the backend chosen for it. Every `dispatch` queues
/// one more invocation.
#[derive(Clone)]
pub struct Dispatcher {
    backend: SchedulerBackend,
    callback: Callback,
    host: Weak<Host>,
}

impl Dispatcher {
    pub fn backend(&self) -> SchedulerBackend {
        self.backend
    }

    pub fn dispatch(&self) {
        let Some(host) = self.host.upgrade() else {
            debug!(backend = ?self.backend, "dispatch dropped: page is gone");
            return;
        };
        let callback = self.callback.clone();
        match self.backend {
            SchedulerBackend::Microtask => host.queue_microtask(move || callback()),
            SchedulerBackend::Timer => {
                host.set_timeout(0, move || callback());
            }
            SchedulerBackend::IdleCallback { timeout_ms } => {
                let fallback = callback.clone();
                if let Err(e) = host.request_idle_callback(move |_| callback(), Some(timeout_ms)) {
                    warn!("idle dispatch failed, using a timer: {e}");
                    host.set_timeout(0, move || fallback());
                }
            }
            SchedulerBackend::AnimationFrame => {
                let fallback = callback.clone();
                if let Err(e) = host.request_animation_frame(move |_| callback()) {
                    warn!("frame dispatch failed, using a timer: {e}");
                    host.set_timeout(0, move || fallback());
                }
            }
        }
    }

    pub fn into_callback(self) -> Callback {
        Arc::new(move || self.dispatch())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("backend", &self.backend)
            .finish()
    }
}
