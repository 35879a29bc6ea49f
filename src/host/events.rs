use crate::catch_callback_panic;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PageEventType {
    PageShow,
    PageHide,
    Load,
    DomContentLoaded,
    VisibilityChange,
}

impl PageEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageEventType::PageShow => "pageshow",
            PageEventType::PageHide => "pagehide",
            PageEventType::Load => "load",
            PageEventType::DomContentLoaded => "DOMContentLoaded",
            PageEventType::VisibilityChange => "visibilitychange",
        }
    }
}

impl fmt::Display for PageEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageTransitionEvent {
    pub persisted: bool,
    pub time_stamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PageEvent {
    PageShow(PageTransitionEvent),
    PageHide(PageTransitionEvent),
    Load { time_stamp: f64 },
    DomContentLoaded { time_stamp: f64 },
    VisibilityChange { hidden: bool, time_stamp: f64 },
}

impl PageEvent {
    pub fn event_type(&self) -> PageEventType {
        match self {
            PageEvent::PageShow(_) => PageEventType::PageShow,
            PageEvent::PageHide(_) => PageEventType::PageHide,
            PageEvent::Load { .. } => PageEventType::Load,
            PageEvent::DomContentLoaded { .. } => PageEventType::DomContentLoaded,
            PageEvent::VisibilityChange { .. } => PageEventType::VisibilityChange,
        }
    }

    /// `Some` only for page transition events.
    pub fn persisted(&self) -> Option<bool> {
        match self {
            PageEvent::PageShow(e) | PageEvent::PageHide(e) => Some(e.persisted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerOptions {
    pub passive: bool,
    pub once: bool,
}

impl ListenerOptions {
    pub fn passive() -> Self {
        Self {
            passive: true,
            once: false,
        }
    }
}

pub type EventCallback = Arc<dyn Fn(&PageEvent) + Send + Sync>;

struct Registered {
    id: ListenerId,
    callback: EventCallback,
    options: ListenerOptions,
}

/// Window-level listener table for page lifecycle events.
pub struct EventSystem {
    handlers: RwLock<HashMap<PageEventType, Vec<Registered>>>,
    next_id: AtomicU64,
}

impl EventSystem {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add_listener<F>(
        &self,
        event_type: PageEventType,
        callback: F,
        options: ListenerOptions,
    ) -> ListenerId
    where
        F: Fn(&PageEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write();
        handlers.entry(event_type).or_default().push(Registered {
            id,
            callback: Arc::new(callback),
            options,
        });
        trace!(event = %event_type, ?id, "listener added");
        id
    }

    pub fn remove_listener(&self, event_type: PageEventType, id: ListenerId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&event_type);
        }
        removed
    }

    pub fn listener_count(&self, event_type: PageEventType) -> usize {
        self.handlers
            .read()
            .get(&event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Invoke every listener registered for the event's type, in
    /// registration order. Returns how many listeners ran.
    pub fn dispatch_event(&self, event: &PageEvent) -> usize {
        let event_type = event.event_type();
        let callbacks: Vec<EventCallback> = {
            let mut handlers = self.handlers.write();
            let Some(list) = handlers.get_mut(&event_type) else {
                return 0;
            };
            let callbacks = list.iter().map(|r| r.callback.clone()).collect();
            list.retain(|r| !r.options.once);
            if list.is_empty() {
                handlers.remove(&event_type);
            }
            callbacks
        };

        for callback in &callbacks {
            if let Err(e) = catch_callback_panic(|| callback(event)) {
                error!(event = %event_type, "listener failed: {e}");
            }
        }
        callbacks.len()
    }
}

impl Default for EventSystem {
    fn default() -> Self {
        Self::new()
    }
}
