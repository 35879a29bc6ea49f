use super::Callback;
use crate::host::{Host, TimerId};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Trailing-edge debounce with an optional leading edge.
///
/// With `immediate`, the first call of a quiet period runs synchronously and
/// later calls only push the end of the window back. Without it, the
/// callback runs once `delay_ms` after the last call. A zero delay is a
/// plain passthrough.
#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<DebounceInner>,
}

struct DebounceInner {
    callback: Callback,
    delay_ms: u64,
    immediate: bool,
    host: Weak<Host>,
    pending: Mutex<Option<TimerId>>,
}

impl Debouncer {
    pub fn new(host: Weak<Host>, callback: Callback, delay_ms: u64, immediate: bool) -> Self {
        Self {
            inner: Arc::new(DebounceInner {
                callback,
                delay_ms,
                immediate,
                host,
                pending: Mutex::new(None),
            }),
        }
    }

    pub fn call(&self) {
        let inner = &self.inner;
        if inner.delay_ms == 0 {
            (inner.callback)();
            return;
        }
        let Some(host) = inner.host.upgrade() else {
            (inner.callback)();
            return;
        };

        let call_now = {
            let mut pending = inner.pending.lock();
            let call_now = inner.immediate && pending.is_none();
            if let Some(timer) = pending.take() {
                host.clear_timeout(timer);
            }
            let weak = Arc::downgrade(inner);
            let timer = host.set_timeout(inner.delay_ms, move || {
                let Some(inner) = weak.upgrade() else { return };
                inner.pending.lock().take();
                if !inner.immediate {
                    (inner.callback)();
                }
            });
            *pending = Some(timer);
            call_now
        };

        if call_now {
            (inner.callback)();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.pending.lock().is_some()
    }

    /// Drop any pending trailing invocation.
    pub fn cancel(&self) {
        let timer = self.inner.pending.lock().take();
        if let (Some(timer), Some(host)) = (timer, self.inner.host.upgrade()) {
            host.clear_timeout(timer);
        }
    }

    pub fn into_callback(self) -> Callback {
        Arc::new(move || self.call())
    }
}
