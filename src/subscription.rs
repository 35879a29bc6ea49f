use parking_lot::Mutex;
use std::fmt;

type Teardown = Box<dyn FnOnce() + Send + 'static>;

/// Handle returned by every registration in this crate.
///
/// `unsubscribe` runs the teardown at most once; later calls are no-ops.
/// Dropping the handle does not unsubscribe, matching how page scripts
/// treat the functions returned from listener registrations.
pub struct Subscription {
    teardown: Mutex<Option<Teardown>>,
}

impl Subscription {
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// A handle with nothing to tear down.
    pub fn noop() -> Self {
        Self {
            teardown: Mutex::new(None),
        }
    }

    /// Combine several handles into one that tears all of them down in order.
    pub fn merge(subscriptions: Vec<Subscription>) -> Self {
        if subscriptions.iter().all(|s| !s.is_active()) {
            return Self::noop();
        }
        Self::new(move || {
            for subscription in &subscriptions {
                subscription.unsubscribe();
            }
        })
    }

    pub fn unsubscribe(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    pub fn is_active(&self) -> bool {
        self.teardown.lock().is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
