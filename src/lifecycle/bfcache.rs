use super::{CleanupOptions, LifecycleKind, LifecycleRegistry, RestoreOptions};
use crate::host::Host;
use crate::scheduler::{Callback, Priority, Scheduler};
use crate::Subscription;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BfcacheStats {
    pub supported: bool,
    pub restore_callbacks: usize,
    pub cleanup_callbacks: usize,
    pub restore_listener_active: bool,
    pub cleanup_listener_active: bool,
    /// Restorations (`pageshow` with `persisted`) seen while at least one
    /// restore callback was registered. Not a page-wide total.
    pub restores: u64,
    /// Genuine unloads (`pagehide` without `persisted`) seen while at least
    /// one cleanup callback was registered. Not a page-wide total.
    pub unloads: u64,
    /// Entries into the cache (`pagehide` with `persisted`) seen while a
    /// `monitor` cache callback was registered. Not a page-wide total.
    pub entries: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadOptions {
    pub as_type: String,
    pub priority: Priority,
}

impl Default for PreloadOptions {
    fn default() -> Self {
        Self {
            as_type: "fetch".to_string(),
            priority: Priority::Low,
        }
    }
}

/// Owns the restore, cleanup and cache-entry registries of one page.
pub struct BfcacheManager {
    host: Weak<Host>,
    supported: bool,
    restore: LifecycleRegistry,
    cleanup: LifecycleRegistry,
    enter: LifecycleRegistry,
}

impl BfcacheManager {
    pub fn new(scheduler: &Scheduler) -> Self {
        Self {
            host: scheduler.weak_host(),
            supported: scheduler.capabilities().bfcache_events,
            restore: LifecycleRegistry::new(LifecycleKind::Restore, scheduler.clone()),
            cleanup: LifecycleRegistry::new(LifecycleKind::Cleanup, scheduler.clone()),
            enter: LifecycleRegistry::new(LifecycleKind::Enter, scheduler.clone()),
        }
    }

    pub fn restore_registry(&self) -> &LifecycleRegistry {
        &self.restore
    }

    pub fn cleanup_registry(&self) -> &LifecycleRegistry {
        &self.cleanup
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    pub fn handle_restore(&self, callback: Option<Callback>, options: &RestoreOptions) -> Subscription {
        self.restore.register_restore_callback(callback, options)
    }

    pub fn setup_cleanup(&self, callback: Option<Callback>, options: &CleanupOptions) -> Subscription {
        self.cleanup.register_cleanup_callback(callback, options)
    }

    pub fn stats(&self) -> BfcacheStats {
        BfcacheStats {
            supported: self.supported,
            restore_callbacks: self.restore.len(),
            cleanup_callbacks: self.cleanup.len(),
            restore_listener_active: self.restore.listener_active(),
            cleanup_listener_active: self.cleanup.listener_active(),
            restores: self.restore.fire_count(),
            unloads: self.cleanup.fire_count(),
            entries: self.enter.fire_count(),
        }
    }

    /// Observe both directions of the bfcache. `on_cache` runs synchronously
    /// while the page is being frozen.
    pub fn monitor(&self, on_restore: Option<Callback>, on_cache: Option<Callback>) -> Subscription {
        let restore = self.restore.register_restore_callback(
            on_restore,
            &RestoreOptions {
                priority: Priority::High,
                ..Default::default()
            },
        );
        let enter = self.enter.register_cleanup_callback(
            on_cache,
            &CleanupOptions {
                critical: true,
                label: "bfcache-enter".to_string(),
            },
        );
        Subscription::merge(vec![restore, enter])
    }

    /// Re-issue preload hints for `urls` after every restoration.
    pub fn preload_on_restore(&self, urls: Vec<String>, options: PreloadOptions) -> Subscription {
        if urls.is_empty() {
            warn!("preload_on_bfcache called without URLs");
            return Subscription::noop();
        }
        let host = self.host.clone();
        let as_type = options.as_type.clone();
        let priority = options.priority;
        let callback: Callback = Arc::new(move || {
            let Some(host) = host.upgrade() else { return };
            for url in &urls {
                host.preload(url, &as_type, priority);
            }
            debug!(count = urls.len(), "preload hints re-issued after restore");
        });
        self.restore.register_restore_callback(
            Some(callback),
            &RestoreOptions {
                priority: options.priority,
                label: "bfcache-preload".to_string(),
                ..Default::default()
            },
        )
    }
}
