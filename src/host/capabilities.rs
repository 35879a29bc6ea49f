use super::performance::EntryType;
use super::Host;
use crate::scheduler::SchedulerBackend;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Browser features the monitoring code may rely on.
///
/// Detection never fails: without a host (server-side rendering, tests that
/// never build a page) every flag is `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub performance_marks: bool,
    pub performance_observer: bool,
    pub idle_callback: bool,
    pub animation_frame: bool,
    pub bfcache_events: bool,
}

impl Capabilities {
    pub fn detect(host: Option<&Host>) -> Self {
        let Some(host) = host else {
            return Self::default();
        };
        let features = host.features();
        Self {
            performance_marks: features.performance_marks,
            performance_observer: EntryType::ALL
                .iter()
                .any(|t| features.entry_types.contains(t)),
            idle_callback: features.idle_callback,
            animation_frame: features.animation_frame,
            bfcache_events: features.bfcache_events,
        }
    }

    /// Dispatch strategies usable on this host, cheapest latency first.
    pub fn backends(&self) -> SmallVec<[SchedulerBackend; 4]> {
        let mut backends = SmallVec::new();
        backends.push(SchedulerBackend::Microtask);
        backends.push(SchedulerBackend::Timer);
        if self.idle_callback {
            backends.push(SchedulerBackend::IdleCallback {
                timeout_ms: crate::scheduler::IDLE_TIMEOUT_NORMAL_MS,
            });
        }
        if self.animation_frame {
            backends.push(SchedulerBackend::AnimationFrame);
        }
        backends
    }
}
