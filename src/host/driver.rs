//! Real-time pump for a [`Host`] on a Tokio runtime.
//!
//! Each frame the driver moves the virtual clock forward by the wall time
//! that elapsed, renders a frame and hands the rest of the frame budget to
//! idle callbacks. The host never depends on Tokio itself.

use super::Host;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

pub struct HostDriver {
    host: Arc<Host>,
    frame_interval: Duration,
}

pub struct DriverHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<u64>,
}

impl DriverHandle {
    /// Stop pumping and return the number of frames rendered.
    pub async fn stop(mut self) -> u64 {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.task.await {
            Ok(frames) => frames,
            Err(e) => {
                error!("host driver task failed: {e}");
                0
            }
        }
    }
}

impl HostDriver {
    pub fn new(host: Arc<Host>) -> Self {
        Self {
            host,
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }

    pub fn with_frame_interval(mut self, frame_interval: Duration) -> Self {
        self.frame_interval = frame_interval.max(Duration::from_millis(1));
        self
    }

    pub fn spawn(self) -> DriverHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let HostDriver {
            host,
            frame_interval,
        } = self;

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(frame_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let started = Instant::now();
            let origin = host.now();
            let budget_ms = frame_interval.as_secs_f64() * 1000.0;
            let mut frames = 0u64;

            info!(interval_ms = budget_ms, "host driver started");
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let frame_start = Instant::now();
                        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                        host.event_loop().advance_to(origin + elapsed_ms);
                        host.render_frame();
                        let spent = frame_start.elapsed().as_secs_f64() * 1000.0;
                        host.run_idle_period((budget_ms - spent).max(0.0));
                        frames += 1;
                    }
                }
            }
            debug!(frames, "host driver stopped");
            frames
        });

        DriverHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}
