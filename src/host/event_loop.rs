//! Deterministic single-page event loop.
//!
//! The loop owns a virtual millisecond clock and the four queues a page
//! script can reach: microtasks, timers, idle callbacks and animation frames.
//! Nothing runs until the embedder pumps the loop (`advance`, `render_frame`,
//! `run_idle_period`, `run_microtasks`), which keeps every ordering decision
//! reproducible in tests. Queue locks are never held while a task runs.

use crate::{catch_callback_panic, Result, VitalsError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, error};

pub type Task = Box<dyn FnOnce() + Send + 'static>;
pub type FrameTask = Box<dyn FnOnce(f64) + Send + 'static>;
pub type IdleTask = Box<dyn FnOnce(IdleDeadline) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdleId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(u64);

/// Passed to idle callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdleDeadline {
    pub did_timeout: bool,
    pub time_remaining_ms: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTasks {
    pub microtasks: usize,
    pub timers: usize,
    pub idle_callbacks: usize,
    pub animation_frames: usize,
}

enum TimerTask {
    User(Task),
    IdleTimeout(u64),
}

struct PendingIdle {
    task: IdleTask,
    timeout_key: Option<(u64, u64)>,
}

#[derive(Default)]
struct LoopState {
    now_ms: f64,
    next_id: u64,
    microtasks: VecDeque<Task>,
    // Keyed by (due time in microseconds, id) so equal deadlines keep insertion order.
    timers: BTreeMap<(u64, u64), TimerTask>,
    timer_keys: HashMap<u64, (u64, u64)>,
    idle: BTreeMap<u64, PendingIdle>,
    frames: BTreeMap<u64, FrameTask>,
}

impl LoopState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_timer(&mut self, delay_ms: f64, task: TimerTask) -> u64 {
        let id = self.allocate_id();
        let due = self.now_ms + delay_ms.max(0.0);
        let key = (to_micros(due), id);
        self.timers.insert(key, task);
        self.timer_keys.insert(id, key);
        id
    }

    fn remove_timer(&mut self, id: u64) -> bool {
        match self.timer_keys.remove(&id) {
            Some(key) => self.timers.remove(&key).is_some(),
            None => false,
        }
    }
}

fn to_micros(ms: f64) -> u64 {
    (ms.max(0.0) * 1000.0).round() as u64
}

pub struct EventLoop {
    state: Mutex<LoopState>,
    idle_supported: bool,
    frames_supported: bool,
}

impl EventLoop {
    pub fn new(idle_supported: bool, frames_supported: bool) -> Self {
        Self {
            state: Mutex::new(LoopState::default()),
            idle_supported,
            frames_supported,
        }
    }

    pub fn now(&self) -> f64 {
        self.state.lock().now_ms
    }

    pub fn queue_microtask(&self, task: Task) {
        self.state.lock().microtasks.push_back(task);
    }

    pub fn set_timeout(&self, delay_ms: u64, task: Task) -> TimerId {
        let id = self
            .state
            .lock()
            .insert_timer(delay_ms as f64, TimerTask::User(task));
        TimerId(id)
    }

    /// Returns `false` when the timer already fired or was cleared.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.state.lock().remove_timer(id.0)
    }

    pub fn request_idle_callback(&self, task: IdleTask, timeout_ms: Option<u64>) -> Result<IdleId> {
        if !self.idle_supported {
            return Err(VitalsError::Unsupported("requestIdleCallback".to_string()));
        }
        let mut state = self.state.lock();
        let id = state.allocate_id();
        let timeout_key = timeout_ms.map(|timeout| {
            let timer = state.insert_timer(timeout as f64, TimerTask::IdleTimeout(id));
            state.timer_keys[&timer]
        });
        state.idle.insert(id, PendingIdle { task, timeout_key });
        Ok(IdleId(id))
    }

    pub fn cancel_idle_callback(&self, id: IdleId) -> bool {
        let mut state = self.state.lock();
        match state.idle.remove(&id.0) {
            Some(pending) => {
                if let Some(key) = pending.timeout_key {
                    state.timer_keys.remove(&key.1);
                    state.timers.remove(&key);
                }
                true
            }
            None => false,
        }
    }

    pub fn request_animation_frame(&self, task: FrameTask) -> Result<FrameId> {
        if !self.frames_supported {
            return Err(VitalsError::Unsupported("requestAnimationFrame".to_string()));
        }
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.frames.insert(id, task);
        Ok(FrameId(id))
    }

    pub fn cancel_animation_frame(&self, id: FrameId) -> bool {
        self.state.lock().frames.remove(&id.0).is_some()
    }

    /// Drain the microtask queue, including microtasks queued while draining.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.state.lock().microtasks.pop_front();
            let Some(task) = task else { break };
            run_task("microtask", task);
            ran += 1;
        }
        ran
    }

    /// Move the clock forward, firing every timer that falls due on the way
    /// in deadline order. Each task is followed by a microtask checkpoint.
    pub fn advance(&self, ms: u64) -> usize {
        let target = self.now() + ms as f64;
        self.advance_to(target)
    }

    pub fn advance_to(&self, target_ms: f64) -> usize {
        self.run_microtasks();
        let target_key = to_micros(target_ms);
        let mut fired = 0;
        loop {
            let next = {
                let mut state = self.state.lock();
                let key = match state.timers.keys().next() {
                    Some(key) if key.0 <= target_key => *key,
                    _ => break,
                };
                let task = state.timers.remove(&key);
                state.timer_keys.remove(&key.1);
                let due_ms = key.0 as f64 / 1000.0;
                if due_ms > state.now_ms {
                    state.now_ms = due_ms;
                }
                match task {
                    Some(TimerTask::User(task)) => Some(Ready::Task(task)),
                    Some(TimerTask::IdleTimeout(idle_id)) => state
                        .idle
                        .remove(&idle_id)
                        .map(|pending| Ready::Idle(pending.task)),
                    None => None,
                }
            };

            match next {
                Some(Ready::Task(task)) => run_task("timer", task),
                Some(Ready::Idle(task)) => {
                    debug!("idle callback forced by its timeout");
                    run_task("idle callback", move || {
                        task(IdleDeadline {
                            did_timeout: true,
                            time_remaining_ms: 0.0,
                        })
                    });
                }
                None => continue,
            }
            fired += 1;
            self.run_microtasks();
        }

        let mut state = self.state.lock();
        if target_ms > state.now_ms {
            state.now_ms = target_ms;
        }
        fired
    }

    /// Run the callbacks queued before this frame began. Callbacks requested
    /// from inside the frame wait for the next one.
    pub fn render_frame(&self) -> usize {
        self.run_microtasks();
        let (frames, timestamp) = {
            let mut state = self.state.lock();
            (std::mem::take(&mut state.frames), state.now_ms)
        };
        let ran = frames.len();
        for (_, task) in frames {
            run_task("animation frame", move || task(timestamp));
            self.run_microtasks();
        }
        ran
    }

    /// Grant an idle period to every idle callback pending when it starts.
    pub fn run_idle_period(&self, budget_ms: f64) -> usize {
        self.run_microtasks();
        let pending = {
            let mut state = self.state.lock();
            let pending = std::mem::take(&mut state.idle);
            for entry in pending.values() {
                if let Some(key) = entry.timeout_key {
                    state.timer_keys.remove(&key.1);
                    state.timers.remove(&key);
                }
            }
            pending
        };
        let ran = pending.len();
        for (_, entry) in pending {
            let task = entry.task;
            run_task("idle callback", move || {
                task(IdleDeadline {
                    did_timeout: false,
                    time_remaining_ms: budget_ms.max(0.0),
                })
            });
            self.run_microtasks();
        }
        ran
    }

    pub fn pending_tasks(&self) -> PendingTasks {
        let state = self.state.lock();
        let idle_timeouts = state
            .timers
            .values()
            .filter(|t| matches!(t, TimerTask::IdleTimeout(_)))
            .count();
        PendingTasks {
            microtasks: state.microtasks.len(),
            timers: state.timers.len() - idle_timeouts,
            idle_callbacks: state.idle.len(),
            animation_frames: state.frames.len(),
        }
    }
}

enum Ready {
    Task(Task),
    Idle(IdleTask),
}

fn run_task<F: FnOnce()>(kind: &str, task: F) {
    if let Err(err) = catch_callback_panic(task) {
        error!(kind, "uncaught error in scheduled task: {err}");
    }
}
