use page_vitals::host::HostFeatures;
use page_vitals::scheduler::{IDLE_TIMEOUT_LOW_MS, IDLE_TIMEOUT_NORMAL_MS};
use page_vitals::{Callback, Capabilities, Host, Priority, ScheduleOptions, Scheduler, SchedulerBackend};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Callback) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let make = move |label: &'static str| -> Callback {
        let sink = sink.clone();
        Arc::new(move || sink.lock().push(label))
    };
    (log, make)
}

fn options(idle: bool, frame: bool, priority: Priority) -> ScheduleOptions {
    ScheduleOptions {
        use_idle_callback: idle,
        use_animation_frame: frame,
        priority,
    }
}

#[test]
fn test_backend_selection_on_full_host() {
    let host = Host::new(HostFeatures::full());
    let scheduler = Scheduler::new(&host);

    assert_eq!(
        scheduler.select_backend(&options(true, true, Priority::High)),
        SchedulerBackend::AnimationFrame
    );
    assert_eq!(
        scheduler.select_backend(&options(true, false, Priority::Normal)),
        SchedulerBackend::IdleCallback {
            timeout_ms: IDLE_TIMEOUT_NORMAL_MS
        }
    );
    assert_eq!(
        scheduler.select_backend(&options(true, false, Priority::Low)),
        SchedulerBackend::IdleCallback {
            timeout_ms: IDLE_TIMEOUT_LOW_MS
        }
    );
    assert_eq!(
        scheduler.select_backend(&options(true, false, Priority::High)),
        SchedulerBackend::Microtask
    );
    assert_eq!(
        scheduler.select_backend(&options(false, false, Priority::Normal)),
        SchedulerBackend::Timer
    );
}

#[test]
fn test_backend_selection_degrades_without_features() {
    let host = Host::new(HostFeatures::minimal());
    let scheduler = Scheduler::new(&host);

    assert_eq!(
        scheduler.select_backend(&options(true, true, Priority::Normal)),
        SchedulerBackend::Timer
    );
    assert_eq!(
        scheduler.select_backend(&options(true, true, Priority::High)),
        SchedulerBackend::Microtask
    );
}

#[test]
fn test_dispatcher_is_not_memoized() {
    let host = Host::new(HostFeatures::full());
    let scheduler = Scheduler::new(&host);
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let dispatcher = scheduler.schedule(
        Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }),
        &options(false, false, Priority::High),
    );

    dispatcher.dispatch();
    dispatcher.dispatch();
    assert_eq!(count.load(Ordering::SeqCst), 0);
    host.run_microtasks();
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn test_idle_dispatch_runs_by_its_timeout() {
    let host = Host::new(HostFeatures::full());
    let scheduler = Scheduler::new(&host);
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let dispatcher = scheduler.schedule(
        Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }),
        &options(true, false, Priority::Low),
    );

    dispatcher.dispatch();
    host.advance(IDLE_TIMEOUT_LOW_MS - 1);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    host.advance(1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_batch_runs_in_one_frame_in_order() {
    let host = Host::new(HostFeatures::full());
    let scheduler = Scheduler::new(&host);
    let (log, make) = recorder();

    scheduler.batch_execute(vec![make("a"), make("b"), make("c")]);
    host.run_microtasks();
    assert!(log.lock().is_empty());

    assert_eq!(host.render_frame(), 1);
    assert_eq!(*log.lock(), vec!["a", "b", "c"]);
}

#[test]
fn test_batch_isolates_a_panicking_callback() {
    let host = Host::new(HostFeatures::full());
    let scheduler = Scheduler::new(&host);
    let (log, make) = recorder();
    let failing: Callback = Arc::new(|| panic!("second callback failed"));

    scheduler.batch_execute(vec![make("first"), failing, make("third")]);
    host.render_frame();
    assert_eq!(*log.lock(), vec!["first", "third"]);
}

#[test]
fn test_batch_falls_back_to_a_microtask() {
    let host = Host::new(HostFeatures::minimal());
    let scheduler = Scheduler::new(&host);
    let (log, make) = recorder();

    scheduler.batch_execute(vec![make("x"), make("y")]);
    host.run_microtasks();
    assert_eq!(*log.lock(), vec!["x", "y"]);
}

#[test]
fn test_leading_debounce_swallows_calls_inside_the_window() {
    let host = Host::new(HostFeatures::full());
    let scheduler = Scheduler::new(&host);
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let debounced = scheduler.debounce(
        Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }),
        100,
        true,
    );

    for _ in 0..5 {
        debounced.call();
        host.advance(50);
    }
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(debounced.is_pending());

    host.advance(100);
    assert!(!debounced.is_pending());
    debounced.call();
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn test_trailing_debounce_fires_after_silence() {
    let host = Host::new(HostFeatures::full());
    let scheduler = Scheduler::new(&host);
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let debounced = scheduler.debounce(
        Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }),
        100,
        false,
    );

    debounced.call();
    host.advance(60);
    debounced.call();
    host.advance(60);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    host.advance(40);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_detached_scheduler_drops_work() {
    let scheduler = Scheduler::detached();
    assert_eq!(scheduler.capabilities(), Capabilities::default());

    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let callback: Callback = Arc::new(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    scheduler.schedule(callback.clone(), &ScheduleOptions::default()).dispatch();
    scheduler.batch_execute(vec![callback]);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_dispatch_after_page_drop_is_silent() {
    let host = Host::new(HostFeatures::full());
    let scheduler = Scheduler::new(&host);
    let dispatcher = scheduler.schedule(Arc::new(|| {}), &ScheduleOptions::default());
    drop(host);
    dispatcher.dispatch();
}
