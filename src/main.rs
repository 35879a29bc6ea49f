use anyhow::{anyhow, Context};
use futures::FutureExt;
use page_vitals::host::{HostDriver, PerformanceEntry};
use page_vitals::{
    CleanupOptions, Host, HostFeatures, MonitoringOptions, PageVitals, PreloadOptions,
    VitalsConfig,
};
use std::env;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    Fast,
    Slow,
}

#[derive(Debug, Clone)]
struct AppConfig {
    config_path: Option<PathBuf>,
    scenario: Scenario,
    realtime: bool,
    log_level: Level,
}

impl AppConfig {
    fn from_args() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    if i + 1 < args.len() {
                        config.config_path = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--scenario" => {
                    if i + 1 < args.len() {
                        config.scenario = match args[i + 1].as_str() {
                            "slow" => Scenario::Slow,
                            _ => Scenario::Fast,
                        };
                        i += 1;
                    }
                }
                "--realtime" => config.realtime = true,
                "--debug" => config.log_level = Level::DEBUG,
                "--trace" => config.log_level = Level::TRACE,
                _ => {}
            }
            i += 1;
        }

        config
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            scenario: Scenario::Fast,
            realtime: false,
            log_level: Level::INFO,
        }
    }
}

/// Milestones of one simulated page lifetime, in page-relative milliseconds.
struct PageScript {
    request_start: f64,
    response_start: f64,
    first_contentful_paint: f64,
    largest_paints: &'static [(f64, u64)],
    layout_shifts: &'static [(f64, f64, bool)],
    dom_content_loaded: f64,
    long_tasks: &'static [(f64, f64)],
    load: f64,
    first_input: (f64, f64),
    interactions: &'static [(&'static str, f64, f64, f64)],
}

impl Scenario {
    fn script(self) -> PageScript {
        match self {
            Scenario::Fast => PageScript {
                request_start: 5.0,
                response_start: 180.0,
                first_contentful_paint: 650.0,
                largest_paints: &[(700.0, 12_000), (1_100.0, 64_000)],
                layout_shifts: &[(720.0, 0.02, false), (900.0, 0.01, false)],
                dom_content_loaded: 800.0,
                long_tasks: &[(820.0, 70.0), (1_400.0, 55.0)],
                load: 1_300.0,
                first_input: (2_000.0, 2_012.0),
                interactions: &[("click", 2_000.0, 12.0, 60.0), ("keydown", 2_600.0, 4.0, 40.0)],
            },
            Scenario::Slow => PageScript {
                request_start: 20.0,
                response_start: 1_400.0,
                first_contentful_paint: 2_300.0,
                largest_paints: &[(2_400.0, 9_000), (4_600.0, 250_000)],
                layout_shifts: &[(2_500.0, 0.12, false), (2_900.0, 0.3, true), (3_100.0, 0.09, false)],
                dom_content_loaded: 2_800.0,
                long_tasks: &[(2_850.0, 420.0), (3_500.0, 180.0), (5_200.0, 260.0)],
                load: 5_000.0,
                first_input: (5_300.0, 5_480.0),
                interactions: &[("click", 5_300.0, 180.0, 220.0), ("pointerdown", 6_100.0, 30.0, 90.0)],
            },
        }
    }
}

const FRAME_MS: f64 = 16.0;

/// Move the page clock to `at`, either by stepping the virtual clock frame by
/// frame or by waiting for the real-time driver to get there.
async fn until(host: &Host, at: f64, realtime: bool) {
    let remaining = at - host.now();
    if remaining <= 0.0 {
        return;
    }
    if realtime {
        tokio::time::sleep(Duration::from_secs_f64(remaining / 1000.0)).await;
        return;
    }
    while host.now() < at {
        let next = (host.now() + FRAME_MS).min(at);
        host.event_loop().advance_to(next);
        host.render_frame();
        host.run_idle_period(FRAME_MS / 4.0);
    }
}

async fn run_page(vitals: &PageVitals, scenario: Scenario, realtime: bool) -> anyhow::Result<()> {
    let host = vitals.host().clone();
    let script = scenario.script();
    let restores = Arc::new(AtomicUsize::new(0));

    let monitoring = vitals.init_performance_monitoring(
        MonitoringOptions::from(vitals.config()).with_on_metric_update(|sample| {
            info!(metric = %sample.name, value = sample.value, rating = %sample.rating, "metric update");
        }),
    );

    let counter = restores.clone();
    let restore_sub = vitals.handle_bfcache_restore(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        &vitals.restore_options(),
    );
    let cleanup_sub = vitals.setup_bfcache_cleanup(
        || info!("flushing pending analytics before unload"),
        &CleanupOptions::default(),
    );
    let preload_sub = vitals.preload_on_bfcache(
        vec!["/api/session".to_string(), "/api/feed".to_string()],
        PreloadOptions::default(),
    );

    let perf = host.performance();
    host.commit_navigation(script.request_start, script.response_start);

    until(&host, script.first_contentful_paint, realtime).await;
    perf.record_entry(PerformanceEntry::paint("first-paint", script.first_contentful_paint));
    perf.record_entry(PerformanceEntry::paint(
        "first-contentful-paint",
        script.first_contentful_paint,
    ));

    for &(at, size) in script.largest_paints {
        until(&host, at, realtime).await;
        perf.record_entry(PerformanceEntry::largest_contentful_paint(at, at, 0.0, size));
    }
    for &(at, value, had_recent_input) in script.layout_shifts {
        until(&host, at, realtime).await;
        perf.record_entry(PerformanceEntry::layout_shift(at, value, had_recent_input));
    }

    until(&host, script.dom_content_loaded, realtime).await;
    host.dom_content_loaded();
    for &(at, duration) in script.long_tasks {
        until(&host, at + duration, realtime).await;
        perf.record_entry(PerformanceEntry::long_task(at, duration));
    }

    until(&host, script.load, realtime).await;
    host.load();

    let (input_at, processing_start) = script.first_input;
    until(&host, processing_start, realtime).await;
    perf.record_entry(PerformanceEntry::first_input("click", input_at, processing_start));
    for &(name, at, delay, duration) in script.interactions {
        until(&host, at + delay + duration, realtime).await;
        perf.record_entry(PerformanceEntry::event(name, at, delay, duration));
    }

    // Back/forward round trip, then a real unload.
    let leave_at = host.now() + 1_000.0;
    until(&host, leave_at, realtime).await;
    host.page_hide(true);
    until(&host, leave_at + 3_000.0, realtime).await;
    host.page_show(true);
    until(&host, leave_at + 6_000.0, realtime).await;
    host.page_hide(false);

    if restores.load(Ordering::SeqCst) == 0 && vitals.is_bfcache_supported() {
        warn!("restore callback did not run after the bfcache round trip");
    }

    restore_sub.unsubscribe();
    cleanup_sub.unsubscribe();
    preload_sub.unsubscribe();
    monitoring.cleanup();
    Ok(())
}

fn setup_logging(level: Level) -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_config = AppConfig::from_args();
    setup_logging(app_config.log_level)?;

    let config = match &app_config.config_path {
        Some(path) => VitalsConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => VitalsConfig::default(),
    };

    info!(scenario = ?app_config.scenario, realtime = app_config.realtime, "starting page-vitals");
    let started = Instant::now();

    let host = Host::build(HostFeatures::full(), None, "https://example.com/");
    let vitals = PageVitals::new(host.clone(), config)?;

    let driver = app_config
        .realtime
        .then(|| HostDriver::new(host.clone()).spawn());

    let outcome = tokio::select! {
        res = AssertUnwindSafe(run_page(&vitals, app_config.scenario, app_config.realtime)).catch_unwind() => {
            res.map_err(|_| anyhow!("page simulation panicked"))?
        }
        _ = signal::ctrl_c() => {
            warn!("interrupted; reporting what was collected so far");
            Ok(())
        }
    };

    if let Some(driver) = driver {
        let frames = driver.stop().await;
        info!(frames, "real-time driver stopped");
    }
    if let Err(e) = &outcome {
        error!("page simulation failed: {e:#}");
    }
    outcome?;

    let report = vitals.snapshot();
    println!("{}", serde_json::to_string_pretty(&report)?);
    info!("finished in {:?}", started.elapsed());
    Ok(())
}
