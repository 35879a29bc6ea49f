use page_vitals::host::{DataLayer, HostDriver, HostFeatures, PerformanceEntry};
use page_vitals::{
    CleanupOptions, Host, MetricName, MonitoringOptions, PageVitals, PreloadOptions, Rating,
    VitalsConfig, VitalsError,
};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn step(host: &Host, ms: u64) {
    for _ in 0..(ms / 16).max(1) {
        host.advance(16);
        host.render_frame();
        host.run_idle_period(4.0);
    }
}

#[test]
fn test_full_page_lifetime() {
    let data_layer = DataLayer::new();
    let host = Host::build(HostFeatures::full(), Some(data_layer.clone()), "https://shop.test/");
    let vitals = PageVitals::new(host.clone(), VitalsConfig::default()).unwrap();
    let updates = Arc::new(AtomicUsize::new(0));
    let counter = updates.clone();
    let monitoring = vitals.init_performance_monitoring(
        MonitoringOptions::from(vitals.config()).with_on_metric_update(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let restores = Arc::new(AtomicUsize::new(0));
    let r = restores.clone();
    let restore = vitals.handle_bfcache_restore(
        move || {
            r.fetch_add(1, Ordering::SeqCst);
        },
        &vitals.restore_options(),
    );
    let unloads = Arc::new(AtomicUsize::new(0));
    let u = unloads.clone();
    let cleanup = vitals.setup_bfcache_cleanup(
        move || {
            u.fetch_add(1, Ordering::SeqCst);
        },
        &CleanupOptions {
            critical: true,
            ..Default::default()
        },
    );
    let preload = vitals.preload_on_bfcache(vec!["/api/cart".to_string()], PreloadOptions::default());

    let perf = host.performance();
    host.commit_navigation(4.0, 204.0);
    step(&host, 600);
    perf.record_entry(PerformanceEntry::paint("first-contentful-paint", host.now()));
    perf.record_entry(PerformanceEntry::largest_contentful_paint(host.now(), host.now(), 0.0, 30_000));
    step(&host, 200);
    host.dom_content_loaded();
    perf.record_entry(PerformanceEntry::long_task(host.now(), 120.0));
    step(&host, 400);
    host.load();
    perf.record_entry(PerformanceEntry::first_input("click", host.now(), host.now() + 8.0));
    perf.record_entry(PerformanceEntry::event("click", host.now(), 8.0, 64.0));
    step(&host, 6_000);

    host.page_hide(true);
    step(&host, 1_000);
    host.page_show(true);
    step(&host, 3_000);
    assert_eq!(restores.load(Ordering::SeqCst), 1);
    assert_eq!(host.resource_hints().len(), 1);

    host.page_hide(false);
    assert_eq!(unloads.load(Ordering::SeqCst), 1);

    let report = vitals.snapshot();
    assert_eq!(report.url, "https://shop.test/");
    assert_eq!(report.metrics.len(), 7);
    assert_eq!(report.score.available_metrics, 7);
    assert_eq!(report.metrics[&MetricName::Tbt].value, 70.0);
    assert_eq!(report.metrics[&MetricName::Inp].value, 72.0);
    assert_eq!(report.metrics[&MetricName::Ttfb].value, 200.0);
    assert!(report.metrics.values().all(|s| s.rating == Rating::Good));
    assert_eq!(report.score.score, 100);
    assert!(report.recommendations.is_empty());
    assert_eq!(report.bfcache.restores, 1);
    assert_eq!(report.bfcache.unloads, 1);
    assert!(report.monitoring_active);

    assert_eq!(updates.load(Ordering::SeqCst), 7);
    assert_eq!(data_layer.len(), 7);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["metrics"]["LCP"]["rating"], "good");

    restore.unsubscribe();
    cleanup.unsubscribe();
    preload.unsubscribe();
    monitoring.cleanup();
    assert!(!vitals.snapshot().monitoring_active);
    assert_eq!(vitals.get_bfcache_stats().restore_callbacks, 0);
}

#[test]
fn test_slow_page_gets_recommendations() {
    let host = Host::new(HostFeatures::full());
    let vitals = PageVitals::new(host.clone(), VitalsConfig::default()).unwrap();
    vitals.init_performance_monitoring(MonitoringOptions::default());

    let perf = host.performance();
    host.commit_navigation(0.0, 1_900.0);
    perf.record_entry(PerformanceEntry::paint("first-contentful-paint", 3_100.0));
    perf.record_entry(PerformanceEntry::largest_contentful_paint(5_200.0, 5_200.0, 0.0, 250_000));
    perf.record_entry(PerformanceEntry::layout_shift(3_300.0, 0.12, false));
    host.load();
    host.page_hide(false);

    let recs = vitals.get_performance_recommendations();
    let metrics: Vec<MetricName> = recs.iter().map(|r| r.metric).collect();
    assert_eq!(
        metrics,
        vec![MetricName::Lcp, MetricName::Fcp, MetricName::Ttfb, MetricName::Cls]
    );
    assert!(vitals.get_performance_score().score < 50);
}

#[test]
fn test_config_loaded_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "report_to_console": false,
            "report_to_analytics": false,
            "thresholds": {{ "lcp": 4000 }},
            "tbt_quiet_window_ms": 1000,
            "restore_label": "spa-restore"
        }}"#
    )
    .unwrap();

    let config = VitalsConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.thresholds.lcp, 4000.0);
    assert_eq!(config.thresholds.inp, 200.0);
    assert_eq!(config.tbt_quiet_window_ms, 1000);

    let host = Host::new(HostFeatures::full());
    let vitals = PageVitals::new(host.clone(), config).unwrap();
    assert_eq!(vitals.restore_options().label, "spa-restore");
    vitals.init_performance_monitoring(MonitoringOptions::from(vitals.config()));

    host.performance()
        .record_entry(PerformanceEntry::largest_contentful_paint(3_000.0, 3_000.0, 0.0, 1_000));
    host.performance()
        .record_entry(PerformanceEntry::long_task(100.0, 80.0));
    host.advance(1_000);

    assert_eq!(vitals.get_metric(MetricName::Lcp).unwrap().rating, Rating::Good);
    assert_eq!(vitals.get_metric(MetricName::Tbt).unwrap().value, 30.0);
}

#[test]
fn test_bad_config_files_are_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{ "thresholds": {{ "cls": -0.5 }} }}"#).unwrap();
    assert!(matches!(
        VitalsConfig::from_json_file(file.path()),
        Err(VitalsError::Config(_))
    ));

    let mut garbage = tempfile::NamedTempFile::new().unwrap();
    write!(garbage, "not json").unwrap();
    assert!(VitalsConfig::from_json_file(garbage.path()).is_err());

    let dir = tempfile::tempdir().unwrap();
    assert!(VitalsConfig::from_json_file(dir.path().join("missing.json")).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_driver_runs_restore_callbacks_in_real_time() {
    let host = Host::new(HostFeatures::full());
    let vitals = PageVitals::new(host.clone(), VitalsConfig::default()).unwrap();
    let restores = Arc::new(AtomicUsize::new(0));
    let r = restores.clone();
    let _restore = vitals.handle_bfcache_restore(
        move || {
            r.fetch_add(1, Ordering::SeqCst);
        },
        &vitals.restore_options(),
    );

    let driver = HostDriver::new(host.clone()).spawn();
    host.page_hide(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    host.page_show(true);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let frames = driver.stop().await;

    assert!(frames > 0);
    assert_eq!(restores.load(Ordering::SeqCst), 1);
}
