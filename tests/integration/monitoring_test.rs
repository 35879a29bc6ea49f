use page_vitals::host::{DataLayer, EntryType, HostFeatures, PageEventType, PerformanceEntry};
use page_vitals::{
    Host, MetricName, MetricSample, MonitoringOptions, PageVitals, Rating, VitalsConfig,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn quiet_config() -> VitalsConfig {
    VitalsConfig {
        report_to_console: false,
        ..Default::default()
    }
}

fn monitored(features: HostFeatures) -> (Arc<Host>, PageVitals) {
    let host = Host::new(features);
    let vitals = PageVitals::new(host.clone(), quiet_config()).unwrap();
    vitals.init_performance_monitoring(MonitoringOptions::from(vitals.config()));
    (host, vitals)
}

/// Count how many times each metric is reported.
fn report_counter(vitals: &PageVitals) -> Arc<Mutex<Vec<MetricName>>> {
    let reports = Arc::new(Mutex::new(Vec::new()));
    for metric in MetricName::ALL {
        let log = reports.clone();
        let _ = vitals.on_metric_update(metric, move |s| log.lock().push(s.name));
    }
    reports
}

fn times(reports: &Mutex<Vec<MetricName>>, metric: MetricName) -> usize {
    reports.lock().iter().filter(|m| **m == metric).count()
}

#[test]
fn test_report_once_metrics_survive_pagehide() {
    let (host, vitals) = monitored(HostFeatures::full());
    let reports = report_counter(&vitals);
    let perf = host.performance();

    // CLS finalizes on its first qualifying batch.
    perf.record_entry(PerformanceEntry::layout_shift(100.0, 0.05, false));
    // TBT finalizes after five quiet seconds.
    perf.record_entry(PerformanceEntry::long_task(200.0, 150.0));
    host.advance(5_000);
    assert_eq!(vitals.get_metric(MetricName::Tbt).map(|s| s.value), Some(100.0));

    let cls_before = vitals.get_metric(MetricName::Cls);
    let tbt_before = vitals.get_metric(MetricName::Tbt);

    perf.record_entry(PerformanceEntry::layout_shift(6_000.0, 0.4, false));
    perf.record_entry(PerformanceEntry::long_task(6_100.0, 400.0));
    host.page_hide(true);
    host.page_hide(false);
    host.advance(10_000);

    assert_eq!(vitals.get_metric(MetricName::Cls), cls_before);
    assert_eq!(vitals.get_metric(MetricName::Tbt), tbt_before);
    assert_eq!(times(&reports, MetricName::Cls), 1);
    assert_eq!(times(&reports, MetricName::Tbt), 1);
    assert_eq!(times(&reports, MetricName::Inp), 1);
}

#[test]
fn test_pagehide_finalizes_pending_metrics() {
    let (host, vitals) = monitored(HostFeatures::full());
    let reports = report_counter(&vitals);
    let perf = host.performance();

    perf.record_entries(vec![
        PerformanceEntry::layout_shift(100.0, 0.3, true),
        PerformanceEntry::long_task(300.0, 90.0),
    ]);
    perf.record_entry(PerformanceEntry::event("pointerdown", 900.0, 20.0, 100.0));
    host.advance(1_000);
    assert!(vitals.get_metric(MetricName::Cls).is_none());
    assert!(vitals.get_metric(MetricName::Tbt).is_none());

    host.page_hide(false);
    assert_eq!(vitals.get_metric(MetricName::Cls).map(|s| s.value), Some(0.0));
    assert_eq!(vitals.get_metric(MetricName::Tbt).map(|s| s.value), Some(40.0));
    assert_eq!(vitals.get_metric(MetricName::Inp).map(|s| s.value), Some(120.0));

    // The quiet-window timer was cancelled by the pagehide.
    host.advance(10_000);
    assert_eq!(times(&reports, MetricName::Tbt), 1);
}

#[test]
fn test_inp_without_interactions_is_zero_and_good() {
    let (host, vitals) = monitored(HostFeatures::full());
    host.page_hide(false);

    let inp = vitals.get_metric(MetricName::Inp).unwrap();
    assert_eq!(inp.value, 0.0);
    assert_eq!(inp.rating, Rating::Good);
}

#[test]
fn test_lcp_stops_changing_after_pagehide() {
    let (host, vitals) = monitored(HostFeatures::full());
    let perf = host.performance();
    perf.record_entry(PerformanceEntry::largest_contentful_paint(1_000.0, 1_000.0, 0.0, 500));
    perf.record_entry(PerformanceEntry::largest_contentful_paint(2_600.0, 2_600.0, 0.0, 9_000));
    host.page_hide(true);
    perf.record_entry(PerformanceEntry::largest_contentful_paint(8_000.0, 8_000.0, 0.0, 99_000));

    let lcp = vitals.get_metric(MetricName::Lcp).unwrap();
    assert_eq!(lcp.value, 2_600.0);
    assert_eq!(lcp.rating, Rating::NeedsImprovement);
}

#[test]
fn test_entries_recorded_before_monitoring_are_buffered() {
    let host = Host::new(HostFeatures::full());
    host.performance()
        .record_entry(PerformanceEntry::paint("first-contentful-paint", 1_200.0));
    host.performance()
        .record_entry(PerformanceEntry::first_input("keydown", 3_000.0, 3_150.0));

    let vitals = PageVitals::new(host.clone(), quiet_config()).unwrap();
    vitals.init_performance_monitoring(MonitoringOptions::default());
    assert!(vitals.get_metric(MetricName::Fcp).is_none());

    host.run_microtasks();
    assert_eq!(vitals.get_metric(MetricName::Fcp).map(|s| s.value), Some(1_200.0));
    let fid = vitals.get_metric(MetricName::Fid).unwrap();
    assert_eq!(fid.value, 150.0);
    assert_eq!(fid.rating, Rating::NeedsImprovement);
}

#[test]
fn test_ttfb_reported_immediately_when_already_loaded() {
    let host = Host::new(HostFeatures::full());
    host.commit_navigation(0.0, 950.0);
    host.advance(1_500);
    host.load();

    let vitals = PageVitals::new(host.clone(), quiet_config()).unwrap();
    vitals.init_performance_monitoring(MonitoringOptions::default());

    let ttfb = vitals.get_metric(MetricName::Ttfb).unwrap();
    assert_eq!(ttfb.value, 950.0);
    assert_eq!(ttfb.rating, Rating::NeedsImprovement);
    assert_eq!(host.listener_count(PageEventType::Load), 0);
}

#[test]
fn test_unsupported_observers_are_skipped() {
    let features = HostFeatures::full()
        .without_entry_type(EntryType::Event)
        .without_entry_type(EntryType::Longtask);
    let (host, vitals) = monitored(features);
    assert_eq!(host.performance().observer_count(), 4);

    host.performance()
        .record_entry(PerformanceEntry::layout_shift(10.0, 0.01, false));
    host.page_hide(false);

    let metrics = vitals.get_performance_metrics();
    assert!(metrics.contains_key(&MetricName::Cls));
    // Without their observers, INP and TBT never report.
    assert!(!metrics.contains_key(&MetricName::Inp));
    assert!(!metrics.contains_key(&MetricName::Tbt));
}

#[test]
fn test_score_counts_only_observed_metrics() {
    let features = HostFeatures::full()
        .without_entry_type(EntryType::Event)
        .without_entry_type(EntryType::Longtask)
        .without_entry_type(EntryType::LayoutShift);
    let (host, vitals) = monitored(features);

    host.performance()
        .record_entry(PerformanceEntry::paint("first-contentful-paint", 3_000.0));
    host.page_hide(false);

    let metrics = vitals.get_performance_metrics();
    assert_eq!(metrics.keys().copied().collect::<Vec<_>>(), vec![MetricName::Fcp]);
    let score = vitals.get_performance_score();
    assert_eq!(score.score, 0);
    assert_eq!(score.available_metrics, 1);
}

#[test]
fn test_reinitializing_keeps_finalized_metrics() {
    let (host, vitals) = monitored(HostFeatures::full());
    let reports = report_counter(&vitals);
    let perf = host.performance();

    perf.record_entry(PerformanceEntry::layout_shift(100.0, 0.05, false));
    let cls = vitals.get_metric(MetricName::Cls).unwrap();
    perf.record_entry(PerformanceEntry::layout_shift(400.0, 0.4, false));
    host.page_hide(false);

    vitals.init_performance_monitoring(MonitoringOptions::from(vitals.config()));
    host.run_microtasks();
    host.page_hide(false);

    assert_eq!(vitals.get_metric(MetricName::Cls), Some(cls));
    assert_eq!(times(&reports, MetricName::Cls), 1);
    assert_eq!(times(&reports, MetricName::Inp), 1);
    assert_eq!(times(&reports, MetricName::Tbt), 1);
}

#[test]
fn test_host_without_observers_reports_nothing_until_load() {
    let (host, vitals) = monitored(HostFeatures::minimal());
    assert_eq!(host.performance().observer_count(), 0);
    assert!(vitals.get_performance_metrics().is_empty());

    host.commit_navigation(10.0, 110.0);
    host.load();
    assert_eq!(vitals.get_performance_metrics().len(), 1);
    assert_eq!(vitals.get_performance_score().available_metrics, 1);
}

#[test]
fn test_cleanup_removes_only_its_own_listeners() {
    let host = Host::new(HostFeatures::full());
    let vitals = PageVitals::new(host.clone(), quiet_config()).unwrap();
    let unload = vitals.setup_bfcache_cleanup(|| {}, &Default::default());
    let handle = vitals.init_performance_monitoring(MonitoringOptions::default());
    assert_eq!(host.listener_count(PageEventType::PageHide), 2);

    handle.cleanup();
    handle.cleanup();
    assert_eq!(host.listener_count(PageEventType::PageHide), 1);
    assert_eq!(host.listener_count(PageEventType::Load), 0);
    assert_eq!(host.performance().observer_count(), 0);
    unload.unsubscribe();
}

#[test]
fn test_metric_callbacks_may_panic() {
    let host = Host::new(HostFeatures::full());
    let vitals = PageVitals::new(host.clone(), quiet_config()).unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    vitals.init_performance_monitoring(
        MonitoringOptions::default().with_on_metric_update(|_: &MetricSample| panic!("dashboard bug")),
    );
    let _first = vitals.on_metric_update(MetricName::Fcp, |_| panic!("widget bug"));
    let _second = vitals.on_metric_update(MetricName::Fcp, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    host.performance()
        .record_entry(PerformanceEntry::paint("first-contentful-paint", 400.0));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(vitals.get_metric(MetricName::Fcp).is_some());
}

#[test]
fn test_analytics_queue_receives_every_report() {
    let data_layer = DataLayer::new();
    let host = Host::with_data_layer(HostFeatures::full(), data_layer.clone());
    let vitals = PageVitals::new(host.clone(), quiet_config()).unwrap();
    vitals.init_performance_monitoring(MonitoringOptions::from(vitals.config()));

    host.performance().record_entries(vec![
        PerformanceEntry::paint("first-contentful-paint", 500.0),
        PerformanceEntry::largest_contentful_paint(600.0, 600.0, 0.0, 4_000),
    ]);
    host.page_hide(false);

    let names: Vec<String> = data_layer
        .events()
        .iter()
        .filter_map(|e| e["metric_name"].as_str().map(str::to_string))
        .collect();
    for expected in ["FCP", "LCP", "CLS", "INP", "TBT"] {
        assert!(names.iter().any(|n| n == expected), "missing {expected} in {names:?}");
    }
}
