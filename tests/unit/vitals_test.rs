use page_vitals::vitals::{
    scoring, MetricReporter, MetricStore, RecommendationPriority, SubscriberRegistry,
    NEEDS_IMPROVEMENT_FACTOR,
};
use page_vitals::host::{DataLayer, HostFeatures};
use page_vitals::{Host, MetricName, MetricSample, Rating, Thresholds};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;

fn metric() -> impl Strategy<Value = MetricName> {
    prop::sample::select(MetricName::ALL.to_vec())
}

fn rank(rating: Rating) -> u8 {
    match rating {
        Rating::Good => 0,
        Rating::NeedsImprovement => 1,
        Rating::Poor => 2,
    }
}

proptest! {
    #[test]
    fn prop_rating_is_monotonic(name in metric(), a in 0.0f64..20_000.0, b in 0.0f64..20_000.0) {
        let thresholds = Thresholds::default();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(rank(thresholds.rate(name, low)) <= rank(thresholds.rate(name, high)));
    }

    #[test]
    fn prop_rating_bands_follow_the_multiplier(name in metric(), factor in 0.0f64..3.0) {
        let thresholds = Thresholds::default();
        let threshold = thresholds.get(name);
        let rating = thresholds.rate(name, threshold * factor);
        let expected = if threshold * factor <= threshold {
            Rating::Good
        } else if threshold * factor <= threshold * NEEDS_IMPROVEMENT_FACTOR {
            Rating::NeedsImprovement
        } else {
            Rating::Poor
        };
        prop_assert_eq!(rating, expected);
    }
}

fn reporter(host: &Arc<Host>) -> (Arc<MetricStore>, MetricReporter) {
    let store = Arc::new(MetricStore::new());
    let reporter = MetricReporter::new(
        store.clone(),
        SubscriberRegistry::new(),
        Arc::downgrade(host),
        Thresholds::default(),
    );
    (store, reporter)
}

#[test]
fn test_lcp_rating_examples() {
    let host = Host::new(HostFeatures::full());
    let (store, reporter) = reporter(&host);

    assert_eq!(reporter.report(MetricName::Lcp, 1200.0).rating, Rating::Good);
    assert_eq!(reporter.report(MetricName::Lcp, 4000.0).rating, Rating::Poor);
    assert_eq!(store.get(MetricName::Lcp).map(|s| s.rating), Some(Rating::Poor));
}

#[test]
fn test_score_ignores_missing_metrics() {
    let host = Host::new(HostFeatures::full());
    let (store, reporter) = reporter(&host);
    reporter.report_metric(MetricName::Lcp, 1000.0, Rating::Good);
    reporter.report_metric(MetricName::Cls, 0.5, Rating::Poor);

    let score = store.score();
    assert_eq!(score.score, 50);
    assert_eq!(score.available_metrics, 2);
    assert_eq!(
        score.breakdown.into_iter().collect::<Vec<_>>(),
        vec![(MetricName::Lcp, 100), (MetricName::Cls, 0)]
    );
}

#[test]
fn test_score_rounds_the_mean() {
    let host = Host::new(HostFeatures::full());
    let (store, reporter) = reporter(&host);
    reporter.report_metric(MetricName::Lcp, 0.0, Rating::Good);
    reporter.report_metric(MetricName::Fcp, 0.0, Rating::Good);
    reporter.report_metric(MetricName::Ttfb, 0.0, Rating::NeedsImprovement);

    // (100 + 100 + 50) / 3 = 83.33
    assert_eq!(store.score().score, 83);
}

#[test]
fn test_recommendations_cover_only_non_good_metrics() {
    let host = Host::new(HostFeatures::full());
    let (store, reporter) = reporter(&host);
    reporter.report(MetricName::Inp, 250.0);
    reporter.report(MetricName::Tbt, 900.0);
    reporter.report(MetricName::Fcp, 1000.0);

    let recs = store.recommendations();
    assert_eq!(recs.len(), 2);
    assert_eq!(recs[0].metric, MetricName::Tbt);
    assert_eq!(recs[0].priority, RecommendationPriority::High);
    assert_eq!(recs[1].metric, MetricName::Inp);
    assert_eq!(recs[1].priority, RecommendationPriority::Medium);
    assert!(recs.iter().all(|r| !r.message.is_empty()));
}

#[test]
fn test_empty_store_has_no_score_or_advice() {
    let store = MetricStore::new();
    assert_eq!(store.score().score, 0);
    assert!(store.recommendations().is_empty());
    assert!(scoring::recommendations(&store.all()).is_empty());
}

#[test]
fn test_analytics_event_shape() {
    let data_layer = DataLayer::new();
    let host = Host::with_data_layer(HostFeatures::full(), data_layer.clone());
    let (_, reporter) = reporter(&host);
    let reporter = reporter.with_analytics(true);

    let sample: MetricSample = reporter.report(MetricName::Ttfb, 950.0);
    let events = data_layer.events();
    assert_eq!(events.len(), 1);

    let event = &events[0];
    assert_eq!(event["event"], "web_vitals");
    assert_eq!(event["metric_name"], "TTFB");
    assert_eq!(event["metric_value"], 950.0);
    assert_eq!(event["metric_rating"], "needs-improvement");
    let id = event["metric_id"].as_str().unwrap_or_default();
    assert!(id.starts_with(&format!("TTFB-{}-", sample.timestamp)));
}

#[test]
fn test_custom_thresholds_change_ratings() {
    let host = Host::new(HostFeatures::full());
    let store = Arc::new(MetricStore::new());
    let reporter = MetricReporter::new(
        store,
        SubscriberRegistry::new(),
        Arc::downgrade(&host),
        Thresholds {
            lcp: 4000.0,
            ..Default::default()
        },
    );
    assert_eq!(reporter.report(MetricName::Lcp, 3900.0).rating, Rating::Good);
}

#[test]
fn test_metric_names_parse_case_insensitively() {
    assert_eq!("lcp".parse::<MetricName>().ok(), Some(MetricName::Lcp));
    assert_eq!("Ttfb".parse::<MetricName>().ok(), Some(MetricName::Ttfb));
    assert!("SI".parse::<MetricName>().is_err());
}
