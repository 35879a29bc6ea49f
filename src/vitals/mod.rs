//! Core Web Vitals: metric names, ratings, collection and reporting.

pub mod collector;
pub mod reporter;
pub mod scoring;
pub mod store;

pub use collector::{
    init_performance_monitoring, CollectorSettings, MonitoringHandle, MonitoringOptions,
};
pub use reporter::{AnalyticsEvent, MetricReporter};
pub use scoring::{PerformanceScore, Recommendation, RecommendationPriority};
pub use store::{MetricCallback, MetricStore, SubscriberRegistry};

use crate::VitalsError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound of "needs improvement", as a multiple of the good threshold.
/// Applied to every metric alike, CLS included.
pub const NEEDS_IMPROVEMENT_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricName {
    Lcp,
    Cls,
    Inp,
    Fcp,
    Fid,
    Tbt,
    Ttfb,
}

impl MetricName {
    pub const ALL: [MetricName; 7] = [
        MetricName::Lcp,
        MetricName::Cls,
        MetricName::Inp,
        MetricName::Fcp,
        MetricName::Fid,
        MetricName::Tbt,
        MetricName::Ttfb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Lcp => "LCP",
            MetricName::Cls => "CLS",
            MetricName::Inp => "INP",
            MetricName::Fcp => "FCP",
            MetricName::Fid => "FID",
            MetricName::Tbt => "TBT",
            MetricName::Ttfb => "TTFB",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = VitalsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricName::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| VitalsError::Config(format!("unknown metric: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rating {
    Good,
    NeedsImprovement,
    Poor,
}

impl Rating {
    pub fn from_threshold(value: f64, threshold: f64) -> Self {
        if value <= threshold {
            Rating::Good
        } else if value <= threshold * NEEDS_IMPROVEMENT_FACTOR {
            Rating::NeedsImprovement
        } else {
            Rating::Poor
        }
    }

    pub fn score(&self) -> u32 {
        match self {
            Rating::Good => 100,
            Rating::NeedsImprovement => 50,
            Rating::Poor => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Good => "good",
            Rating::NeedsImprovement => "needs-improvement",
            Rating::Poor => "poor",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// "Good" upper bounds. Durations are milliseconds; CLS is unitless.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub lcp: f64,
    pub cls: f64,
    pub inp: f64,
    pub fcp: f64,
    pub fid: f64,
    pub tbt: f64,
    pub ttfb: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            lcp: 2500.0,
            cls: 0.1,
            inp: 200.0,
            fcp: 1800.0,
            fid: 100.0,
            tbt: 200.0,
            ttfb: 800.0,
        }
    }
}

impl Thresholds {
    pub fn get(&self, metric: MetricName) -> f64 {
        match metric {
            MetricName::Lcp => self.lcp,
            MetricName::Cls => self.cls,
            MetricName::Inp => self.inp,
            MetricName::Fcp => self.fcp,
            MetricName::Fid => self.fid,
            MetricName::Tbt => self.tbt,
            MetricName::Ttfb => self.ttfb,
        }
    }

    pub fn rate(&self, metric: MetricName, value: f64) -> Rating {
        Rating::from_threshold(value, self.get(metric))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: MetricName,
    pub value: f64,
    pub rating: Rating,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}
