use super::{MetricName, MetricSample, Rating};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceScore {
    /// Mean of the per-metric scores, rounded. Zero when nothing was recorded.
    pub score: u32,
    pub available_metrics: usize,
    pub breakdown: BTreeMap<MetricName, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub metric: MetricName,
    pub priority: RecommendationPriority,
    pub message: String,
}

/// Metrics that were never observed are left out of the mean.
pub fn score(samples: &BTreeMap<MetricName, MetricSample>) -> PerformanceScore {
    let breakdown: BTreeMap<MetricName, u32> = MetricName::ALL
        .iter()
        .filter_map(|name| samples.get(name).map(|s| (*name, s.rating.score())))
        .collect();

    let available_metrics = breakdown.len();
    let score = if available_metrics == 0 {
        0
    } else {
        let total: u32 = breakdown.values().sum();
        (f64::from(total) / available_metrics as f64).round() as u32
    };

    PerformanceScore {
        score,
        available_metrics,
        breakdown,
    }
}

pub fn recommendations(samples: &BTreeMap<MetricName, MetricSample>) -> Vec<Recommendation> {
    let mut out: Vec<Recommendation> = MetricName::ALL
        .iter()
        .filter_map(|name| samples.get(name))
        .filter_map(|sample| {
            let priority = match sample.rating {
                Rating::Good => return None,
                Rating::NeedsImprovement => RecommendationPriority::Medium,
                Rating::Poor => RecommendationPriority::High,
            };
            Some(Recommendation {
                metric: sample.name,
                priority,
                message: advice(sample.name).to_string(),
            })
        })
        .collect();
    out.sort_by_key(|r| r.priority);
    out
}

fn advice(metric: MetricName) -> &'static str {
    match metric {
        MetricName::Lcp => {
            "Preload the hero image and remove render-blocking resources above the fold."
        }
        MetricName::Cls => "Give images, ads and embeds explicit dimensions.",
        MetricName::Inp => "Yield to the main thread inside long event handlers.",
        MetricName::Fcp => "Inline critical CSS and defer non-critical scripts.",
        MetricName::Fid => "Reduce JavaScript executed during page load.",
        MetricName::Tbt => "Split long tasks into smaller chunks.",
        MetricName::Ttfb => "Cache server responses closer to the user.",
    }
}
