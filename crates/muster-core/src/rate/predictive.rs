//! Predictive 429 risk estimation (spec §4.3).

use chrono::{DateTime, Duration, Utc};
use muster_store::LearnedLimit;

#[derive(Debug, Clone, PartialEq)]
pub struct PredictiveAnalysis {
    pub probability: f64,
    pub confidence: f64,
    pub recommended_concurrency: Option<u32>,
    /// `(window_start, window_end)`, a ±20% band around the estimated
    /// next 429, only present with ≥3 historical samples.
    pub next_risk_window: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

const WINDOW_10M_WEIGHT: f64 = 0.4;
const WINDOW_30M_WEIGHT: f64 = 0.15;
const WINDOW_60M_WEIGHT: f64 = 0.05;
const CONSECUTIVE_WEIGHT: f64 = 0.2;

pub fn analyze(limit: &LearnedLimit, predictive_threshold: f64, now: DateTime<Utc>) -> PredictiveAnalysis {
    let count_within = |minutes: i64| {
        let cutoff = now - Duration::minutes(minutes);
        limit.history_429.iter().filter(|t| **t >= cutoff).count() as f64
    };

    let weighted = count_within(10) * WINDOW_10M_WEIGHT
        + count_within(30) * WINDOW_30M_WEIGHT
        + count_within(60) * WINDOW_60M_WEIGHT
        + (limit.consecutive_429_count as f64) * CONSECUTIVE_WEIGHT;
    let probability = weighted.min(1.0);

    let confidence = (limit.history_429.len() as f64 / 10.0).min(1.0);

    let recommended_concurrency = if probability > predictive_threshold {
        Some(((limit.concurrency as f64) * (1.0 - probability * 0.5)).floor().max(1.0) as u32)
    } else {
        None
    };

    let next_risk_window = estimate_next_risk_window(limit, now);

    PredictiveAnalysis { probability, confidence, recommended_concurrency, next_risk_window }
}

fn estimate_next_risk_window(limit: &LearnedLimit, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    if limit.history_429.len() < 3 {
        return None;
    }
    let last = *limit.history_429.last()?;
    let intervals: Vec<i64> = limit
        .history_429
        .windows(2)
        .map(|w| (w[1] - w[0]).num_milliseconds())
        .collect();
    if intervals.is_empty() {
        return None;
    }
    let avg_ms = intervals.iter().sum::<i64>() / intervals.len() as i64;
    let center = last + Duration::milliseconds(avg_ms);
    let band_ms = (avg_ms as f64 * 0.2) as i64;
    let _ = now; // center is anchored on history, not "now"
    Some((center - Duration::milliseconds(band_ms), center + Duration::milliseconds(band_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_store::LearnedLimit;

    #[test]
    fn no_history_yields_zero_probability_and_no_risk_window() {
        let limit = LearnedLimit::new(8);
        let analysis = analyze(&limit, 0.6, Utc::now());
        assert_eq!(analysis.probability, 0.0);
        assert!(analysis.next_risk_window.is_none());
        assert!(analysis.recommended_concurrency.is_none());
    }

    #[test]
    fn dense_recent_history_raises_probability_above_threshold() {
        let mut limit = LearnedLimit::new(8);
        let now = Utc::now();
        limit.consecutive_429_count = 2;
        for i in 0..5 {
            limit.history_429.push(now - Duration::minutes(i));
        }
        let analysis = analyze(&limit, 0.3, now);
        assert!(analysis.probability > 0.3);
        assert!(analysis.recommended_concurrency.is_some());
        assert!(analysis.recommended_concurrency.unwrap() <= limit.concurrency);
    }

    #[test]
    fn confidence_scales_with_history_length_capped_at_one() {
        let mut limit = LearnedLimit::new(8);
        let now = Utc::now();
        for i in 0..20 {
            limit.history_429.push(now - Duration::minutes(i * 5));
        }
        let analysis = analyze(&limit, 0.9, now);
        assert_eq!(analysis.confidence, 1.0);
    }

    #[test]
    fn three_or_more_samples_produce_a_risk_window() {
        let mut limit = LearnedLimit::new(8);
        let now = Utc::now();
        limit.history_429.push(now - Duration::minutes(30));
        limit.history_429.push(now - Duration::minutes(20));
        limit.history_429.push(now - Duration::minutes(10));
        let analysis = analyze(&limit, 0.99, now);
        assert!(analysis.next_risk_window.is_some());
        let (start, end) = analysis.next_risk_window.unwrap();
        assert!(start < end);
    }
}
