use crate::model::TimeAwaySummary;
use std::cmp::Ordering;

/// Compute (mean, median, 25th percentile, 75th percentile) from samples
pub fn compute_metrics(samples: &[f64]) -> Option<(f64, f64, f64, f64)> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    let mean = samples.iter().sum::<f64>() / n as f64;
    let median = sorted[n / 2];
    let p25 = sorted[n / 4];
    let p75 = sorted[3 * n / 4];
    Some((mean, median, p25, p75))
}

/// Summarise how long the user spent in the chat app per recipient.
pub fn time_away_summary(samples: &[f64]) -> Option<TimeAwaySummary> {
    let (mean, median, p25, p75) = compute_metrics(samples)?;
    Some(TimeAwaySummary {
        samples: samples.len(),
        mean_secs: mean,
        median_secs: median,
        p25_secs: p25,
        p75_secs: p75,
    })
}
