//! Rolling statistics shared by the detectors.
//!
//! Every detector uses the population standard deviation so z-scores are
//! comparable across detectors.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanStd {
    pub mean: f64,
    pub stddev: f64,
    pub count: usize,
}

/// Mean and population stddev of the finite values. None when there are none.
pub fn mean_std(values: &[f64]) -> Option<MeanStd> {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (count, sum) = finite.clone().fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
    if count == 0 {
        return None;
    }
    let mean = sum / count as f64;
    let variance = finite.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    Some(MeanStd { mean, stddev: variance.sqrt(), count })
}

/// `(sample - mean) / stddev`, or 0 when the deviation is zero or anything is non-finite.
pub fn z_score(sample: f64, stats: &MeanStd) -> f64 {
    if !sample.is_finite() || !stats.mean.is_finite() || !(stats.stddev > 0.0) {
        return 0.0;
    }
    let z = (sample - stats.mean) / stats.stddev;
    if z.is_finite() { z } else { 0.0 }
}

/// Percent (0–100) of finite `values` at or below `sample`. None for an empty series.
pub fn percentile_rank(values: &[f64], sample: f64) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || !sample.is_finite() {
        return None;
    }
    let at_or_below = finite.iter().filter(|&&v| v <= sample).count();
    Some(at_or_below as f64 / finite.len() as f64 * 100.0)
}
