use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Univariate Gaussian emission distribution for one regime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Gaussian {
    pub mean: f64,
    pub variance: f64,
}

impl Gaussian {
    pub fn new(mean: f64, variance: f64) -> Self {
        Self { mean, variance }
    }

    /// Log density at `x`
    pub fn log_pdf(&self, x: f64) -> f64 {
        let diff = x - self.mean;
        -0.5 * ((2.0 * PI * self.variance).ln() + diff * diff / self.variance)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    /// Weighted maximum-likelihood estimate with the variance clamped to `variance_floor`
    ///
    /// Returns None when the total weight is zero.
    pub fn from_weighted(observations: &[f64], weights: &[f64], variance_floor: f64) -> Option<Self> {
        let total: f64 = weights.iter().sum();
        if !(total > 0.0) {
            return None;
        }

        let mean = observations
            .iter()
            .zip(weights)
            .map(|(x, w)| x * w)
            .sum::<f64>()
            / total;

        let variance = observations
            .iter()
            .zip(weights)
            .map(|(x, w)| w * (x - mean).powi(2))
            .sum::<f64>()
            / total;

        Some(Self::new(mean, variance.max(variance_floor)))
    }
}
