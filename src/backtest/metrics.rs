use crate::indicators::{mean, std_dev};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Volatility below this is treated as zero when forming ratios
const VOLATILITY_EPSILON: f64 = 1e-12;

/// Summary statistics of a per-period return series
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceMetrics {
    /// Compounded return over the whole horizon
    pub total_return: f64,
    /// Geometric annualised return
    pub annualized_return: f64,
    /// Annualised population volatility of period returns
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Largest peak-to-trough loss as a positive fraction of the peak
    pub max_drawdown: f64,
    pub calmar_ratio: f64,
    /// Share of periods with a strictly positive return
    pub win_rate: f64,
    /// Mean absolute exposure
    pub exposure: f64,
}

impl PerformanceMetrics {
    /// Calculate metrics from simple per-period returns and the exposures held
    pub fn from_returns(
        returns: &[f64],
        exposures: &[f64],
        periods_per_year: f64,
        risk_free_rate: f64,
    ) -> Self {
        if returns.is_empty() {
            return Self::default();
        }

        let n = returns.len() as f64;
        let growth: f64 = returns.iter().map(|r| 1.0 + r).product();
        let total_return = growth - 1.0;

        let years = n / periods_per_year;
        let annualized_return = if growth > 0.0 {
            growth.powf(1.0 / years) - 1.0
        } else {
            -1.0
        };

        let volatility = std_dev(returns) * periods_per_year.sqrt();
        let annual_mean = mean(returns) * periods_per_year;

        let sharpe_ratio = if volatility > VOLATILITY_EPSILON {
            (annual_mean - risk_free_rate) / volatility
        } else {
            0.0
        };

        let sortino_ratio = {
            let downside = returns
                .iter()
                .map(|r| r.min(0.0).powi(2))
                .sum::<f64>()
                / n;
            let downside_dev = downside.sqrt() * periods_per_year.sqrt();
            if downside_dev > VOLATILITY_EPSILON {
                (annual_mean - risk_free_rate) / downside_dev
            } else {
                0.0
            }
        };

        let max_drawdown = Self::calculate_max_drawdown(returns);
        let calmar_ratio = if max_drawdown > 0.0 {
            annualized_return / max_drawdown
        } else {
            0.0
        };

        let win_rate = returns.iter().filter(|r| **r > 0.0).count() as f64 / n;
        let exposure = if exposures.is_empty() {
            0.0
        } else {
            exposures.iter().map(|e| e.abs()).sum::<f64>() / exposures.len() as f64
        };

        Self {
            total_return,
            annualized_return,
            volatility,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            calmar_ratio,
            win_rate,
            exposure,
        }
    }

    /// Maximum drawdown of the compounded equity curve
    fn calculate_max_drawdown(returns: &[f64]) -> f64 {
        let mut equity = 1.0;
        let mut peak = 1.0;
        let mut max_dd: f64 = 0.0;

        for r in returns {
            equity *= 1.0 + r;
            if equity > peak {
                peak = equity;
            }
            max_dd = max_dd.max((peak - equity) / peak);
        }

        max_dd
    }

    /// Metric name to value, as reported by the service layer
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        [
            ("total_return", self.total_return),
            ("annualized_return", self.annualized_return),
            ("volatility", self.volatility),
            ("sharpe_ratio", self.sharpe_ratio),
            ("sortino_ratio", self.sortino_ratio),
            ("max_drawdown", self.max_drawdown),
            ("calmar_ratio", self.calmar_ratio),
            ("win_rate", self.win_rate),
            ("exposure", self.exposure),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
    }
}

/// Compounded value path starting at `initial`, one element longer than `returns`
pub fn cumulative_curve(returns: &[f64], initial: f64) -> Vec<f64> {
    let mut curve = Vec::with_capacity(returns.len() + 1);
    let mut value = initial;
    curve.push(value);
    for r in returns {
        value *= 1.0 + r;
        curve.push(value);
    }
    curve
}
