use crate::error::RegimeError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of latent regimes the model distinguishes
pub const NUM_REGIMES: usize = 3;

/// Tolerance when checking that a probability vector sums to one
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Single price observation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl PricePoint {
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self { timestamp, price }
    }
}

/// Chronologically ordered price history
///
/// Timestamps are strictly increasing and every price is finite and positive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Validate and wrap a sequence of price points
    pub fn new(points: Vec<PricePoint>) -> Result<Self> {
        for (i, point) in points.iter().enumerate() {
            if !point.price.is_finite() || point.price <= 0.0 {
                return Err(RegimeError::InvalidInput(format!(
                    "price at {} is not a positive number: {}",
                    point.timestamp, point.price
                )));
            }
            if i > 0 && point.timestamp <= points[i - 1].timestamp {
                return Err(RegimeError::InvalidInput(format!(
                    "timestamps must be strictly increasing ({} follows {})",
                    point.timestamp,
                    points[i - 1].timestamp
                )));
            }
        }

        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn prices(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.price).collect()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    /// The most recent `n` points (all of them if fewer are available)
    pub fn tail(&self, n: usize) -> &[PricePoint] {
        let start = self.points.len().saturating_sub(n);
        &self.points[start..]
    }

    /// Log-return feature series, one element shorter than the price series
    pub fn log_returns(&self) -> Vec<f64> {
        log_returns(&self.prices())
    }
}

/// Log-returns `ln(p_t / p_{t-1})` of adjacent prices
pub fn log_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect()
}

/// Latent market regime
///
/// The discriminant is the regime's position in a [`BeliefVector`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Bull = 0,
    Bear = 1,
    Sideways = 2,
}

impl Regime {
    pub const ALL: [Regime; NUM_REGIMES] = [Regime::Bull, Regime::Bear, Regime::Sideways];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::Bull => write!(f, "bull"),
            Regime::Bear => write!(f, "bear"),
            Regime::Sideways => write!(f, "sideways"),
        }
    }
}

/// Probability distribution over regimes, ordered `[bull, bear, sideways]`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BeliefVector([f64; NUM_REGIMES]);

impl BeliefVector {
    /// Validate a raw probability slice
    pub fn try_from_slice(probs: &[f64]) -> Result<Self> {
        if probs.len() != NUM_REGIMES {
            return Err(RegimeError::InvalidInput(format!(
                "belief vector must have {} entries, got {}",
                NUM_REGIMES,
                probs.len()
            )));
        }
        if probs
            .iter()
            .any(|p| !p.is_finite() || *p < -PROBABILITY_TOLERANCE || *p > 1.0 + PROBABILITY_TOLERANCE)
        {
            return Err(RegimeError::InvalidInput(format!(
                "belief vector entries must lie in [0, 1]: {:?}",
                probs
            )));
        }
        let sum: f64 = probs.iter().sum();
        if (sum - 1.0).abs() > 1e-3 {
            return Err(RegimeError::InvalidInput(format!(
                "belief vector must sum to 1, sums to {:.6}",
                sum
            )));
        }

        let mut values = [0.0; NUM_REGIMES];
        values.copy_from_slice(probs);
        Ok(Self(values))
    }

    /// Normalise non-negative weights into a belief vector
    pub(crate) fn from_weights(weights: [f64; NUM_REGIMES]) -> Result<Self> {
        let sum: f64 = weights.iter().sum();
        if !sum.is_finite() || sum <= 0.0 {
            return Err(RegimeError::Fitting(format!(
                "regime weights cannot be normalised: {:?}",
                weights
            )));
        }
        let mut values = [0.0; NUM_REGIMES];
        for (v, w) in values.iter_mut().zip(weights.iter()) {
            *v = (w / sum).clamp(0.0, 1.0);
        }
        Ok(Self(values))
    }

    pub fn probability(&self, regime: Regime) -> f64 {
        self.0[regime.index()]
    }

    pub fn bull(&self) -> f64 {
        self.probability(Regime::Bull)
    }

    pub fn bear(&self) -> f64 {
        self.probability(Regime::Bear)
    }

    pub fn sideways(&self) -> f64 {
        self.probability(Regime::Sideways)
    }

    /// Most probable regime and its probability (ties go to the lower index)
    pub fn dominant(&self) -> (Regime, f64) {
        let mut best = Regime::Bull;
        for regime in Regime::ALL {
            if self.probability(regime) > self.probability(best) {
                best = regime;
            }
        }
        (best, self.probability(best))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }
}

/// Discrete trading action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::Sell => write!(f, "SELL"),
            TradeAction::Hold => write!(f, "HOLD"),
        }
    }
}

/// Trading signal derived from regime beliefs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeSignal {
    pub action: TradeAction,
    pub confidence: f64,
    pub regime_probs: BeliefVector,
    pub weighted_signal: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn series(prices: &[f64]) -> Vec<PricePoint> {
        let start = Utc::now();
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| PricePoint::new(start + Duration::days(i as i64), p))
            .collect()
    }

    #[test]
    fn test_price_series_rejects_unordered_timestamps() {
        let mut points = series(&[100.0, 101.0, 102.0]);
        points.swap(1, 2);

        let result = PriceSeries::new(points);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("strictly increasing"));
    }

    #[test]
    fn test_price_series_rejects_duplicate_timestamps() {
        let mut points = series(&[100.0, 101.0]);
        points[1].timestamp = points[0].timestamp;

        assert!(PriceSeries::new(points).is_err());
    }

    #[test]
    fn test_price_series_rejects_non_positive_prices() {
        assert!(PriceSeries::new(series(&[100.0, 0.0])).is_err());
        assert!(PriceSeries::new(series(&[100.0, f64::NAN])).is_err());
    }

    #[test]
    fn test_log_returns_length_and_values() {
        let series = PriceSeries::new(series(&[100.0, 110.0, 99.0])).unwrap();
        let returns = series.log_returns();

        assert_eq!(returns.len(), 2);
        assert!((returns[0] - (1.1f64).ln()).abs() < 1e-12);
        assert!((returns[1] - (0.9f64).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_tail_returns_most_recent_points() {
        let series = PriceSeries::new(series(&[1.0, 2.0, 3.0, 4.0])).unwrap();
        let tail: Vec<f64> = series.tail(2).iter().map(|p| p.price).collect();
        assert_eq!(tail, vec![3.0, 4.0]);
        assert_eq!(series.tail(10).len(), 4);
    }

    #[test]
    fn test_belief_vector_validation() {
        assert!(BeliefVector::try_from_slice(&[0.2, 0.3, 0.5]).is_ok());
        assert!(BeliefVector::try_from_slice(&[0.5, 0.5]).is_err());
        assert!(BeliefVector::try_from_slice(&[0.5, 0.5, 0.5]).is_err());
        assert!(BeliefVector::try_from_slice(&[1.2, -0.2, 0.0]).is_err());
        assert!(BeliefVector::try_from_slice(&[f64::NAN, 0.5, 0.5]).is_err());
    }

    #[test]
    fn test_belief_vector_dominant_regime() {
        let belief = BeliefVector::try_from_slice(&[0.1, 0.7, 0.2]).unwrap();
        assert_eq!(belief.dominant(), (Regime::Bear, 0.7));
        assert_eq!(belief.bull(), 0.1);
        assert_eq!(belief.sideways(), 0.2);
    }

    #[test]
    fn test_action_serializes_uppercase() {
        let json = serde_json::to_string(&TradeAction::Buy).unwrap();
        assert_eq!(json, "\"BUY\"");
        assert_eq!(TradeAction::Hold.to_string(), "HOLD");
    }
}
