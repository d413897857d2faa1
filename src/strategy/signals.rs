use crate::error::RegimeError;
use crate::indicators::{calculate_sma, realized_volatility};
use crate::models::{BeliefVector, TradeAction, TradeSignal};
use crate::Result;
use serde::{Deserialize, Serialize};

/// Configuration for signal generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Directional weight applied to the bull probability
    pub bull_weight: f64,
    /// Directional weight applied to the bear probability
    pub bear_weight: f64,
    /// Directional weight applied to the sideways probability
    pub sideways_weight: f64,
    /// Weighted signal above this is a buy
    pub buy_threshold: f64,
    /// Weighted signal below this is a sell
    pub sell_threshold: f64,
    /// SMA period for trend confirmation
    pub trend_window: usize,
    /// Share of the signal taken from the price trend (0 disables)
    pub trend_weight: f64,
    pub volatility_window: usize,
    /// Annualised volatility the signal is scaled down to, if set
    pub volatility_target: Option<f64>,
    pub periods_per_year: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            bull_weight: 1.0,
            bear_weight: -1.0,
            sideways_weight: 0.0,
            buy_threshold: 0.3,
            sell_threshold: -0.3,
            trend_window: 50,
            trend_weight: 0.2,
            volatility_window: 20,
            volatility_target: None,
            periods_per_year: 252.0,
        }
    }
}

impl SignalConfig {
    /// Price history that lets every enabled modifier take effect
    pub fn context_needed(&self) -> usize {
        let mut needed = 1;
        if self.trend_weight > 0.0 {
            needed = needed.max(self.trend_window);
        }
        if self.volatility_target.is_some() {
            needed = needed.max(self.volatility_window);
        }
        needed
    }

    pub fn validate(&self) -> Result<()> {
        if self.sell_threshold > self.buy_threshold {
            return Err(RegimeError::InvalidInput(format!(
                "sell threshold {} is above buy threshold {}",
                self.sell_threshold, self.buy_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.trend_weight) {
            return Err(RegimeError::InvalidInput(format!(
                "trend weight must lie in [0, 1], got {}",
                self.trend_weight
            )));
        }
        if let Some(target) = self.volatility_target {
            if !(target > 0.0) {
                return Err(RegimeError::InvalidInput(format!(
                    "volatility target must be positive, got {}",
                    target
                )));
            }
        }
        Ok(())
    }
}

/// Maps regime beliefs and recent prices to a trading signal
///
/// Pure and deterministic: the same belief and price window always give the
/// same signal.
#[derive(Debug, Clone, Default)]
pub struct SignalGenerator {
    config: SignalConfig,
}

impl SignalGenerator {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Generate a signal from raw regime probabilities `[bull, bear, sideways]`
    pub fn generate(&self, belief: &[f64], prices: &[f64]) -> Result<TradeSignal> {
        let belief = BeliefVector::try_from_slice(belief)?;
        self.generate_from_belief(&belief, prices)
    }

    pub fn generate_from_belief(&self, belief: &BeliefVector, prices: &[f64]) -> Result<TradeSignal> {
        if prices.is_empty() {
            return Err(RegimeError::InvalidInput(
                "price context is empty".to_string(),
            ));
        }
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(RegimeError::InvalidInput(
                "price context contains non-positive or non-finite prices".to_string(),
            ));
        }

        let directional = belief.bull() * self.config.bull_weight
            + belief.bear() * self.config.bear_weight
            + belief.sideways() * self.config.sideways_weight;

        let mut weighted_signal = directional;

        if let Some(trend) = self.trend_direction(prices) {
            weighted_signal = (1.0 - self.config.trend_weight) * weighted_signal
                + self.config.trend_weight * trend;
        }

        if let Some(scale) = self.volatility_scale(prices) {
            weighted_signal *= scale;
        }

        let weighted_signal = weighted_signal.clamp(-1.0, 1.0);

        let action = if weighted_signal > self.config.buy_threshold {
            TradeAction::Buy
        } else if weighted_signal < self.config.sell_threshold {
            TradeAction::Sell
        } else {
            TradeAction::Hold
        };

        let (dominant, confidence) = belief.dominant();
        tracing::debug!(
            "Signal: {} (weighted={:.3}, dominant={} @ {:.3})",
            action,
            weighted_signal,
            dominant,
            confidence
        );

        Ok(TradeSignal {
            action,
            confidence: confidence.clamp(0.0, 1.0),
            regime_probs: *belief,
            weighted_signal,
        })
    }

    /// Sign of the last price relative to its SMA, when enough history exists
    fn trend_direction(&self, prices: &[f64]) -> Option<f64> {
        if self.config.trend_weight <= 0.0 {
            return None;
        }
        let sma = calculate_sma(prices, self.config.trend_window)?;
        let last = *prices.last()?;

        let direction = if last > sma {
            1.0
        } else if last < sma {
            -1.0
        } else {
            0.0
        };
        Some(direction)
    }

    /// Down-scaling factor in (0, 1] toward the volatility target
    fn volatility_scale(&self, prices: &[f64]) -> Option<f64> {
        let target = self.config.volatility_target?;
        let realized = realized_volatility(
            prices,
            self.config.volatility_window,
            self.config.periods_per_year,
        )?;
        if realized <= 0.0 {
            return None;
        }
        Some((target / realized).min(1.0))
    }
}

/// Exposure implied by a signal, clamped to the allowed range
pub fn signal_exposure(signal: &TradeSignal, allow_short: bool) -> f64 {
    let lower = if allow_short { -1.0 } else { 0.0 };
    signal.weighted_signal.clamp(lower, 1.0)
}
