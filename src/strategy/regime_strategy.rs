use super::signals::{signal_exposure, SignalConfig, SignalGenerator};
use super::Strategy;
use crate::error::RegimeError;
use crate::models::{BeliefVector, TradeSignal};
use crate::Result;

/// Sizes the position from the regime signal's weighted strength
///
/// Exposure is the weighted signal clamped to `[0, 1]`, or to `[-1, 1]` when
/// shorting is allowed.
#[derive(Debug, Clone)]
pub struct RegimeStrategy {
    generator: SignalGenerator,
    allow_short: bool,
}

impl RegimeStrategy {
    pub fn new(config: SignalConfig, allow_short: bool) -> Self {
        Self {
            generator: SignalGenerator::new(config),
            allow_short,
        }
    }

    pub fn signal(&self, belief: &BeliefVector, prices: &[f64]) -> Result<TradeSignal> {
        self.generator.generate_from_belief(belief, prices)
    }
}

impl Default for RegimeStrategy {
    fn default() -> Self {
        Self::new(SignalConfig::default(), false)
    }
}

impl Strategy for RegimeStrategy {
    fn target_exposure(&self, belief: Option<&BeliefVector>, prices: &[f64]) -> Result<f64> {
        let belief = belief.ok_or(RegimeError::NotFitted)?;
        let signal = self.signal(belief, prices)?;
        Ok(signal_exposure(&signal, self.allow_short))
    }

    fn name(&self) -> &str {
        if self.allow_short {
            "RegimeLongShort"
        } else {
            "RegimeLongOnly"
        }
    }

    fn min_prices_required(&self) -> usize {
        self.generator.config().context_needed()
    }
}
