use super::Strategy;
use crate::error::RegimeError;
use crate::models::BeliefVector;
use crate::Result;

/// Buy-and-Hold benchmark strategy
///
/// Fully invested in every period regardless of regime beliefs. The backtest
/// engine uses it as the benchmark the regime strategy is compared against.
#[derive(Debug, Clone)]
pub struct BuyAndHoldStrategy;

impl BuyAndHoldStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BuyAndHoldStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for BuyAndHoldStrategy {
    fn target_exposure(&self, _belief: Option<&BeliefVector>, prices: &[f64]) -> Result<f64> {
        if prices.is_empty() {
            return Err(RegimeError::InvalidInput("No prices provided".to_string()));
        }
        Ok(1.0)
    }

    fn name(&self) -> &str {
        "BuyAndHold"
    }

    fn min_prices_required(&self) -> usize {
        1 // Only needs the current price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_fully_invested() {
        let strategy = BuyAndHoldStrategy::new();
        let belief = BeliefVector::try_from_slice(&[0.0, 1.0, 0.0]).unwrap();

        for count in [1, 5, 50] {
            let prices = vec![100.0; count];
            assert_eq!(strategy.target_exposure(None, &prices).unwrap(), 1.0);
            // Even a certain bear belief does not change the position
            assert_eq!(strategy.target_exposure(Some(&belief), &prices).unwrap(), 1.0);
        }
    }

    #[test]
    fn test_empty_prices_returns_error() {
        let strategy = BuyAndHoldStrategy::new();
        let result = strategy.target_exposure(None, &[]);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("No prices"));
    }

    #[test]
    fn test_strategy_metadata() {
        let strategy = BuyAndHoldStrategy::new();
        assert_eq!(strategy.name(), "BuyAndHold");
        assert_eq!(strategy.min_prices_required(), 1);
    }
}
