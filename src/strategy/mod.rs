// Trading strategy module
pub mod buy_and_hold;
pub mod regime_strategy;
pub mod signals;

pub use buy_and_hold::BuyAndHoldStrategy;
pub use regime_strategy::RegimeStrategy;
pub use signals::{signal_exposure, SignalConfig, SignalGenerator};

use crate::models::BeliefVector;
use crate::Result;

/// Base trait for strategies simulated by the backtest engine
pub trait Strategy: Send + Sync {
    /// Target exposure for the next period
    ///
    /// `belief` is None when no regime estimate is available for the period.
    /// `prices` ends at the current evaluation date.
    fn target_exposure(&self, belief: Option<&BeliefVector>, prices: &[f64]) -> Result<f64>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum trailing prices this strategy needs per decision
    fn min_prices_required(&self) -> usize;
}
