// Technical indicators module
// Moving averages and return statistics used by the signal generator and metrics

pub mod moving_average;
pub mod volatility;

pub use moving_average::calculate_sma;
pub use volatility::{mean, realized_volatility, std_dev};
