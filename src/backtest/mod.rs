pub mod engine;
pub mod metrics;
pub mod report;
pub mod synthetic;

pub use engine::{BacktestConfig, BacktestEngine};
pub use metrics::{cumulative_curve, PerformanceMetrics};
pub use report::{BacktestReport, PeriodFailure};
pub use synthetic::{MarketScenario, Segment, SyntheticDataGenerator};
