use crate::models::{PricePoint, PriceSeries};
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady uptrend (+0.5% daily average, ±0.5% noise)
    Bull,
    /// Steady downtrend (-0.5% daily average, ±0.5% noise)
    Bear,
    /// Flat market with small noise (±0.2%)
    Sideways,
    /// No drift, large swings (±4%)
    Volatile,
    /// Repeating bull / sideways / bear / sideways phases
    RegimeCycle,
}

impl MarketScenario {
    pub const ALL: [MarketScenario; 5] = [
        MarketScenario::Bull,
        MarketScenario::Bear,
        MarketScenario::Sideways,
        MarketScenario::Volatile,
        MarketScenario::RegimeCycle,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MarketScenario::Bull => "bull",
            MarketScenario::Bear => "bear",
            MarketScenario::Sideways => "sideways",
            MarketScenario::Volatile => "volatile",
            MarketScenario::RegimeCycle => "regime-cycle",
        }
    }
}

/// A stretch of days with a fixed drift and uniform noise on simple returns
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub days: usize,
    pub drift: f64,
    pub noise: f64,
}

impl Segment {
    pub fn new(days: usize, drift: f64, noise: f64) -> Self {
        Self { days, drift, noise }
    }

    pub fn bull(days: usize) -> Self {
        Self::new(days, 0.005, 0.005)
    }

    pub fn bear(days: usize) -> Self {
        Self::new(days, -0.005, 0.005)
    }

    pub fn sideways(days: usize) -> Self {
        Self::new(days, 0.0, 0.002)
    }

    pub fn volatile(days: usize) -> Self {
        Self::new(days, 0.0, 0.04)
    }
}

/// Phases repeated by `MarketScenario::RegimeCycle`
const CYCLE: [(usize, fn(usize) -> Segment); 4] = [
    (120, Segment::bull),
    (60, Segment::sideways),
    (90, Segment::bear),
    (60, Segment::sideways),
];

/// Generates synthetic daily price data for model tests and backtests
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    start: Option<DateTime<Utc>>,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 100.0,
            start: None,
        }
    }

    /// Pin the first timestamp (defaults to `num_days` before now)
    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    /// Generate `num_days + 1` daily prices for a scenario
    pub fn generate(&mut self, scenario: MarketScenario, num_days: usize) -> Vec<PricePoint> {
        let segments = match scenario {
            MarketScenario::Bull => vec![Segment::bull(num_days)],
            MarketScenario::Bear => vec![Segment::bear(num_days)],
            MarketScenario::Sideways => vec![Segment::sideways(num_days)],
            MarketScenario::Volatile => vec![Segment::volatile(num_days)],
            MarketScenario::RegimeCycle => Self::cycle_segments(num_days),
        };
        self.generate_segments(&segments)
    }

    /// Generate a piecewise path; every segment day adds one price after the base price
    pub fn generate_segments(&mut self, segments: &[Segment]) -> Vec<PricePoint> {
        let total_days: usize = segments.iter().map(|s| s.days).sum();
        let start = self
            .start
            .unwrap_or_else(|| Utc::now() - Duration::days(total_days as i64));

        let mut points = Vec::with_capacity(total_days + 1);
        let mut current_price = self.base_price;
        points.push(PricePoint::new(start, current_price));

        for segment in segments {
            for _ in 0..segment.days {
                let noise = if segment.noise > 0.0 {
                    self.rng.gen_range(-segment.noise..segment.noise)
                } else {
                    0.0
                };
                // Keep the path strictly positive under large negative shocks
                current_price *= (1.0 + segment.drift + noise).max(0.01);

                let timestamp = start + Duration::days(points.len() as i64);
                points.push(PricePoint::new(timestamp, current_price));
            }
        }

        points
    }

    /// Scenario path wrapped in a validated series
    pub fn generate_series(&mut self, scenario: MarketScenario, num_days: usize) -> Result<PriceSeries> {
        PriceSeries::new(self.generate(scenario, num_days))
    }

    fn cycle_segments(num_days: usize) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut remaining = num_days;
        for (days, make) in CYCLE.iter().cycle() {
            if remaining == 0 {
                break;
            }
            let len = (*days).min(remaining);
            segments.push(make(len));
            remaining -= len;
        }
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::log_returns;

    fn prices(points: &[PricePoint]) -> Vec<f64> {
        points.iter().map(|p| p.price).collect()
    }

    #[test]
    fn test_generate_bull() {
        let mut gen = SyntheticDataGenerator::new(42);
        let points = gen.generate(MarketScenario::Bull, 200);

        assert_eq!(points.len(), 201);

        let first_price = points.first().unwrap().price;
        let last_price = points.last().unwrap().price;
        assert!(
            last_price > first_price * 2.0,
            "Bull should compound upward: {} -> {}",
            first_price,
            last_price
        );
    }

    #[test]
    fn test_generate_bear() {
        let mut gen = SyntheticDataGenerator::new(42);
        let points = gen.generate(MarketScenario::Bear, 200);

        let first_price = points.first().unwrap().price;
        let last_price = points.last().unwrap().price;
        assert!(
            last_price < first_price * 0.5,
            "Bear should end lower: {} -> {}",
            first_price,
            last_price
        );
    }

    #[test]
    fn test_generate_sideways() {
        let mut gen = SyntheticDataGenerator::new(42);
        let points = gen.generate(MarketScenario::Sideways, 300);

        for ret in log_returns(&prices(&points)) {
            assert!(ret.abs() < 0.0021, "Sideways return too large: {}", ret);
        }
    }

    #[test]
    fn test_segment_returns_stay_in_band() {
        let mut gen = SyntheticDataGenerator::new(7);
        let points = gen.generate_segments(&[Segment::bull(50), Segment::bear(50)]);
        let returns = log_returns(&prices(&points));

        assert_eq!(returns.len(), 100);
        assert!(returns[..50].iter().all(|r| *r >= -1e-12));
        assert!(returns[50..].iter().all(|r| *r <= 1e-12));
    }

    #[test]
    fn test_regime_cycle_covers_requested_days() {
        let mut gen = SyntheticDataGenerator::new(1);
        let points = gen.generate(MarketScenario::RegimeCycle, 1000);
        assert_eq!(points.len(), 1001);
    }

    #[test]
    fn test_timestamps_are_daily_and_sequential() {
        let start = Utc::now();
        let mut gen = SyntheticDataGenerator::new(42).with_start(start);
        let points = gen.generate(MarketScenario::Volatile, 100);

        assert_eq!(points[0].timestamp, start);
        for i in 1..points.len() {
            assert_eq!((points[i].timestamp - points[i - 1].timestamp).num_days(), 1);
        }
        assert!(PriceSeries::new(points).is_ok());
    }

    #[test]
    fn test_same_seed_same_path() {
        let start = Utc::now();
        let a = SyntheticDataGenerator::new(9)
            .with_start(start)
            .generate(MarketScenario::RegimeCycle, 400);
        let b = SyntheticDataGenerator::new(9)
            .with_start(start)
            .generate(MarketScenario::RegimeCycle, 400);
        assert_eq!(a, b);
    }
}
