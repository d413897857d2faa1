use super::metrics::{cumulative_curve, PerformanceMetrics};
use super::report::{BacktestReport, PeriodFailure};
use crate::api::DataProvider;
use crate::error::RegimeError;
use crate::models::{log_returns, PricePoint, PriceSeries};
use crate::regime::{GaussianHmm, HmmConfig};
use crate::strategy::{BuyAndHoldStrategy, RegimeStrategy, SignalConfig, Strategy};
use crate::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Walk-forward simulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Prices per year of history
    pub trading_days_per_year: usize,
    /// Log-returns fed to the regime filter at each evaluation date
    pub inference_window: usize,
    /// Trailing prices handed to the signal generator
    pub signal_window: usize,
    /// Evaluation dates between model refits (1 = refit every date)
    pub refit_every: usize,
    pub allow_short: bool,
    /// Cost per unit of exposure change, in basis points
    pub transaction_cost_bps: f64,
    /// Annual risk-free rate used in Sharpe and Sortino ratios
    pub risk_free_rate: f64,
    /// Largest tolerated share of flat (failed) periods
    pub max_failure_ratio: f64,
    pub initial_value: f64,
    /// Fit refit windows on the rayon thread pool
    pub parallel: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            trading_days_per_year: 252,
            inference_window: 30,
            signal_window: 200,
            refit_every: 21,
            allow_short: false,
            transaction_cost_bps: 0.0,
            risk_free_rate: 0.0,
            max_failure_ratio: 0.5,
            initial_value: 1.0,
            parallel: true,
        }
    }
}

impl BacktestConfig {
    /// Prices needed for a run: both windows plus the first evaluation date
    pub fn required_prices(&self, years: u32, lookback_years: u32) -> usize {
        (years as usize + lookback_years as usize) * self.trading_days_per_year + 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.trading_days_per_year < 2 {
            return Err(RegimeError::InvalidInput(
                "trading_days_per_year must be at least 2".to_string(),
            ));
        }
        if self.inference_window == 0 || self.signal_window == 0 || self.refit_every == 0 {
            return Err(RegimeError::InvalidInput(
                "inference_window, signal_window and refit_every must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_failure_ratio) {
            return Err(RegimeError::InvalidInput(format!(
                "max_failure_ratio must lie in [0, 1], got {}",
                self.max_failure_ratio
            )));
        }
        if !(self.transaction_cost_bps >= 0.0) || !(self.initial_value > 0.0) {
            return Err(RegimeError::InvalidInput(
                "transaction_cost_bps must be non-negative and initial_value positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Walk-forward backtest of a regime strategy against buy-and-hold
///
/// Evaluation dates are the last `years * trading_days_per_year + 1` prices.
/// The model used on date `d_k` is fit on the `lookback_years` of prices
/// strictly before its refit date, refit on the first date and every
/// `refit_every` dates after. The exposure chosen at the close of `d_k` earns
/// the return from `d_k` to `d_{k+1}`.
///
/// Clones share their strategies.
#[derive(Clone)]
pub struct BacktestEngine {
    config: BacktestConfig,
    hmm_config: HmmConfig,
    strategy: Arc<dyn Strategy>,
    benchmark: Arc<dyn Strategy>,
}

/// Prices and index bounds of one run
struct Timeline<'a> {
    series: &'a [PricePoint],
    prices: Vec<f64>,
    /// Prices in each training window
    lookback: usize,
    /// Simulated periods
    horizon: usize,
}

impl Timeline<'_> {
    /// Price index of evaluation date `k`
    fn index(&self, k: usize) -> usize {
        self.lookback + k
    }
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig, hmm_config: HmmConfig, signal_config: SignalConfig) -> Self {
        let strategy = RegimeStrategy::new(signal_config, config.allow_short);
        Self {
            config,
            hmm_config,
            strategy: Arc::new(strategy),
            benchmark: Arc::new(BuyAndHoldStrategy::new()),
        }
    }

    /// Replace the strategy under test
    pub fn with_strategy(mut self, strategy: Box<dyn Strategy>) -> Self {
        self.strategy = Arc::from(strategy);
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Fetch history once and run the walk-forward simulation
    ///
    /// The simulation itself runs on the blocking thread pool.
    pub async fn run(
        &self,
        provider: &dyn DataProvider,
        symbol: &str,
        years: u32,
        lookback_years: u32,
    ) -> Result<BacktestReport> {
        self.validate_request(years, lookback_years)?;

        let required = self.config.required_prices(years, lookback_years);
        tracing::info!(
            "Fetching {} prices of {} from {} for a {}y/{}y backtest",
            required,
            symbol,
            provider.name(),
            years,
            lookback_years
        );

        let series = provider.get_history(symbol, required).await?;

        let engine = self.clone();
        let symbol = symbol.to_string();
        tokio::task::spawn_blocking(move || {
            engine.run_on_series(&series, &symbol, years, lookback_years)
        })
        .await
        .map_err(|e| RegimeError::BacktestAborted(format!("simulation task failed: {}", e)))?
    }

    /// Run the simulation on an already loaded series
    ///
    /// Uses the most recent `required_prices` points; fails rather than
    /// shortening the horizon when fewer are available.
    pub fn run_on_series(
        &self,
        series: &PriceSeries,
        symbol: &str,
        years: u32,
        lookback_years: u32,
    ) -> Result<BacktestReport> {
        self.validate_request(years, lookback_years)?;

        let required = self.config.required_prices(years, lookback_years);
        if series.len() < required {
            return Err(RegimeError::insufficient(
                "backtest history",
                required,
                series.len(),
            ));
        }

        let points = series.tail(required);
        let timeline = Timeline {
            series: points,
            prices: points.iter().map(|p| p.price).collect(),
            lookback: lookback_years as usize * self.config.trading_days_per_year,
            horizon: years as usize * self.config.trading_days_per_year,
        };

        if self.config.signal_window < self.strategy.min_prices_required() {
            tracing::warn!(
                "signal_window {} is shorter than the {} prices {} needs; trend and volatility inputs will be skipped",
                self.config.signal_window,
                self.strategy.min_prices_required(),
                self.strategy.name()
            );
        }

        tracing::info!(
            "Starting walk-forward backtest: {} periods, {}-price lookback, refit every {}",
            timeline.horizon,
            timeline.lookback,
            self.config.refit_every
        );

        let models = self.fit_models(&timeline);
        if let Some(Err(e)) = models.first() {
            return Err(RegimeError::BacktestAborted(format!(
                "initial model fit on {} failed: {}",
                timeline.series[timeline.index(0)].timestamp.format("%Y-%m-%d"),
                e
            )));
        }

        let mut failed_periods = Vec::new();
        let mut exposures = Vec::with_capacity(timeline.horizon);
        let mut benchmark_exposures = Vec::with_capacity(timeline.horizon);

        for k in 0..timeline.horizon {
            let i = timeline.index(k);
            let date = timeline.series[i].timestamp;
            let context_start = (i + 1).saturating_sub(self.config.signal_window);
            let context = &timeline.prices[context_start..=i];

            benchmark_exposures.push(self.benchmark.target_exposure(None, context)?);

            let decision = match &models[k / self.config.refit_every] {
                Ok(model) => self.decide(model, &timeline, i),
                Err(e) => Err(RegimeError::Fitting(format!("refit failed: {}", e))),
            };

            match decision {
                Ok(exposure) => exposures.push(exposure),
                Err(e) if e.is_period_recoverable() => {
                    tracing::warn!("Period {} held flat: {}", date.format("%Y-%m-%d"), e);
                    failed_periods.push(PeriodFailure {
                        date,
                        reason: e.to_string(),
                    });
                    exposures.push(0.0);
                }
                Err(e) => return Err(e),
            }
        }

        let failure_ratio = failed_periods.len() as f64 / timeline.horizon as f64;
        if failure_ratio > self.config.max_failure_ratio {
            return Err(RegimeError::BacktestAborted(format!(
                "{} of {} periods failed ({:.1}% > {:.1}% tolerated)",
                failed_periods.len(),
                timeline.horizon,
                failure_ratio * 100.0,
                self.config.max_failure_ratio * 100.0
            )));
        }

        let asset_returns: Vec<f64> = (0..timeline.horizon)
            .map(|k| {
                let i = timeline.index(k);
                timeline.prices[i + 1] / timeline.prices[i] - 1.0
            })
            .collect();

        let strategy_returns = self.period_returns(&asset_returns, &exposures);
        let benchmark_returns = self.period_returns(&asset_returns, &benchmark_exposures);
        let periods_per_year = self.config.trading_days_per_year as f64;

        let report = BacktestReport {
            symbol: symbol.to_string(),
            years,
            lookback_years,
            strategy_name: self.strategy.name().to_string(),
            benchmark_name: self.benchmark.name().to_string(),
            strategy_metrics: PerformanceMetrics::from_returns(
                &strategy_returns,
                &exposures,
                periods_per_year,
                self.config.risk_free_rate,
            ),
            benchmark_metrics: PerformanceMetrics::from_returns(
                &benchmark_returns,
                &benchmark_exposures,
                periods_per_year,
                self.config.risk_free_rate,
            ),
            strategy_cumulative: cumulative_curve(&strategy_returns, self.config.initial_value),
            benchmark_cumulative: cumulative_curve(&benchmark_returns, self.config.initial_value),
            dates: timeline.series[timeline.lookback..]
                .iter()
                .map(|p| p.timestamp)
                .collect(),
            exposures,
            refits: models.len(),
            failed_periods,
        };

        tracing::info!(
            "Backtest complete: strategy {:+.2}% vs benchmark {:+.2}% ({} flat periods)",
            report.strategy_metrics.total_return * 100.0,
            report.benchmark_metrics.total_return * 100.0,
            report.failed_periods.len()
        );

        Ok(report)
    }

    fn validate_request(&self, years: u32, lookback_years: u32) -> Result<()> {
        if years == 0 || lookback_years == 0 {
            return Err(RegimeError::InvalidInput(format!(
                "years and lookback_years must be positive (got {} and {})",
                years, lookback_years
            )));
        }
        self.config.validate()
    }

    /// One model per refit date, each trained on the lookback window before it
    fn fit_models(&self, timeline: &Timeline<'_>) -> Vec<Result<GaussianHmm>> {
        let refit_dates: Vec<usize> = (0..timeline.horizon)
            .step_by(self.config.refit_every)
            .collect();

        let hmm_config = &self.hmm_config;
        let prices = &timeline.prices;
        let fit_at = |k: usize| -> Result<GaussianHmm> {
            let i = timeline.index(k);
            let features = log_returns(&prices[i - timeline.lookback..i]);
            let mut model = GaussianHmm::new(hmm_config.clone());
            let summary = model.fit(&features)?;
            tracing::debug!(
                "Refit at {}: {} iterations, ll={:.2}",
                timeline.series[i].timestamp.format("%Y-%m-%d"),
                summary.iterations,
                summary.log_likelihood
            );
            Ok(model)
        };

        if self.config.parallel {
            refit_dates.par_iter().map(|&k| fit_at(k)).collect()
        } else {
            refit_dates.iter().map(|&k| fit_at(k)).collect()
        }
    }

    /// Exposure for the period starting at price index `i`
    fn decide(&self, model: &GaussianHmm, timeline: &Timeline<'_>, i: usize) -> Result<f64> {
        let window_start = i.saturating_sub(self.config.inference_window);
        let window = log_returns(&timeline.prices[window_start..=i]);
        let belief = model.predict_proba(&window)?;

        let context_start = (i + 1).saturating_sub(self.config.signal_window);
        self.strategy
            .target_exposure(Some(&belief), &timeline.prices[context_start..=i])
    }

    /// Exposure-weighted returns net of turnover costs
    fn period_returns(&self, asset_returns: &[f64], exposures: &[f64]) -> Vec<f64> {
        let cost_rate = self.config.transaction_cost_bps / 10_000.0;
        let mut previous = 0.0;
        asset_returns
            .iter()
            .zip(exposures)
            .map(|(r, &exposure)| {
                let cost = cost_rate * (exposure - previous).abs();
                previous = exposure;
                exposure * r - cost
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::synthetic::{MarketScenario, Segment, SyntheticDataGenerator};

    /// Short years keep the tests fast: 60 prices per "year"
    fn small_config() -> BacktestConfig {
        BacktestConfig {
            trading_days_per_year: 60,
            refit_every: 10,
            ..BacktestConfig::default()
        }
    }

    fn engine(config: BacktestConfig) -> BacktestEngine {
        BacktestEngine::new(config, HmmConfig::default(), SignalConfig::default())
    }

    fn cycle_series(days: usize, seed: u64) -> PriceSeries {
        SyntheticDataGenerator::new(seed)
            .generate_series(MarketScenario::RegimeCycle, days)
            .unwrap()
    }

    #[test]
    fn test_required_prices() {
        let config = BacktestConfig::default();
        assert_eq!(config.required_prices(1, 1), 505);
        assert_eq!(config.required_prices(10, 3), 3277);
    }

    #[test]
    fn test_report_shape() {
        let engine = engine(small_config());
        let series = cycle_series(400, 3);

        let report = engine.run_on_series(&series, "SYNTH", 2, 2).unwrap();

        assert_eq!(report.dates.len(), 121);
        assert_eq!(report.strategy_cumulative.len(), report.dates.len());
        assert_eq!(report.benchmark_cumulative.len(), report.dates.len());
        assert_eq!(report.exposures.len(), 120);
        assert_eq!(report.refits, 12);
        assert_eq!(report.strategy_cumulative[0], 1.0);
        assert_eq!(report.benchmark_cumulative[0], 1.0);
        assert!(report.strategy_cumulative.iter().all(|v| *v > 0.0));
        assert!(report.benchmark_cumulative.iter().all(|v| *v > 0.0));
        assert_eq!(report.dates.last(), series.last().map(|p| &p.timestamp));
    }

    #[test]
    fn test_benchmark_tracks_asset() {
        let engine = engine(small_config());
        let series = cycle_series(300, 5);

        let report = engine.run_on_series(&series, "SYNTH", 1, 2).unwrap();

        let prices = series.prices();
        let first = prices[prices.len() - 61];
        let last = prices[prices.len() - 1];
        let final_value = *report.benchmark_cumulative.last().unwrap();
        assert!((final_value - last / first).abs() < 1e-9);
        assert_eq!(report.benchmark_metrics.exposure, 1.0);
    }

    #[test]
    fn test_long_only_exposure_bounds() {
        let engine = engine(small_config());
        let report = engine.run_on_series(&cycle_series(300, 7), "SYNTH", 2, 2).unwrap();
        assert!(report.exposures.iter().all(|e| (0.0..=1.0).contains(e)));
    }

    #[test]
    fn test_insufficient_history_fails_fast() {
        let engine = engine(small_config());
        let series = cycle_series(100, 1);

        let result = engine.run_on_series(&series, "SYNTH", 1, 1);
        assert!(matches!(
            result,
            Err(RegimeError::InsufficientData { required: 121, available: 101, .. })
        ));
    }

    #[test]
    fn test_zero_years_rejected() {
        let engine = engine(small_config());
        let result = engine.run_on_series(&cycle_series(300, 1), "SYNTH", 0, 1);
        assert!(matches!(result, Err(RegimeError::InvalidInput(_))));
    }

    #[test]
    fn test_degenerate_first_window_aborts() {
        let engine = engine(small_config());
        let start = chrono::Utc::now();
        let points: Vec<PricePoint> = (0..200)
            .map(|i| PricePoint::new(start + chrono::Duration::days(i), 100.0))
            .collect();
        let series = PriceSeries::new(points).unwrap();

        let result = engine.run_on_series(&series, "FLAT", 1, 1);
        assert!(matches!(result, Err(RegimeError::BacktestAborted(_))));
    }

    #[test]
    fn test_pervasive_failures_abort() {
        // Informative first window, constant prices afterwards: every later refit fails
        let mut gen = SyntheticDataGenerator::new(11);
        let mut points = gen.generate_segments(&[
            Segment::bull(20),
            Segment::bear(20),
            Segment::sideways(20),
        ]);
        let last = *points.last().unwrap();
        for d in 1..=120 {
            points.push(PricePoint::new(
                last.timestamp + chrono::Duration::days(d),
                last.price,
            ));
        }
        let series = PriceSeries::new(points).unwrap();

        let config = BacktestConfig {
            max_failure_ratio: 0.2,
            ..small_config()
        };
        let result = engine(config).run_on_series(&series, "SYNTH", 2, 1);
        assert!(matches!(result, Err(RegimeError::BacktestAborted(_))));
    }

    #[test]
    fn test_failed_refits_are_flat_and_recorded() {
        let mut gen = SyntheticDataGenerator::new(11);
        let mut points = gen.generate_segments(&[
            Segment::bull(20),
            Segment::bear(20),
            Segment::sideways(20),
        ]);
        let last = *points.last().unwrap();
        for d in 1..=120 {
            points.push(PricePoint::new(
                last.timestamp + chrono::Duration::days(d),
                last.price,
            ));
        }
        let series = PriceSeries::new(points).unwrap();

        let config = BacktestConfig {
            max_failure_ratio: 1.0,
            ..small_config()
        };
        let report = engine(config).run_on_series(&series, "SYNTH", 2, 1).unwrap();

        assert!(!report.failed_periods.is_empty());
        for failure in &report.failed_periods {
            assert!(failure.reason.contains("refit failed"), "{}", failure.reason);
            let k = report.dates.iter().position(|d| *d == failure.date).unwrap();
            assert_eq!(report.exposures[k], 0.0);
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let series = cycle_series(400, 13);
        let parallel = engine(small_config())
            .run_on_series(&series, "SYNTH", 2, 2)
            .unwrap();
        let sequential = engine(BacktestConfig {
            parallel: false,
            ..small_config()
        })
        .run_on_series(&series, "SYNTH", 2, 2)
        .unwrap();

        assert_eq!(parallel.exposures, sequential.exposures);
        assert_eq!(parallel.strategy_cumulative, sequential.strategy_cumulative);
    }

    #[test]
    fn test_transaction_costs_reduce_returns() {
        let series = cycle_series(400, 17);
        let free = engine(small_config())
            .run_on_series(&series, "SYNTH", 2, 2)
            .unwrap();
        let costly = engine(BacktestConfig {
            transaction_cost_bps: 50.0,
            ..small_config()
        })
        .run_on_series(&series, "SYNTH", 2, 2)
        .unwrap();

        assert!(
            costly.strategy_metrics.total_return < free.strategy_metrics.total_return
        );
        // Buy-and-hold pays once to enter
        let entry_cost = 50.0 / 10_000.0;
        let ratio = costly.benchmark_cumulative.last().unwrap() / free.benchmark_cumulative.last().unwrap();
        assert!(ratio < 1.0 && ratio > 1.0 - 2.0 * entry_cost);
    }

    #[test]
    fn test_custom_strategy_replaces_regime_strategy() {
        let engine = engine(small_config()).with_strategy(Box::new(BuyAndHoldStrategy::new()));
        let report = engine.run_on_series(&cycle_series(300, 9), "SYNTH", 2, 2).unwrap();

        assert_eq!(report.strategy_name, "BuyAndHold");
        let flat = report.exposures.iter().filter(|e| **e == 0.0).count();
        assert_eq!(flat, report.failed_periods.len());
        assert!(report.exposures.iter().all(|e| *e == 0.0 || *e == 1.0));
        if report.failed_periods.is_empty() {
            assert_eq!(report.strategy_cumulative, report.benchmark_cumulative);
        }
    }
}
