//! Read operations exposed to outer surfaces (CLI, HTTP)
//!
//! Each operation returns a serializable response object. Core errors are
//! mapped to [`ErrorResponse`] by the caller.

use crate::api::{CoinGeckoProvider, DataProvider, InMemoryProvider};
use crate::backtest::{BacktestEngine, BacktestReport, MarketScenario, SyntheticDataGenerator};
use crate::config::{DataSource, Settings};
use crate::error::RegimeError;
use crate::models::{log_returns, Regime, TradeAction};
use crate::regime::{FitSummary, GaussianHmm, ModelState};
use crate::strategy::SignalGenerator;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_BACKTEST_YEARS: u32 = 10;
pub const DEFAULT_LOOKBACK_YEARS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub model_fitted: bool,
    pub data_source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegimeResponse {
    pub bull_probability: f64,
    pub bear_probability: f64,
    pub sideways_probability: f64,
    pub dominant_regime: Regime,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalResponse {
    pub action: TradeAction,
    pub confidence: f64,
    pub regime_probs: Vec<f64>,
    pub weighted_signal: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResponse {
    pub strategy_metrics: BTreeMap<String, f64>,
    pub benchmark_metrics: BTreeMap<String, f64>,
    pub strategy_cumulative: Vec<f64>,
    pub benchmark_cumulative: Vec<f64>,
    pub dates: Vec<DateTime<Utc>>,
    pub failed_periods: usize,
    pub refits: usize,
}

impl From<&BacktestReport> for BacktestResponse {
    fn from(report: &BacktestReport) -> Self {
        Self {
            strategy_metrics: report.strategy_metrics.to_map(),
            benchmark_metrics: report.benchmark_metrics.to_map(),
            strategy_cumulative: report.strategy_cumulative.clone(),
            benchmark_cumulative: report.benchmark_cumulative.clone(),
            dates: report.dates.clone(),
            failed_periods: report.failed_periods.len(),
            refits: report.refits,
        }
    }
}

/// Structured failure returned in place of a response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: String,
}

impl From<&RegimeError> for ErrorResponse {
    fn from(err: &RegimeError) -> Self {
        let kind = match err {
            RegimeError::InsufficientData { .. } => "insufficient_data",
            RegimeError::Fitting(_) => "fitting_error",
            RegimeError::NotFitted => "not_fitted",
            RegimeError::InvalidInput(_) => "invalid_input",
            RegimeError::BacktestAborted(_) => "backtest_aborted",
            RegimeError::Provider(_) => "provider_error",
            RegimeError::Config(_) => "config_error",
        };
        Self {
            error: kind.to_string(),
            detail: err.to_string(),
        }
    }
}

/// Regime, signal and backtest operations over one data provider
///
/// Holds the current model explicitly; it is fitted on first use and
/// replaced wholesale by [`RegimeService::refit`].
pub struct RegimeService {
    provider: Arc<dyn DataProvider>,
    settings: Settings,
    model: ModelState,
}

impl RegimeService {
    pub fn new(provider: Arc<dyn DataProvider>, settings: Settings) -> Self {
        Self {
            provider,
            settings,
            model: ModelState::new(),
        }
    }

    /// Build the provider named in the settings
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let provider: Arc<dyn DataProvider> = match settings.data.source {
            DataSource::Synthetic => {
                let days = (DEFAULT_BACKTEST_YEARS + DEFAULT_LOOKBACK_YEARS) as usize
                    * settings.backtest.trading_days_per_year;
                let series = SyntheticDataGenerator::new(settings.data.synthetic_seed)
                    .generate_series(MarketScenario::RegimeCycle, days)?;
                Arc::new(InMemoryProvider::new().with_series(settings.data.symbol.clone(), series))
            }
            DataSource::CoinGecko => Arc::new(CoinGeckoProvider::with_base_url(
                &settings.data.coingecko_base_url,
                settings.data.coingecko_api_key.clone(),
            )?),
        };
        Ok(Self::new(provider, settings))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn model_state(&self) -> &ModelState {
        &self.model
    }

    pub async fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            model_fitted: self.model.current().await.is_some(),
            data_source: self.provider.name().to_string(),
        }
    }

    /// Current regime probabilities from the most recent inference window
    pub async fn latest_regime(&self) -> Result<RegimeResponse> {
        let model = self.ensure_model().await?;
        let window = self.settings.backtest.inference_window;
        let history = self.provider.get_history(&self.settings.data.symbol, window + 1).await?;
        let last = history
            .last()
            .ok_or_else(|| RegimeError::insufficient("latest price history", window + 1, 0))?;

        let belief = model.predict_proba(&history.log_returns())?;
        Ok(RegimeResponse {
            bull_probability: belief.bull(),
            bear_probability: belief.bear(),
            sideways_probability: belief.sideways(),
            dominant_regime: belief.dominant().0,
            timestamp: last.timestamp,
        })
    }

    /// Current trading signal
    pub async fn latest_signal(&self) -> Result<SignalResponse> {
        let model = self.ensure_model().await?;
        let inference_window = self.settings.backtest.inference_window;
        let signal_window = self.settings.backtest.signal_window;

        let history = self
            .provider
            .get_history(
                &self.settings.data.symbol,
                signal_window.max(inference_window + 1),
            )
            .await?;
        let last = history.last().ok_or_else(|| {
            RegimeError::insufficient("latest price history", inference_window + 1, 0)
        })?;

        let recent: Vec<f64> = history
            .tail(inference_window + 1)
            .iter()
            .map(|p| p.price)
            .collect();
        let belief = model.predict_proba(&log_returns(&recent))?;

        let context: Vec<f64> = history.tail(signal_window).iter().map(|p| p.price).collect();
        let signal = SignalGenerator::new(self.settings.signal.clone())
            .generate(belief.as_slice(), &context)?;

        Ok(SignalResponse {
            action: signal.action,
            confidence: signal.confidence,
            regime_probs: signal.regime_probs.to_vec(),
            weighted_signal: signal.weighted_signal,
            timestamp: last.timestamp,
        })
    }

    /// Walk-forward backtest over the configured symbol
    pub async fn backtest(&self, years: u32, lookback_years: u32) -> Result<BacktestResponse> {
        let report = self.backtest_report(years, lookback_years).await?;
        Ok(BacktestResponse::from(&report))
    }

    pub async fn backtest_report(&self, years: u32, lookback_years: u32) -> Result<BacktestReport> {
        let engine = BacktestEngine::new(
            self.settings.backtest.clone(),
            self.settings.hmm.clone(),
            self.settings.signal.clone(),
        );
        engine
            .run(
                self.provider.as_ref(),
                &self.settings.data.symbol,
                years,
                lookback_years,
            )
            .await
    }

    /// Fit a fresh model on the latest history and swap it in
    pub async fn refit(&self) -> Result<FitSummary> {
        let (model, summary) = self.fit_latest().await?;
        self.model.replace(model).await;
        tracing::info!(
            "Regime model refit on {} observations (ll={:.2})",
            summary.n_observations,
            summary.log_likelihood
        );
        Ok(summary)
    }

    async fn ensure_model(&self) -> Result<Arc<GaussianHmm>> {
        self.model
            .get_or_try_init(|| async move { self.fit_latest().await.map(|(model, _)| model) })
            .await
    }

    async fn fit_latest(&self) -> Result<(GaussianHmm, FitSummary)> {
        let length =
            DEFAULT_LOOKBACK_YEARS as usize * self.settings.backtest.trading_days_per_year + 1;
        let history = self.provider.get_history(&self.settings.data.symbol, length).await?;

        let required = self.settings.hmm.min_fit_observations() + 1;
        if history.len() < required {
            return Err(RegimeError::insufficient(
                "model training history",
                required,
                history.len(),
            ));
        }

        let config = self.settings.hmm.clone();
        let features = history.log_returns();
        tokio::task::spawn_blocking(move || -> Result<(GaussianHmm, FitSummary)> {
            let mut model = GaussianHmm::new(config);
            let summary = model.fit(&features)?;
            Ok((model, summary))
        })
        .await
        .map_err(|e| RegimeError::Fitting(format!("fit task failed: {}", e)))?
    }
}
