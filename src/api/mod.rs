pub mod coingecko;

pub use coingecko::{CoinGeckoProvider, MarketChartData};

use crate::models::PriceSeries;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Source of historical daily prices
///
/// Implementations return at most `length` of the most recent points in
/// chronological order. An empty series means no data is available for the
/// symbol; transport failures are errors.
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn get_history(&self, symbol: &str, length: usize) -> Result<PriceSeries>;

    fn name(&self) -> &str;
}

/// Provider serving pre-loaded series, used for synthetic data and tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    series: HashMap<String, PriceSeries>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, symbol: impl Into<String>, series: PriceSeries) -> Self {
        self.insert(symbol, series);
        self
    }

    pub fn insert(&mut self, symbol: impl Into<String>, series: PriceSeries) {
        self.series.insert(symbol.into(), series);
    }
}

#[async_trait]
impl DataProvider for InMemoryProvider {
    async fn get_history(&self, symbol: &str, length: usize) -> Result<PriceSeries> {
        match self.series.get(symbol) {
            Some(series) => PriceSeries::new(series.tail(length).to_vec()),
            None => {
                tracing::debug!("No in-memory series for {}", symbol);
                Ok(PriceSeries::default())
            }
        }
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
