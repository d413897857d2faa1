use super::DataProvider;
use crate::models::{PricePoint, PriceSeries};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

pub const COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";
const RATE_LIMIT_RPM: u32 = 30; // Demo API: 30 requests per minute
const MAX_RETRIES: u32 = 3;

// Type alias for the rate limiter to simplify signatures
type CoinGeckoRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Response from /market_chart endpoint
#[derive(Debug, Deserialize)]
pub struct MarketChartData {
    pub prices: Vec<[f64; 2]>, // [timestamp_ms, price]
    #[serde(default)]
    pub total_volumes: Vec<[f64; 2]>, // [timestamp_ms, volume_24h]
}

/// CoinGecko daily price history with rate limiting and retries
///
/// This struct is cloneable to allow sharing across async tasks.
/// All clones share the same rate limiter.
#[derive(Clone)]
pub struct CoinGeckoProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: Arc<CoinGeckoRateLimiter>,
    retry_backoff: Duration,
}

impl CoinGeckoProvider {
    /// Create a client against the public API
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_base_url(COINGECKO_API_BASE, api_key)
    }

    /// Create a client against an alternative base URL (proxy, pro API, test server)
    pub fn with_base_url(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        // Create rate limiter: 30 requests per minute
        let rpm = NonZeroU32::new(RATE_LIMIT_RPM).context("Rate limit must be non-zero")?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            rate_limiter,
            retry_backoff: Duration::from_secs(1),
        })
    }

    /// Base delay for exponential backoff between retries
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff * 2u32.pow(attempt)
    }

    /// Make a rate-limited API request with retry logic
    async fn make_request(&self, url: &str) -> Result<reqwest::Response> {
        for attempt in 1..=MAX_RETRIES {
            // Wait for rate limiter
            self.rate_limiter.until_ready().await;

            let mut request = self.client.get(url);
            if let Some(key) = &self.api_key {
                request = request.header("x-cg-demo-api-key", key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    // Rate limit and server errors are retried
                    if status.as_u16() == 429 || status.is_server_error() {
                        let backoff = self.backoff(attempt);
                        tracing::warn!(
                            "CoinGecko returned {}, retrying in {:?} (attempt {}/{})",
                            status,
                            backoff,
                            attempt,
                            MAX_RETRIES
                        );
                        if attempt < MAX_RETRIES {
                            tokio::time::sleep(backoff).await;
                        }
                        continue;
                    }

                    // Other errors (4xx) - don't retry
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    anyhow::bail!("CoinGecko API error ({}): {}", status, error_text);
                }
                Err(e) if attempt < MAX_RETRIES => {
                    let backoff = self.backoff(attempt);
                    tracing::warn!(
                        "Network error: {}, retrying in {:?} (attempt {}/{})",
                        e,
                        backoff,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => anyhow::bail!("Network error after {} retries: {}", MAX_RETRIES, e),
            }
        }

        anyhow::bail!("Failed after {} retries", MAX_RETRIES)
    }

    /// Fetch market chart data (price and volume time series)
    pub async fn get_market_chart(&self, coin_id: &str, days: usize) -> Result<MarketChartData> {
        let url = format!(
            "{}/coins/{}/market_chart?vs_currency=usd&days={}&interval=daily",
            self.base_url, coin_id, days
        );

        tracing::debug!("Fetching market chart for {} ({}d)", coin_id, days);

        let response = self.make_request(&url).await?;

        let data: MarketChartData = response
            .json()
            .await
            .context("Failed to parse market chart")?;

        tracing::debug!("Fetched {} price points for {}", data.prices.len(), coin_id);

        Ok(data)
    }
}

/// Collapse raw chart points to the last valid observation of each UTC day
pub fn daily_points(raw: &[[f64; 2]]) -> Vec<PricePoint> {
    let mut by_day: BTreeMap<NaiveDate, PricePoint> = BTreeMap::new();

    for [timestamp_ms, price] in raw.iter().copied() {
        if !price.is_finite() || price <= 0.0 || !timestamp_ms.is_finite() {
            continue;
        }
        let Some(timestamp) = DateTime::<Utc>::from_timestamp_millis(timestamp_ms as i64) else {
            continue;
        };

        let point = PricePoint::new(timestamp, price);
        by_day
            .entry(timestamp.date_naive())
            .and_modify(|existing| {
                if point.timestamp >= existing.timestamp {
                    *existing = point;
                }
            })
            .or_insert(point);
    }

    by_day.into_values().collect()
}

#[async_trait]
impl DataProvider for CoinGeckoProvider {
    async fn get_history(&self, symbol: &str, length: usize) -> crate::Result<PriceSeries> {
        if length == 0 {
            return Ok(PriceSeries::default());
        }

        let chart = self.get_market_chart(symbol, length).await?;
        let points = daily_points(&chart.prices);
        if points.is_empty() {
            tracing::warn!("CoinGecko returned no usable prices for {}", symbol);
            return Ok(PriceSeries::default());
        }

        let start = points.len().saturating_sub(length);
        PriceSeries::new(points[start..].to_vec())
    }

    fn name(&self) -> &str {
        "coingecko"
    }
}
