use crate::backtest::BacktestConfig;
use crate::regime::HmmConfig;
use crate::strategy::SignalConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix; nested keys use `__`, e.g. `REGIMEBOT__HMM__N_RESTARTS`
pub const ENV_PREFIX: &str = "REGIMEBOT";

/// Where historical prices come from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Seeded synthetic series on a 252-day trading calendar
    Synthetic,
    /// CoinGecko daily closes; crypto trades every calendar day, so the
    /// annualisation defaults to 365 periods unless set explicitly
    CoinGecko,
}

impl DataSource {
    /// Observations per year in this source's calendar
    pub fn periods_per_year(&self) -> usize {
        match self {
            DataSource::Synthetic => 252,
            DataSource::CoinGecko => 365,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub source: DataSource,
    /// Asset identifier passed to the provider (CoinGecko coin id)
    pub symbol: String,
    pub coingecko_base_url: String,
    pub coingecko_api_key: Option<String>,
    /// Seed for the synthetic regime-cycle series
    pub synthetic_seed: u64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            source: DataSource::Synthetic,
            symbol: "bitcoin".to_string(),
            coingecko_base_url: crate::api::coingecko::COINGECKO_API_BASE.to_string(),
            coingecko_api_key: None,
            synthetic_seed: 42,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub hmm: HmmConfig,
    pub signal: SignalConfig,
    pub backtest: BacktestConfig,
}

impl Settings {
    /// Defaults with the annualisation matched to `source`'s calendar
    pub fn defaults_for(source: DataSource) -> Self {
        let mut settings = Settings::default();
        settings.data.source = source;
        settings.backtest.trading_days_per_year = source.periods_per_year();
        settings.signal.periods_per_year = source.periods_per_year() as f64;
        settings
    }

    /// Load settings: defaults, then an optional file, then environment variables
    ///
    /// The defaults follow the configured data source's calendar; explicit
    /// `trading_days_per_year` / `periods_per_year` values still win.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        let overrides = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        // An unreadable source is reported by the full deserialize below
        let source = overrides
            .get::<DataSource>("data.source")
            .unwrap_or(DataSource::Synthetic);

        let settings: Settings = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Settings::defaults_for(source))?)
            .add_source(overrides)
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.signal.validate()?;
        self.backtest.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.data.source, DataSource::Synthetic);
        assert_eq!(settings.hmm.n_restarts, 5);
        assert_eq!(settings.backtest.refit_every, 21);
        assert_eq!(settings.signal.buy_threshold, 0.3);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("regimebot-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[data]\nsource = \"coingecko\"\nsymbol = \"ethereum\"\n\n[backtest]\nrefit_every = 5\nallow_short = true\n\n[hmm]\nmax_iter = 50"
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.data.source, DataSource::CoinGecko);
        assert_eq!(settings.data.symbol, "ethereum");
        assert_eq!(settings.backtest.refit_every, 5);
        assert!(settings.backtest.allow_short);
        assert_eq!(settings.hmm.max_iter, 50);
        // CoinGecko data is annualised on its 365-day calendar
        assert_eq!(settings.backtest.trading_days_per_year, 365);
        assert_eq!(settings.signal.periods_per_year, 365.0);
        // Untouched keys keep their defaults
        assert_eq!(settings.backtest.inference_window, 30);
        assert_eq!(settings.signal.trend_window, 50);
    }

    #[test]
    fn test_explicit_calendar_overrides_source_default() {
        let path = std::env::temp_dir().join(format!("regimebot-cal-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[data]\nsource = \"coingecko\"\n\n[backtest]\ntrading_days_per_year = 252\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.backtest.trading_days_per_year, 252);
        assert_eq!(settings.signal.periods_per_year, 365.0);
    }

    #[test]
    fn test_source_calendars() {
        assert_eq!(Settings::default().backtest.trading_days_per_year, 252);
        let coingecko = Settings::defaults_for(DataSource::CoinGecko);
        assert_eq!(coingecko.data.source, DataSource::CoinGecko);
        assert_eq!(coingecko.backtest.trading_days_per_year, 365);
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let path = std::env::temp_dir().join(format!("regimebot-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[backtest]\nrefit_every = 0\n").unwrap();

        let result = Settings::load(Some(&path));
        std::fs::remove_file(&path).ok();

        assert!(result.is_err());
    }
}
