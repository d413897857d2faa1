use thiserror::Error;

/// Errors raised by the regime model, signal generator and backtest engine
#[derive(Error, Debug)]
pub enum RegimeError {
    #[error("insufficient data for {what}: need {required}, got {available}")]
    InsufficientData {
        what: &'static str,
        required: usize,
        available: usize,
    },

    #[error("model fitting failed: {0}")]
    Fitting(String),

    #[error("model has not been fitted")]
    NotFitted,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("backtest aborted: {0}")]
    BacktestAborted(String),

    #[error("data provider error: {0}")]
    Provider(#[from] anyhow::Error),

    #[error("config error: {0}")]
    Config(#[from] ::config::ConfigError),
}

impl RegimeError {
    pub(crate) fn insufficient(what: &'static str, required: usize, available: usize) -> Self {
        Self::InsufficientData {
            what,
            required,
            available,
        }
    }

    /// Whether a backtest may record this error against a single period and carry on
    pub fn is_period_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Fitting(_) | Self::InsufficientData { .. } | Self::NotFitted
        )
    }
}
