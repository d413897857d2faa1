use crate::models::log_returns;

/// Arithmetic mean (0.0 for an empty slice)
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (0.0 for fewer than two values)
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Annualised realised volatility of log-returns over the last `window` prices
///
/// Returns None when fewer than `window` prices (or fewer than 3) are available.
pub fn realized_volatility(prices: &[f64], window: usize, periods_per_year: f64) -> Option<f64> {
    if window < 3 || prices.len() < window {
        return None;
    }

    let recent = &prices[prices.len() - window..];
    let returns = log_returns(recent);
    Some(std_dev(&returns) * periods_per_year.sqrt())
}
