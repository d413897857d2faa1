use super::metrics::PerformanceMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An evaluation period that was held flat because no signal could be formed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeriodFailure {
    pub date: DateTime<Utc>,
    pub reason: String,
}

/// Outcome of a walk-forward backtest
///
/// `dates`, `strategy_cumulative` and `benchmark_cumulative` have equal
/// length; both value paths start at the configured initial value on
/// `dates[0]`. `exposures` holds the position taken on each date but the last.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub symbol: String,
    pub years: u32,
    pub lookback_years: u32,
    pub strategy_name: String,
    pub benchmark_name: String,
    pub strategy_metrics: PerformanceMetrics,
    pub benchmark_metrics: PerformanceMetrics,
    pub strategy_cumulative: Vec<f64>,
    pub benchmark_cumulative: Vec<f64>,
    pub dates: Vec<DateTime<Utc>>,
    pub exposures: Vec<f64>,
    /// Number of times the regime model was refit
    pub refits: usize,
    pub failed_periods: Vec<PeriodFailure>,
}

impl BacktestReport {
    /// Number of simulated periods
    pub fn periods(&self) -> usize {
        self.dates.len().saturating_sub(1)
    }

    pub fn failure_ratio(&self) -> f64 {
        if self.periods() == 0 {
            return 0.0;
        }
        self.failed_periods.len() as f64 / self.periods() as f64
    }

    /// Strategy annualised return minus the benchmark's
    pub fn excess_return(&self) -> f64 {
        self.strategy_metrics.annualized_return - self.benchmark_metrics.annualized_return
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║          WALK-FORWARD BACKTEST REPORT                 ║");
        println!("╚═══════════════════════════════════════════════════════╝\n");

        println!("📊 SETUP");
        println!("  Symbol:                {}", self.symbol);
        println!(
            "  Horizon:               {} year(s), {} year(s) lookback",
            self.years, self.lookback_years
        );
        if let (Some(first), Some(last)) = (self.dates.first(), self.dates.last()) {
            println!(
                "  Period:                {} → {}",
                first.format("%Y-%m-%d"),
                last.format("%Y-%m-%d")
            );
        }
        println!("  Periods:               {}", self.periods());
        println!("  Refits:                {}", self.refits);

        println!("\n📈 PERFORMANCE");
        println!(
            "  {:<22} {:>14} {:>14}",
            "", self.strategy_name, self.benchmark_name
        );
        let rows = [
            ("Total Return", self.strategy_metrics.total_return, self.benchmark_metrics.total_return, true),
            ("Annualized Return", self.strategy_metrics.annualized_return, self.benchmark_metrics.annualized_return, true),
            ("Volatility", self.strategy_metrics.volatility, self.benchmark_metrics.volatility, true),
            ("Sharpe Ratio", self.strategy_metrics.sharpe_ratio, self.benchmark_metrics.sharpe_ratio, false),
            ("Sortino Ratio", self.strategy_metrics.sortino_ratio, self.benchmark_metrics.sortino_ratio, false),
            ("Max Drawdown", self.strategy_metrics.max_drawdown, self.benchmark_metrics.max_drawdown, true),
            ("Calmar Ratio", self.strategy_metrics.calmar_ratio, self.benchmark_metrics.calmar_ratio, false),
            ("Win Rate", self.strategy_metrics.win_rate, self.benchmark_metrics.win_rate, true),
            ("Exposure", self.strategy_metrics.exposure, self.benchmark_metrics.exposure, true),
        ];
        for (label, strategy, benchmark, pct) in rows {
            if pct {
                println!(
                    "  {:<22} {:>13.2}% {:>13.2}%",
                    label,
                    strategy * 100.0,
                    benchmark * 100.0
                );
            } else {
                println!("  {:<22} {:>14.2} {:>14.2}", label, strategy, benchmark);
            }
        }

        println!("\n⚠️  FAILED PERIODS");
        println!(
            "  Flat periods:          {} ({:.1}%)",
            self.failed_periods.len(),
            self.failure_ratio() * 100.0
        );
        for failure in self.failed_periods.iter().take(5) {
            println!("    {} - {}", failure.date.format("%Y-%m-%d"), failure.reason);
        }
        if self.failed_periods.len() > 5 {
            println!("    ... {} more", self.failed_periods.len() - 5);
        }

        println!();
    }
}
