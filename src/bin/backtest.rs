use regimebot::backtest::{
    BacktestConfig, BacktestEngine, BacktestReport, MarketScenario, SyntheticDataGenerator,
};
use regimebot::regime::HmmConfig;
use regimebot::strategy::SignalConfig;
use regimebot::Result;

const YEARS: u32 = 2;
const LOOKBACK_YEARS: u32 = 1;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("regimebot=info")
        .init();

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║          REGIMEBOT BACKTESTING SUITE                  ║");
    println!("╚═══════════════════════════════════════════════════════╝");

    let config = BacktestConfig::default();
    let days = config.required_prices(YEARS, LOOKBACK_YEARS);
    let engine = BacktestEngine::new(config, HmmConfig::default(), SignalConfig::default());

    let scenarios = [
        (MarketScenario::Bull, "📈 Bull (+0.5% daily)"),
        (MarketScenario::Bear, "📉 Bear (-0.5% daily)"),
        (MarketScenario::Sideways, "↔️  Sideways (±0.2%)"),
        (MarketScenario::Volatile, "⚡ Volatile (±4% swings)"),
        (MarketScenario::RegimeCycle, "🔄 Regime Cycle"),
    ];

    let mut reports = Vec::new();

    for (scenario, name) in scenarios {
        let series = SyntheticDataGenerator::new(42).generate_series(scenario, days)?;

        match engine.run_on_series(&series, scenario.name(), YEARS, LOOKBACK_YEARS) {
            Ok(report) => {
                report.print_report();
                reports.push((name, report));
            }
            Err(e) => {
                eprintln!("❌ Backtest failed for {}: {}", name, e);
            }
        }
    }

    print_summary_comparison(&reports);

    Ok(())
}

fn print_summary_comparison(results: &[(&str, BacktestReport)]) {
    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║              SCENARIO COMPARISON                      ║");
    println!("╚═══════════════════════════════════════════════════════╝\n");

    println!(
        "{:<28} {:>10} {:>10} {:>8} {:>8} {:>7}",
        "Scenario", "Return%", "B&H%", "Sharpe", "MaxDD%", "Flat"
    );
    println!("{}", "─".repeat(76));

    for (name, report) in results {
        println!(
            "{:<28} {:>10.2} {:>10.2} {:>8.2} {:>8.2} {:>7}",
            name,
            report.strategy_metrics.total_return * 100.0,
            report.benchmark_metrics.total_return * 100.0,
            report.strategy_metrics.sharpe_ratio,
            report.strategy_metrics.max_drawdown * 100.0,
            report.failed_periods.len()
        );
    }

    println!("\n");

    if let Some((best_name, best)) = results
        .iter()
        .max_by(|a, b| a.1.excess_return().total_cmp(&b.1.excess_return()))
    {
        println!(
            "🏆 Best vs Buy & Hold: {} ({:+.2}% annualized)",
            best_name,
            best.excess_return() * 100.0
        );
    }

    if let Some((worst_name, worst)) = results
        .iter()
        .min_by(|a, b| a.1.excess_return().total_cmp(&b.1.excess_return()))
    {
        println!(
            "⚠️  Worst vs Buy & Hold: {} ({:+.2}% annualized)",
            worst_name,
            worst.excess_return() * 100.0
        );
    }

    let total_refits: usize = results.iter().map(|(_, r)| r.refits).sum();
    let avg_exposure = if results.is_empty() {
        0.0
    } else {
        results
            .iter()
            .map(|(_, r)| r.strategy_metrics.exposure)
            .sum::<f64>()
            / results.len() as f64
    };

    println!("\n📊 Overall Statistics:");
    println!("   Total Refits Across All Scenarios: {}", total_refits);
    println!("   Average Exposure: {:.1}%", avg_exposure * 100.0);

    println!("\n═══════════════════════════════════════════════════════\n");
}
