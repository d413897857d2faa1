use clap::{Parser, Subcommand};
use regimebot::config::Settings;
use regimebot::service::{
    ErrorResponse, RegimeService, DEFAULT_BACKTEST_YEARS, DEFAULT_LOOKBACK_YEARS,
};
use regimebot::Result;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "regimebot")]
#[command(about = "Regime-switching trading signals and walk-forward backtests")]
#[command(version)]
struct Cli {
    /// Settings file (TOML); REGIMEBOT__* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the human-readable report instead of JSON where available
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Service status
    Health,
    /// Current regime probabilities
    Regime,
    /// Current trading signal
    Signal,
    /// Fit a fresh model on the latest history
    Refit,
    /// Walk-forward backtest against buy-and-hold
    Backtest {
        /// Years of evaluation
        #[arg(short, long, default_value_t = DEFAULT_BACKTEST_YEARS)]
        years: u32,

        /// Years of history each refit trains on
        #[arg(short, long, default_value_t = DEFAULT_LOOKBACK_YEARS)]
        lookback_years: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            print_json(&ErrorResponse::from(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    tracing::info!(
        "🚀 regimebot starting ({:?} data, symbol {})",
        settings.data.source,
        settings.data.symbol
    );

    let service = RegimeService::from_settings(settings)?;

    match cli.command {
        Commands::Health => print_json(&service.health().await),
        Commands::Regime => print_json(&service.latest_regime().await?),
        Commands::Signal => print_json(&service.latest_signal().await?),
        Commands::Refit => print_json(&service.refit().await?),
        Commands::Backtest {
            years,
            lookback_years,
        } => {
            if cli.pretty {
                service
                    .backtest_report(years, lookback_years)
                    .await?
                    .print_report();
            } else {
                print_json(&service.backtest(years, lookback_years).await?);
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!("Failed to serialize response: {}", e),
    }
}

fn setup_logging() {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("regimebot=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
