//! Quant CLI - run the analytics on a local JSON price file.
//!
//! The price file maps symbols to bar arrays. Every command prints an
//! `ApiResponse` envelope as JSON.

use clap::{Parser, Subcommand};
use quant_core::backtest::{get_strategy, list_strategies, BacktestEngine, Sizer};
use quant_core::portfolio::{OptimizationRequest, PortfolioOptimizer, WeightBounds, Weights};
use quant_core::risk::{portfolio_returns, ScenarioKind, StressTester, VarCalculator, VarMethod};
use quant_core::signals::{SignalGenerator, StrategyType};
use quant_core::{ApiResponse, Error, PriceSeries, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "quant")]
#[command(about = "Portfolio optimization, risk, signals and backtests on local price data")]
#[command(version)]
struct Cli {
    /// JSON file of {"SYMBOL": [bars...]}
    #[arg(short, long, global = true, default_value = "prices.json")]
    prices: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize portfolio weights
    Optimize {
        /// Symbols (comma-separated)
        #[arg(short, long)]
        symbols: String,
        #[arg(short, long, default_value = "mean_variance")]
        method: String,
        #[arg(short, long, default_value = "max_sharpe")]
        objective: String,
        #[arg(long, default_value = "0.0")]
        min_weight: f64,
        #[arg(long, default_value = "1.0")]
        max_weight: f64,
        #[arg(long, default_value = "0.02")]
        risk_free_rate: f64,
    },
    /// Value-at-Risk of a weighted portfolio
    Var {
        /// Holdings as SYMBOL=WEIGHT pairs (comma-separated)
        #[arg(short = 'w', long)]
        portfolio: String,
        #[arg(short, long, default_value = "historical")]
        method: String,
        #[arg(short, long, default_value = "0.95")]
        confidence: f64,
        /// Horizon in trading days
        #[arg(long, default_value = "1")]
        horizon: usize,
    },
    /// Stress test a weighted portfolio
    Stress {
        #[arg(short = 'w', long)]
        portfolio: String,
        /// Scenario names (comma-separated); all when omitted
        #[arg(long)]
        scenarios: Option<String>,
        #[arg(long, default_value = "0.2")]
        shock: f64,
    },
    /// Trading signals on the latest bar
    Signals {
        #[arg(short, long)]
        symbols: String,
        #[arg(long, default_value = "momentum")]
        strategy: String,
        #[arg(short, long, default_value = "0.5")]
        risk: f64,
    },
    /// Backtest a built-in strategy
    Backtest {
        #[arg(long)]
        strategy: String,
        #[arg(short, long)]
        symbols: String,
        #[arg(short, long, default_value = "100000")]
        capital: f64,
        /// Buy this many shares per entry instead of investing all cash
        #[arg(long)]
        stake: Option<u32>,
    },
    /// List built-in backtest strategies
    Strategies,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (output, code) = match run(&cli.prices, cli.command) {
        Ok(data) => (ApiResponse::ok(data), ExitCode::SUCCESS),
        Err(e) => (ApiResponse::err(e.to_string()), ExitCode::FAILURE),
    };

    match serde_json::to_string_pretty(&output) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("failed to encode output: {}", e);
            return ExitCode::FAILURE;
        }
    }
    code
}

fn run(prices: &Path, command: Commands) -> Result<Value> {
    match command {
        Commands::Optimize {
            symbols,
            method,
            objective,
            min_weight,
            max_weight,
            risk_free_rate,
        } => {
            let series = load(prices, &split_symbols(&symbols))?;
            let request = OptimizationRequest::new(&method, &objective)?
                .with_bounds(WeightBounds::new(min_weight, max_weight)?);
            let allocation = PortfolioOptimizer::new(risk_free_rate).optimize(&series, &request)?;
            Ok(serde_json::to_value(allocation)?)
        }
        Commands::Var {
            portfolio,
            method,
            confidence,
            horizon,
        } => {
            let weights = parse_portfolio(&portfolio)?;
            let method: VarMethod = method.parse()?;
            let series = load(prices, &weights.keys().cloned().collect::<Vec<_>>())?;
            let returns = portfolio_returns(&series, &weights)?;
            let report = VarCalculator::new().calculate(&returns, confidence, horizon, method)?;
            Ok(serde_json::to_value(report)?)
        }
        Commands::Stress {
            portfolio,
            scenarios,
            shock,
        } => {
            let weights = parse_portfolio(&portfolio)?;
            let kinds = match scenarios {
                Some(names) => names
                    .split(',')
                    .map(|s| s.trim().parse())
                    .collect::<Result<Vec<ScenarioKind>>>()?,
                None => ScenarioKind::ALL.to_vec(),
            };
            let series = load(prices, &weights.keys().cloned().collect::<Vec<_>>())?;
            let returns = portfolio_returns(&series, &weights)?;
            let report = StressTester::new(shock)?.run(&weights, &returns, &kinds, &[])?;
            Ok(serde_json::to_value(report)?)
        }
        Commands::Signals {
            symbols,
            strategy,
            risk,
        } => {
            let strategy: StrategyType = strategy.parse()?;
            let generator = SignalGenerator::new();
            let mut signals = Vec::new();
            let mut errors = BTreeMap::new();
            for series in load(prices, &split_symbols(&symbols))? {
                // Price files hold daily bars
                match generator.generate(&series, "1d", strategy, risk) {
                    Ok(signal) => signals.push(signal),
                    Err(e) => {
                        errors.insert(series.symbol.clone(), e.to_string());
                    }
                }
            }
            Ok(json!({
                "signals": signals,
                "errors": errors,
                "strategy_type": strategy,
                "risk_level": risk,
            }))
        }
        Commands::Backtest {
            strategy,
            symbols,
            capital,
            stake,
        } => {
            let definition = get_strategy(&strategy)?;
            let series = load(prices, &split_symbols(&symbols))?;
            let sizer = match stake {
                Some(0) => return Err(Error::InvalidInput("stake must be at least one share".into())),
                Some(stake) => Sizer::Fixed(stake),
                None => Sizer::AllIn,
            };
            let outcome = BacktestEngine::new(capital)?
                .with_sizer(sizer)
                .run(&definition, &series)?;
            Ok(serde_json::to_value(outcome)?)
        }
        Commands::Strategies => Ok(json!({ "strategies": list_strategies() })),
    }
}

fn split_symbols(symbols: &str) -> Vec<String> {
    symbols
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `AAPL=0.6,MSFT=0.4`.
fn parse_portfolio(portfolio: &str) -> Result<Weights> {
    portfolio
        .split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| {
            let (symbol, weight) = pair
                .split_once('=')
                .ok_or_else(|| Error::InvalidInput(format!("expected SYMBOL=WEIGHT, got '{}'", pair)))?;
            let weight: f64 = weight
                .trim()
                .parse()
                .map_err(|_| Error::InvalidInput(format!("invalid weight for {}: '{}'", symbol, weight)))?;
            Ok((symbol.trim().to_uppercase(), weight))
        })
        .collect()
}

fn load(path: &Path, symbols: &[String]) -> Result<Vec<PriceSeries>> {
    if symbols.is_empty() {
        return Err(Error::InvalidInput("no symbols given".into()));
    }
    let mut all = PriceSeries::load_map(path)?;
    symbols
        .iter()
        .map(|s| {
            all.remove(s)
                .ok_or_else(|| Error::NotFound(format!("{} is not in {}", s, path.display())))
        })
        .collect()
}
