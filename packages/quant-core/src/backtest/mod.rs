//! Strategy backtesting.
//!
//! A registry of built-in strategies, a simulated single-position account and
//! an engine that replays daily bars through them.

mod aggregate;
mod broker;
mod engine;
mod strategies;

pub use aggregate::{aggregate, AggregateResult};
pub use broker::{OpenPosition, SimulatedAccount, Sizer};
pub use engine::{
    BacktestEngine, BacktestMetrics, BacktestOutcome, BacktestResult, EquityPoint,
    DEFAULT_INITIAL_CAPITAL,
};
pub use strategies::{
    get_strategy, list_strategies, Rule, RuleSignals, StrategyDefinition, StrategyParameters,
    BUILTIN_STRATEGIES,
};
