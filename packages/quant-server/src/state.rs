use anyhow::{Context, Result};
use quant_core::signals::{EnsembleModel, ModelKey};
use quant_core::{PortfolioOptimizer, SignalGenerator, VarCalculator};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ProviderKind, ServerConfig};
use crate::market::{InMemoryProvider, MarketDataProvider, MarketDataService, YahooProvider};
use crate::routes::backtest::BacktestRun;
use crate::store::TtlStore;

/// Shared application state, passed to all route handlers via `axum::extract::State`.
pub struct AppState {
    pub config: ServerConfig,
    pub market: MarketDataService,
    /// Trained signal ensembles keyed by symbol and timeframe
    pub models: Arc<TtlStore<ModelKey, Arc<EnsembleModel>>>,
    /// Completed backtests keyed by run id
    pub backtests: TtlStore<String, BacktestRun>,
    pub optimizer: PortfolioOptimizer,
    pub var: VarCalculator,
    pub signals: SignalGenerator,
}

impl AppState {
    /// Wire every service around `provider`.
    pub fn new(config: ServerConfig, provider: Arc<dyn MarketDataProvider>) -> Arc<Self> {
        let cache = &config.cache;
        let secs = Duration::from_secs;

        let market = MarketDataService::new(
            provider,
            TtlStore::new(secs(cache.quote_ttl_secs), cache.capacity),
            TtlStore::new(secs(cache.history_ttl_secs), cache.capacity),
            config.market_data.retry_policy(),
            config.market_data.concurrency,
        );
        let models = Arc::new(TtlStore::new(secs(cache.model_ttl_secs), cache.capacity));
        let backtests = TtlStore::new(secs(cache.backtest_ttl_secs), cache.capacity);

        let var = VarCalculator::new()
            .with_simulations(config.analytics.monte_carlo_paths)
            .with_seed(config.analytics.monte_carlo_seed);
        let signals = SignalGenerator::new().with_model_store(models.clone());
        let optimizer = PortfolioOptimizer::new(config.analytics.risk_free_rate);

        Arc::new(Self {
            config,
            market,
            models,
            backtests,
            optimizer,
            var,
            signals,
        })
    }

    /// Build the configured provider, then the state around it.
    pub fn from_config(config: ServerConfig) -> Result<Arc<Self>> {
        let provider: Arc<dyn MarketDataProvider> = match config.market_data.provider {
            ProviderKind::Yahoo => Arc::new(
                YahooProvider::new(
                    &config.market_data.base_url,
                    Duration::from_secs(config.market_data.request_timeout_secs),
                )
                .context("Failed to create Yahoo Finance client")?,
            ),
            ProviderKind::File => {
                let path = config
                    .market_data
                    .data_file
                    .as_deref()
                    .context("market_data.data_file is not set")?;
                let provider = InMemoryProvider::from_file(path)
                    .with_context(|| format!("Failed to load price file {}", path.display()))?;
                tracing::info!(
                    path = %path.display(),
                    symbols = provider.symbols().len(),
                    "Loaded price file"
                );
                Arc::new(provider)
            }
        };
        Ok(Self::new(config, provider))
    }
}
