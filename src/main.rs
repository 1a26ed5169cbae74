// src/main.rs
use ton_order_engine::chain::paper::{
    MemoryOrderStore, PaperChain, RecordingSubmitter, StaticWalletResolver,
};
use ton_order_engine::chain::OrderStore;
use ton_order_engine::config::Config;
use ton_order_engine::domain::errors::{AppError, AppResult};
use ton_order_engine::trading::{OrderEngine, SwapOrchestrator};

use std::sync::Arc;
use tokio::signal::ctrl_c;

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load configuration
    let config = match std::env::var("CONFIG_FILE") {
        Ok(path) => Config::from_file(path)?,
        Err(_) => Config::from_env()?,
    };

    // Initialize logging
    config.init_logging()?;

    log::info!("Starting ton_order_engine v{}", env!("CARGO_PKG_VERSION"));
    for (symbol, pools) in &config.pools {
        let primary = pools.first().map(|p| p.dex.as_str()).unwrap_or("-");
        log::info!("{}: {} pool(s), primary on {}", symbol, pools.len(), primary);
    }

    // Dry-run collaborators: transactions are prepared and recorded, never broadcast
    let chain = Arc::new(PaperChain::from_config(&config.paper, &config.pools));
    let store: Arc<dyn OrderStore> = match &config.paper.orders_file {
        Some(path) => Arc::new(MemoryOrderStore::open(path)?),
        None => Arc::new(MemoryOrderStore::new()),
    };
    let wallets = Arc::new(StaticWalletResolver::from_config(&config.paper));
    let submitter = Arc::new(RecordingSubmitter::from_config(&config.paper));

    let orchestrator = Arc::new(SwapOrchestrator::new(&config, chain, wallets, submitter));
    let engine = Arc::new(OrderEngine::new(&config, store, orchestrator));

    // Resume live orders
    engine.load_live_orders().await?;

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    // Wait for shutdown signal
    log::info!("Engine is running. Press Ctrl+C to stop.");
    ctrl_c().await?;

    // Shutdown
    log::info!("Shutting down...");
    engine.stop();
    handle
        .await
        .map_err(|e| AppError::Unknown(format!("polling task failed: {}", e)))?;

    log::info!("Shutdown complete. Goodbye!");
    Ok(())
}
