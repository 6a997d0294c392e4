//! # grid-runner
//!
//! Main entry point for the grid slot sync system.
//!
//! Loads a JSON configuration file, connects one adapter per account, builds a
//! slot ledger per configured symbol and keeps it reconciled with the
//! exchange until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! grid-runner config.json --log-level info
//! grid-runner config.json --reconcile-only
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use grid_core::config::{AccountConfig, SymbolConfig};
use grid_core::logging::{FileFormat, init_logging};
use grid_engine::{
    EventDispatcher, JsonlStorage, MemoryStorage, ReconcileConfig, ReconciliationEngine, SlotExecutor, SlotLedger,
    Storage, TaskSupervisor,
};
use grid_td::ExchangeAdapter;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Grid slot sync runner.
#[derive(Parser)]
#[command(name = "grid-runner", about = "Grid slot sync: exchange connectivity and slot reconciliation")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output. Overrides `meta.log_path`.
    #[arg(long)]
    log_dir: Option<String>,

    /// Track and reconcile only; never place orders even where `auto_place` is set.
    #[arg(long)]
    reconcile_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Configuration and logging
    let config = grid_core::config::load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());
    let file_format = if config.json_logs() { FileFormat::Json } else { FileFormat::Text };
    init_logging(&cli.log_level, log_dir.as_deref(), &config.module_name(), file_format);

    info!("grid-runner starting, config={} log_level={}", cli.config.display(), cli.log_level);
    config.validate()?;
    info!("config loaded, {} account(s)", config.accounts.len());

    let storage: Arc<dyn Storage> = match &config.storage.reconcile_history_path {
        Some(path) => Arc::new(JsonlStorage::open(path).with_context(|| format!("opening {path}"))?),
        None => Arc::new(MemoryStorage::new()),
    };

    // 2. Accounts
    let mut supervisor = TaskSupervisor::new();
    let mut adapters: Vec<Arc<dyn ExchangeAdapter>> = Vec::new();
    for account in &config.accounts {
        let adapter = start_account(account, &storage, &mut supervisor, cli.reconcile_only)
            .await
            .with_context(|| format!("account '{}'", account.name))?;
        adapters.push(adapter);
    }

    info!("{} task(s) running, press Ctrl+C to stop", supervisor.len());

    // 3. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // 4. Streams first so no callback races the loops' exit
    for adapter in &adapters {
        adapter.stop_order_stream().await;
        adapter.stop_kline_stream().await;
    }
    let aborted = supervisor.shutdown(SHUTDOWN_TIMEOUT).await;
    if aborted > 0 {
        warn!("{aborted} task(s) aborted during shutdown");
    }

    info!("all accounts stopped, goodbye");
    Ok(())
}

async fn start_account(
    account: &AccountConfig,
    storage: &Arc<dyn Storage>,
    supervisor: &mut TaskSupervisor,
    reconcile_only: bool,
) -> Result<Arc<dyn ExchangeAdapter>> {
    let adapter = grid_td::registry::create_adapter(account).await?;
    let dispatcher = Arc::new(EventDispatcher::new(adapter.name(), &account.client_order_prefix));
    info!("account '{}': connected to {}", account.name, adapter.name());

    for symbol in &account.symbols {
        let ledger = Arc::new(SlotLedger::new(
            &symbol.symbol,
            symbol.price_interval,
            adapter.price_decimals(&symbol.symbol),
        ));
        let anchor = match symbol.anchor_price {
            Some(price) => price,
            None => adapter
                .get_latest_price(&symbol.symbol)
                .await
                .with_context(|| format!("{}: no anchor_price and no latest price", symbol.symbol))?,
        };
        let slots = ledger.build_ladder(anchor, symbol.window_size)?;
        info!("account '{}': {} ladder of {slots} slots around {anchor}", account.name, symbol.symbol);

        let engine = Arc::new(ReconciliationEngine::new(
            adapter.clone(),
            ledger.clone(),
            storage.clone(),
            ReconcileConfig::from_account(account),
        ));
        dispatcher.register(ledger.clone(), engine.trigger());

        // Adopt anything left over from a previous run before placing.
        if let Err(e) = engine.reconcile_once().await {
            warn!("account '{}': initial {} reconcile failed: {e}", account.name, symbol.symbol);
        }

        let passes = engine.subscribe_passes();
        supervisor.spawn(format!("reconcile:{}:{}", account.name, symbol.symbol), engine.run(supervisor.subscribe()));

        if symbol.auto_place && !reconcile_only {
            let executor =
                SlotExecutor::new(adapter.clone(), ledger, &account.client_order_prefix, symbol.order_quantity);
            let task = maintain_ladder(
                executor,
                dispatcher.clone(),
                adapter.clone(),
                symbol.clone(),
                passes,
                supervisor.subscribe(),
            );
            supervisor.spawn(format!("maintain:{}:{}", account.name, symbol.symbol), task);
        }
    }

    dispatcher.attach(adapter.as_ref(), &account.symbol_names(), account.kline_interval).await?;
    Ok(adapter)
}

/// Top up the ladder after every successful reconciliation pass.
async fn maintain_ladder(
    executor: SlotExecutor,
    dispatcher: Arc<EventDispatcher>,
    adapter: Arc<dyn ExchangeAdapter>,
    symbol: SymbolConfig,
    mut passes: watch::Receiver<u64>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            changed = passes.changed() => if changed.is_err() { break },
        }
        if *shutdown.borrow() {
            break;
        }

        let mark = match dispatcher.latest_price(&symbol.symbol) {
            Some(price) => price,
            None => match adapter.get_latest_price(&symbol.symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!("[maintain] {}: no mark price: {e}", symbol.symbol);
                    continue;
                }
            },
        };
        let report = executor.sync_ladder(mark, symbol.max_orders_per_pass).await;
        if report.failed > 0 {
            error!("[maintain] {}: {} placement(s) failed, {} placed", symbol.symbol, report.failed, report.placed);
        } else if report.placed > 0 {
            info!("[maintain] {}: placed {} order(s) around {mark}", symbol.symbol, report.placed);
        }
    }
}
