//! Process entrypoint (C9): CLI parsing, wiring, and the top-level run
//! loop. Structure follows the teacher's `trade/src/main.rs` — `StructOpt`
//! command enum, `color_eyre::install()`, then `logger::init_tracing()`
//! before anything else runs — generalised from its single `Run` command
//! to the pair-selection / override / monitor-only surface this engine's
//! config model requires.

use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::eyre::{self, WrapErr};
use rust_decimal::Decimal;
use structopt::StructOpt;
use tracing::{error, info};

use engine::config::{load_pair, PairConfig};
use engine::executor::OrderExecutor;
use engine::monitor::{PriceMonitor, TriggerVenue};
use engine::notifier::{NoopNotifier, WebhookNotifier};
use engine::position_manager::PositionManager;
use engine::registry::AdapterRegistry;
use engine::strategy::Strategy;
use engine::trade_log::{CsvTradeLogger, NullTradeLogger, TradeLogger};

#[derive(Debug, StructOpt)]
#[structopt(name = "hedge-arb", about = "Cross-venue perpetual hedge arbitrage engine")]
enum Command {
    /// Run the hedge strategy for one configured trading pair.
    Run {
        /// Pair id as it appears under `pairs:` in the config file.
        pair: String,

        /// Path to the YAML config file.
        #[structopt(long, default_value = "config/pairs.yaml")]
        config: PathBuf,

        /// Overrides `quantity` for this run only.
        #[structopt(long)]
        quantity: Option<Decimal>,

        /// Overrides `open_threshold` for this run only.
        #[structopt(long)]
        open_threshold: Option<Decimal>,

        /// Overrides `close_threshold` for this run only.
        #[structopt(long)]
        close_threshold: Option<Decimal>,

        /// Synthesise fills at reference prices instead of placing real
        /// orders; no money moves.
        #[structopt(long)]
        monitor_only: bool,

        /// Loads environment variables from this file instead of `.env`.
        #[structopt(long)]
        env_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    match Command::from_args() {
        Command::Run { pair, config, quantity, open_threshold, close_threshold, monitor_only, env_file } => {
            if let Some(path) = &env_file {
                dotenv::from_path(path).ok();
            }

            let _guards = engine::logger::init_tracing();

            match run(pair, config, quantity, open_threshold, close_threshold, monitor_only).await {
                Ok(()) => {
                    info!("shutdown complete");
                    Ok(())
                }
                Err(err) => {
                    error!(%err, "fatal error, exiting");
                    std::process::exit(1);
                }
            }
        }
    }
}

async fn run(
    pair: String,
    config_path: PathBuf,
    quantity_override: Option<Decimal>,
    open_threshold_override: Option<Decimal>,
    close_threshold_override: Option<Decimal>,
    monitor_only: bool,
) -> eyre::Result<()> {
    let mut pair_config: PairConfig =
        load_pair(&config_path, &pair).wrap_err_with(|| format!("loading config for pair '{pair}'"))?;

    if let Some(q) = quantity_override {
        pair_config.quantity = q;
    }
    if let Some(t) = open_threshold_override {
        pair_config.open_threshold = t;
    }
    if let Some(t) = close_threshold_override {
        pair_config.close_threshold = t;
    }

    if !pair_config.enabled {
        info!(pair = %pair, "pair is disabled in config, exiting");
        return Ok(());
    }

    info!(pair = %pair, symbol = %pair_config.symbol, monitor_only, "starting hedge strategy");

    let registry = AdapterRegistry::default();
    let adapter_a = registry
        .build(&pair_config.exchange_a, &pair_config.symbol, &pair_config.variational_config)
        .wrap_err("resolving venue A adapter")?;
    let adapter_b = registry
        .build(&pair_config.exchange_b, &pair_config.symbol, &pair_config.variational_config)
        .wrap_err("resolving venue B adapter")?;

    adapter_a.connect().await.wrap_err("connecting to venue A")?;
    adapter_b.connect().await.wrap_err("connecting to venue B")?;

    let monitor = PriceMonitor::new(&pair_config.symbol, &pair_config.exchange_a, &pair_config.exchange_b, TriggerVenue::A);
    monitor.attach(adapter_a.clone(), adapter_b.clone()).await.wrap_err("attaching price monitor")?;

    let notifier: Arc<dyn engine::notifier::Notifier> = match std::env::var("NOTIFIER_WEBHOOK_URL") {
        Ok(url) if !url.is_empty() => Arc::new(WebhookNotifier::new(url)),
        _ => Arc::new(NoopNotifier),
    };

    let trade_logger: Arc<dyn TradeLogger> = match std::env::var("TRADE_LOG_DIR") {
        Ok(dir) if !dir.is_empty() => Arc::new(CsvTradeLogger::new(dir)),
        _ => Arc::new(NullTradeLogger),
    };

    let position_manager = if pair_config.accumulate_mode {
        let max_position = pair_config
            .max_position
            .ok_or_else(|| eyre::eyre!("accumulate_mode requires max_position"))?;
        Arc::new(PositionManager::accumulate(max_position, pair_config.quantity, trade_logger))
    } else {
        Arc::new(PositionManager::single_slot(trade_logger))
    };

    let tolerance = engine::position_manager::default_sync_tolerance(pair_config.quantity);
    if let Err(err) = position_manager.sync_from_exchanges(&*adapter_a, &*adapter_b, &pair_config.symbol, tolerance).await {
        tracing::warn!(%err, "startup position reconciliation failed, continuing with local state");
    }

    let executor = OrderExecutor::new(adapter_a.clone(), adapter_b.clone(), notifier.clone());

    let (strategy, mut fatal_rx) =
        Strategy::new(pair_config, monitor_only, executor, position_manager, notifier, Arc::new(arb_core::SystemClock));
    strategy.attach(&monitor);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        Some(reason) = fatal_rx.recv() => {
            adapter_a.disconnect().await;
            adapter_b.disconnect().await;
            return Err(eyre::eyre!("fatal unwind failure: {reason}"));
        }
    }

    adapter_a.disconnect().await;
    adapter_b.disconnect().await;
    Ok(())
}
