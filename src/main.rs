//! COINHOP: autonomous ratio-jumping trading engine
//!
//! Entry point. Loads configuration, initialises structured logging, wires
//! market data, execution backend and scout engine, and runs the scout and
//! valuation schedules with graceful shutdown.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use coinhop::config;
use coinhop::engine::registry::CoinRegistry;
use coinhop::engine::scout::{ScoutEngine, ScoutSettings};
use coinhop::engine::single_flight::{FlightOutcome, SingleFlight};
use coinhop::exchange::client::ExchangeClient;
use coinhop::exchange::ReducedFidelity;
use coinhop::execution::live::LiveBackend;
use coinhop::execution::manager::{ManagerSettings, OrderExecutionManager, RetryPolicy};
use coinhop::execution::simulated::SimulatedBackend;
use coinhop::execution::{BalanceCache, ExecutionBackend, InstrumentInfo};
use coinhop::market::book::{BookMarketData, TickerFeed};
use coinhop::market::poller::SnapshotPoller;
use coinhop::storage::audit::JsonlAuditSink;
use coinhop::storage::BaselineStore;

const BANNER: &str = r#"
  ____ ___ ___ _   _ _   _  ___  ____
 / ___/ _ \_ _| \ | | | | |/ _ \|  _ \
| |  | | | | ||  \| | |_| | | | | |_) |
| |__| |_| | || |\  |  _  | |_| |  __/
 \____\___/___|_| \_|_| |_|\___/|_|

  Ratio-jumping trading engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        name = %cfg.engine.name,
        bridge = %cfg.strategy.bridge,
        coins = cfg.strategy.watchlist.len(),
        paper = cfg.execution.paper_trading,
        scout_interval_secs = cfg.engine.scout_sleep_time_secs,
        mode = ?cfg.score_mode(),
        "COINHOP starting up"
    );

    // -- Market data -----------------------------------------------------

    let (api_key, api_secret) = cfg.api_credentials()?;
    let client = Arc::new(ExchangeClient::new(cfg.exchange.base_url.clone(), api_key, api_secret)?);

    let registry = CoinRegistry::new(&cfg.strategy.watchlist);
    let bridge = cfg.strategy.bridge.clone();
    let store = BaselineStore::new(cfg.baseline_path());
    // disabled coins with stored pairs are still priced for valuation
    let known = store.known_symbols()?;
    let mut symbols: Vec<String> = registry
        .all()
        .iter()
        .map(|c| c.symbol.clone())
        .chain(known.iter().filter(|s| **s != bridge).cloned())
        .map(|s| format!("{s}{bridge}"))
        .collect();
    symbols.sort();
    symbols.dedup();

    let feed: Arc<dyn TickerFeed> = client.clone();
    let market = Arc::new(BookMarketData::new(Some(feed)));
    let poller = SnapshotPoller::new(client.clone(), market.clone(), symbols);
    poller.load_filters().await;
    if let Err(e) = poller.refresh().await {
        warn!(error = %e, "Initial market snapshot failed");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poll_interval = Duration::from_secs(cfg.exchange.poll_interval_secs);
    let poller_handle = tokio::spawn(poller.run(poll_interval, shutdown_rx));

    // -- Execution -------------------------------------------------------

    let cache = Arc::new(BalanceCache::new());
    let backend: Arc<dyn ExecutionBackend>;
    let instruments: Arc<dyn InstrumentInfo>;
    if cfg.execution.paper_trading {
        let wallet = SimulatedBackend::open(
            Some(cfg.wallet_path()),
            &bridge,
            cfg.execution.paper_balance,
            cache.clone(),
        )
        .context("Failed to open paper wallet")?;
        backend = Arc::new(wallet);
        instruments = Arc::new(ReducedFidelity::new(client.clone()));
    } else {
        backend = Arc::new(LiveBackend::new(client.clone(), cache.clone()));
        instruments = client.clone();
    }
    info!(backend = backend.name(), "Execution backend ready");

    let audit = Arc::new(JsonlAuditSink::new(cfg.audit_dir()).context("Failed to open audit directory")?);
    let history = audit.clone();
    let manager = Arc::new(OrderExecutionManager::new(
        backend,
        instruments,
        market.clone(),
        cache,
        audit.clone(),
        ManagerSettings {
            discount_asset: cfg.execution.discount_asset.clone(),
            default_fee: cfg.execution.default_fee,
            retry: RetryPolicy {
                attempts: cfg.execution.order_retry_attempts,
                delay: Duration::from_millis(cfg.execution.order_retry_delay_ms),
            },
            ..ManagerSettings::default()
        },
    ));

    // -- Engine ----------------------------------------------------------

    let matrix = store.load_matrix(&registry)?;
    let engine = Arc::new(
        ScoutEngine::new(
            ScoutSettings::new(bridge, cfg.score_mode()),
            registry,
            matrix,
            market,
            manager,
            audit,
        )
        .with_baseline_store(store)
        .with_tracked_coins(known),
    );

    engine
        .initialize_trade_thresholds()
        .await
        .context("Failed to initialise trade thresholds")?;

    // -- Main loop -------------------------------------------------------

    let scout_flight = Arc::new(SingleFlight::new());
    let value_flight = Arc::new(SingleFlight::new());
    let mut scout_tick = tokio::time::interval(cfg.scout_interval());
    scout_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut value_tick = tokio::time::interval(Duration::from_secs(cfg.engine.valuation_interval_secs));
    value_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut prune_tick = tokio::time::interval(Duration::from_secs(60));
    prune_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let scout_retention = cfg.scout_history_retention();
    let mut last_value_prune: Option<chrono::DateTime<chrono::Utc>> = None;

    let mut tasks = JoinSet::new();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Entering main loop. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = scout_tick.tick() => {
                let engine = engine.clone();
                let flight = scout_flight.clone();
                tasks.spawn(async move {
                    let outcome = flight
                        .run(|| {
                            let engine = engine.clone();
                            async move {
                                if let Err(e) = engine.scout().await {
                                    error!(error = %e, "Scout cycle failed, continuing to next");
                                }
                            }
                        })
                        .await;
                    if let FlightOutcome::Ran { runs } = outcome {
                        if runs > 1 {
                            info!(runs, "Scout re-ran for coalesced triggers");
                        }
                    }
                });
            }
            _ = value_tick.tick() => {
                let engine = engine.clone();
                let flight = value_flight.clone();
                tasks.spawn(async move {
                    flight
                        .run(|| {
                            let engine = engine.clone();
                            async move {
                                match engine.update_values().await {
                                    Ok(count) => info!(coins = count, "Portfolio valued"),
                                    Err(e) => error!(error = %e, "Valuation failed, continuing to next"),
                                }
                            }
                        })
                        .await;
                });
            }
            _ = prune_tick.tick() => {
                let now = chrono::Utc::now();
                let prune_values = last_value_prune.map_or(true, |t| now - t >= chrono::Duration::hours(1));
                if prune_values {
                    last_value_prune = Some(now);
                }
                let history = history.clone();
                tasks.spawn_blocking(move || {
                    if let Err(e) = history.prune_scout_history(scout_retention, now) {
                        warn!(error = %e, "Scout history pruning failed");
                    }
                    if prune_values {
                        if let Err(e) = history.prune_value_history(now) {
                            warn!(error = %e, "Coin value pruning failed");
                        }
                    }
                });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Scheduled task panicked");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);

    let grace = Duration::from_secs(cfg.engine.shutdown_grace_secs);
    let drained = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(grace_secs = grace.as_secs(), "In-flight cycles did not finish in time, aborting");
        tasks.shutdown().await;
    }
    if let Err(e) = poller_handle.await {
        warn!(error = %e, "Market poller ended abnormally");
    }

    info!(
        scout_runs = scout_flight.completed_runs(),
        valuations = value_flight.completed_runs(),
        "COINHOP shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("coinhop=info"));

    let json_logging = std::env::var("COINHOP_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
